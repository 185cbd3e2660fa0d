//! Core data models for the autoscaler

use crate::history::MetricHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minimum replica count
pub const DEFAULT_MIN_REPLICAS: u32 = 1;
/// Default maximum replica count
pub const DEFAULT_MAX_REPLICAS: u32 = 10;
/// Default scale-up CPU threshold (percent)
pub const DEFAULT_UP_THRESHOLD: f64 = 70.0;
/// Default scale-down CPU threshold (percent)
pub const DEFAULT_DOWN_THRESHOLD: f64 = 30.0;

/// Build the stable key for a service
pub fn service_id(project: &str, name: &str) -> String {
    format!("{}_{}", project, name)
}

/// A service as observed in the current run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Stable key, `project_service`
    pub id: String,
    pub project: String,
    pub name: String,
    /// Observed replica count; `None` until known
    pub current_replicas: Option<u32>,
    /// Whether the service publishes at least one port; `None` until known
    pub exposed_ports: Option<bool>,
    /// Latest CPU utilization in percent, absent when unmeasurable
    pub cpu_percent: Option<f64>,
}

impl ServiceRecord {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        let project = project.into();
        let name = name.into();
        Self {
            id: service_id(&project, &name),
            project,
            name,
            current_replicas: None,
            exposed_ports: None,
            cpu_percent: None,
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.current_replicas = Some(replicas);
        self
    }

    pub fn with_cpu(mut self, cpu_percent: f64) -> Self {
        self.cpu_percent = Some(cpu_percent);
        self
    }

    pub fn with_exposed_ports(mut self, exposed: bool) -> Self {
        self.exposed_ports = Some(exposed);
        self
    }

    /// Unknown exposure counts as not exposed
    pub fn has_exposed_ports(&self) -> bool {
        self.exposed_ports.unwrap_or(false)
    }

    /// Whether live data must be fetched before a decision can be made
    pub fn needs_probe(&self, ignore_exposed: bool) -> bool {
        self.cpu_percent.is_none()
            || self.current_replicas.is_none()
            || (ignore_exposed && self.exposed_ports.is_none())
    }

    /// Fill fields the catalog did not carry. Catalog values win.
    pub fn apply_probe(&mut self, probe: &ServiceProbe) {
        if self.cpu_percent.is_none() {
            self.cpu_percent = probe.cpu_percent;
        }
        if self.current_replicas.is_none() {
            self.current_replicas = probe.replicas;
        }
        if self.exposed_ports.is_none() {
            self.exposed_ports = probe.exposed_ports;
        }
    }
}

/// Live per-service data fetched outside the catalog listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceProbe {
    pub cpu_percent: Option<f64>,
    pub replicas: Option<u32>,
    pub exposed_ports: Option<bool>,
}

/// Per-service scaling limits and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_min")]
    pub min: u32,
    #[serde(default = "default_max")]
    pub max: u32,
    #[serde(default = "default_up")]
    pub up: f64,
    #[serde(default = "default_down")]
    pub down: f64,
    #[serde(default)]
    pub ignore: bool,
}

fn default_min() -> u32 {
    DEFAULT_MIN_REPLICAS
}

fn default_max() -> u32 {
    DEFAULT_MAX_REPLICAS
}

fn default_up() -> f64 {
    DEFAULT_UP_THRESHOLD
}

fn default_down() -> f64 {
    DEFAULT_DOWN_THRESHOLD
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_REPLICAS,
            max: DEFAULT_MAX_REPLICAS,
            up: DEFAULT_UP_THRESHOLD,
            down: DEFAULT_DOWN_THRESHOLD,
            ignore: false,
        }
    }
}

impl ScalingConfig {
    /// Check the limits and the hysteresis band
    pub fn validate(&self) -> Result<(), String> {
        if self.min > self.max {
            return Err(format!("min ({}) is greater than max ({})", self.min, self.max));
        }
        for (name, value) in [("up", self.up), ("down", self.down)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{} threshold {} is outside 0-100", name, value));
            }
        }
        if self.down >= self.up {
            return Err(format!(
                "down threshold ({}) must be below up threshold ({})",
                self.down, self.up
            ));
        }
        Ok(())
    }
}

/// One CPU observation stored in the history window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub at: DateTime<Utc>,
    /// `None` when the service was unmeasurable in that run
    pub cpu_percent: Option<f64>,
}

/// Durable per-service state carried between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    #[serde(default)]
    pub last_scale_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cpu_history: MetricHistory,
    #[serde(default)]
    pub last_decision: Option<DecisionRecord>,
}

/// Kind of scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Hold,
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionKind::Hold => "HOLD",
            DecisionKind::ScaleUp => "SCALE_UP",
            DecisionKind::ScaleDown => "SCALE_DOWN",
        };
        f.write_str(s)
    }
}

/// Why the engine produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Ignored,
    NoMetricData,
    NoReplicaData,
    CooldownActive,
    AboveMaxReplicas,
    BelowMinReplicas,
    CpuAboveThreshold,
    CpuBelowThreshold,
    WithinBand,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::Ignored => "ignored",
            DecisionReason::NoMetricData => "no metric data",
            DecisionReason::NoReplicaData => "no replica data",
            DecisionReason::CooldownActive => "cooldown active",
            DecisionReason::AboveMaxReplicas => "above max replicas",
            DecisionReason::BelowMinReplicas => "below min replicas",
            DecisionReason::CpuAboveThreshold => "cpu above threshold",
            DecisionReason::CpuBelowThreshold => "cpu below threshold",
            DecisionReason::WithinBand => "within band",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    /// Replica count to converge to; the observed count for `Hold`
    pub target_replicas: Option<u32>,
    pub reason: DecisionReason,
    /// Smoothed CPU average the decision was based on
    pub smoothed_cpu: Option<f64>,
}

impl Decision {
    pub fn hold(reason: DecisionReason, current: Option<u32>, smoothed_cpu: Option<f64>) -> Self {
        Self {
            kind: DecisionKind::Hold,
            target_replicas: current,
            reason,
            smoothed_cpu,
        }
    }

    pub fn scale(
        kind: DecisionKind,
        target: u32,
        reason: DecisionReason,
        smoothed_cpu: Option<f64>,
    ) -> Self {
        Self {
            kind,
            target_replicas: Some(target),
            reason,
            smoothed_cpu,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.kind == DecisionKind::Hold
    }
}

/// Last decision persisted for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decided_at: DateTime<Utc>,
    #[serde(flatten)]
    pub decision: Decision,
    /// Short summary of what happened after the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}
