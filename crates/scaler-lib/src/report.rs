//! Run summary
//!
//! One [`ServiceOutcome`] per processed service plus aggregate counts. The
//! report is what the binary prints and exports at the end of a run.

use crate::catalog::NormalizationWarning;
use crate::models::{DecisionKind, DecisionReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Final status of one service in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    ScaledUp,
    ScaledDown,
    /// Scale call made but the platform already ran the target count
    NoOp,
    Held,
    Ignored,
    Errored,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::ScaledUp => "scaled_up",
            OutcomeStatus::ScaledDown => "scaled_down",
            OutcomeStatus::NoOp => "no_op",
            OutcomeStatus::Held => "held",
            OutcomeStatus::Ignored => "ignored",
            OutcomeStatus::Errored => "errored",
        }
    }

    pub fn from_scale(kind: DecisionKind) -> Self {
        match kind {
            DecisionKind::ScaleUp => OutcomeStatus::ScaledUp,
            DecisionKind::ScaleDown => OutcomeStatus::ScaledDown,
            DecisionKind::Hold => OutcomeStatus::Held,
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a per-service failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Action,
    State,
    Internal,
}

/// What happened to one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub service_id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecisionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed_cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas_before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas_after: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceOutcome {
    pub fn new(service_id: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            service_id: service_id.into(),
            status,
            reason: None,
            smoothed_cpu: None,
            replicas_before: None,
            replicas_after: None,
            stage: None,
            error: None,
        }
    }

    pub fn errored(service_id: impl Into<String>, stage: FailureStage, error: impl ToString) -> Self {
        Self {
            stage: Some(stage),
            error: Some(error.to_string()),
            ..Self::new(service_id, OutcomeStatus::Errored)
        }
    }

    pub fn with_reason(mut self, reason: DecisionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_cpu(mut self, smoothed_cpu: Option<f64>) -> Self {
        self.smoothed_cpu = smoothed_cpu;
        self
    }

    pub fn with_replicas(mut self, before: Option<u32>, after: Option<u32>) -> Self {
        self.replicas_before = before;
        self.replicas_after = after;
        self
    }
}

/// Aggregate counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub processed: usize,
    pub scaled_up: usize,
    pub scaled_down: usize,
    pub no_op: usize,
    pub held: usize,
    pub ignored: usize,
    pub errored: usize,
}

/// Summary of one autoscaler run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ServiceOutcome>,
    /// Catalog fragments skipped during normalization
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: started_at,
            outcomes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_warnings(&mut self, warnings: &[NormalizationWarning]) {
        self.warnings
            .extend(warnings.iter().map(ToString::to_string));
    }

    pub fn push(&mut self, outcome: ServiceOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts {
            processed: self.outcomes.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::ScaledUp => counts.scaled_up += 1,
                OutcomeStatus::ScaledDown => counts.scaled_down += 1,
                OutcomeStatus::NoOp => counts.no_op += 1,
                OutcomeStatus::Held => counts.held += 1,
                OutcomeStatus::Ignored => counts.ignored += 1,
                OutcomeStatus::Errored => counts.errored += 1,
            }
        }
        counts
    }

    /// Whether at least one service failed
    pub fn is_degraded(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == OutcomeStatus::Errored)
    }

    pub fn outcome(&self, service_id: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|o| o.service_id == service_id)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
