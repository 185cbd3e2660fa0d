//! Hysteresis decision engine
//!
//! Pure function of the observed service, its scaling limits, its persisted
//! state and the current instant. Rules are evaluated in order and the first
//! match wins:
//!
//! ```text
//! ignored (config or exposed ports)      -> HOLD  "ignored"
//! no CPU data in the window              -> HOLD  "no metric data"
//! replica count unknown                  -> HOLD  "no replica data"
//! now - last_scale < cooldown            -> HOLD  "cooldown active"
//! replicas > max / replicas < min        -> SCALE_DOWN to max / SCALE_UP to min
//! avg >= up   and replicas < max         -> SCALE_UP   to replicas + 1
//! avg <= down and replicas > min         -> SCALE_DOWN to replicas - 1
//! otherwise                              -> HOLD  "within band"
//! ```
//!
//! Scaling moves one replica per cooldown window.

use crate::models::{
    Decision, DecisionKind, DecisionReason, ScalingConfig, ServiceRecord, ServiceState,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default minimum time between two scaling actions (5 minutes)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Run-wide inputs to the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Hold every service that publishes a port
    pub ignore_exposed: bool,
    /// Minimum time between two scaling actions on one service
    pub cooldown: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ignore_exposed: true,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Evaluates scaling decisions
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    settings: EngineSettings,
}

impl DecisionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Decide what to do with one service
    ///
    /// `state` must already contain this run's CPU sample.
    pub fn evaluate(
        &self,
        record: &ServiceRecord,
        config: &ScalingConfig,
        state: &ServiceState,
        now: DateTime<Utc>,
    ) -> Decision {
        let current = record.current_replicas;
        let average = state.cpu_history.smoothed();

        if config.ignore || (self.settings.ignore_exposed && record.has_exposed_ports()) {
            return Decision::hold(DecisionReason::Ignored, current, average);
        }

        let Some(avg) = average else {
            return Decision::hold(DecisionReason::NoMetricData, current, None);
        };

        let Some(replicas) = current else {
            return Decision::hold(DecisionReason::NoReplicaData, None, average);
        };

        if self.in_cooldown(state, now) {
            return Decision::hold(DecisionReason::CooldownActive, current, average);
        }

        if replicas > config.max {
            return Decision::scale(
                DecisionKind::ScaleDown,
                config.max,
                DecisionReason::AboveMaxReplicas,
                average,
            );
        }
        if replicas < config.min {
            return Decision::scale(
                DecisionKind::ScaleUp,
                config.min,
                DecisionReason::BelowMinReplicas,
                average,
            );
        }

        if avg >= config.up && replicas < config.max {
            return Decision::scale(
                DecisionKind::ScaleUp,
                (replicas + 1).min(config.max),
                DecisionReason::CpuAboveThreshold,
                average,
            );
        }

        if avg <= config.down && replicas > config.min {
            return Decision::scale(
                DecisionKind::ScaleDown,
                replicas.saturating_sub(1).max(config.min),
                DecisionReason::CpuBelowThreshold,
                average,
            );
        }

        Decision::hold(DecisionReason::WithinBand, current, average)
    }

    /// Whether the last scaling action is younger than the cooldown period.
    ///
    /// A timestamp in the future counts as active cooldown.
    pub fn in_cooldown(&self, state: &ServiceState, now: DateTime<Utc>) -> bool {
        let Some(last) = state.last_scale_at else {
            return false;
        };
        match now.signed_duration_since(last).to_std() {
            Ok(elapsed) => elapsed < self.settings.cooldown,
            Err(_) => true,
        }
    }
}
