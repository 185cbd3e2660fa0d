//! Scale action execution
//!
//! Issues the replica update for a non-hold decision. Transient platform
//! failures are retried with exponential backoff up to a fixed number of
//! attempts; permanent failures stop immediately.

use crate::error::{ActionError, PlatformError};
use crate::models::ServiceRecord;
use crate::platform::PlatformApi;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behavior for scale calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Result of a successful scale action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Replica count changed
    Scaled { from: Option<u32>, to: u32, attempts: u32 },
    /// The platform already ran the target count; the update was still sent
    /// and converged without change
    NoOp { replicas: u32, attempts: u32 },
}

impl ActionOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            ActionOutcome::Scaled { attempts, .. } | ActionOutcome::NoOp { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn replicas_after(&self) -> u32 {
        match self {
            ActionOutcome::Scaled { to, .. } => *to,
            ActionOutcome::NoOp { replicas, .. } => *replicas,
        }
    }
}

/// Executes scale actions against the platform
#[derive(Clone)]
pub struct ActionExecutor {
    api: Arc<dyn PlatformApi>,
    policy: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(api: Arc<dyn PlatformApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// Converge `record` to `target` replicas
    pub async fn execute(
        &self,
        record: &ServiceRecord,
        target: u32,
    ) -> Result<ActionOutcome, ActionError> {
        let live = self.live_replicas(record).await;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.api.scale(&record.project, &record.name, target).await {
                Ok(()) => {
                    let outcome = if live == Some(target) {
                        ActionOutcome::NoOp {
                            replicas: target,
                            attempts: attempt,
                        }
                    } else {
                        ActionOutcome::Scaled {
                            from: live,
                            to: target,
                            attempts: attempt,
                        }
                    };
                    return Ok(outcome);
                }
                Err(error) if !error.is_transient() => {
                    return Err(ActionError::Permanent {
                        attempts: attempt,
                        error,
                    });
                }
                Err(last) if attempt >= max_attempts => {
                    return Err(ActionError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(error) => self.wait_before_retry(record, attempt, &error).await,
            }
        }
    }

    /// Re-read the deployed count right before acting. Falls back to the
    /// count observed earlier in the run when the read fails.
    async fn live_replicas(&self, record: &ServiceRecord) -> Option<u32> {
        match self.api.current_replicas(&record.project, &record.name).await {
            Ok(Some(replicas)) => Some(replicas),
            Ok(None) => record.current_replicas,
            Err(e) => {
                debug!(
                    service = %record.id,
                    error = %e,
                    "Pre-scale replica read failed, using catalog value"
                );
                record.current_replicas
            }
        }
    }

    async fn wait_before_retry(&self, record: &ServiceRecord, attempt: u32, error: &PlatformError) {
        let backoff = self.policy.backoff_for(attempt);
        warn!(
            event = "scale_retry",
            service = %record.id,
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Transient failure scaling service, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}
