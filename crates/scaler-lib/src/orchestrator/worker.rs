//! Per-service pipeline: probe, load state, sample, decide, act, persist

use super::policy::ScalingPolicies;
use crate::clock::Clock;
use crate::decision::DecisionEngine;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::models::{CpuSample, DecisionKind, DecisionReason, DecisionRecord, ServiceRecord};
use crate::observability::StructuredLogger;
use crate::platform::{probe_service, PlatformApi};
use crate::report::{FailureStage, OutcomeStatus, ServiceOutcome};
use crate::state::StateStore;
use std::sync::Arc;

/// Everything a spawned service task needs, cheaply cloneable
#[derive(Clone)]
pub(crate) struct ServiceWorker {
    pub api: Arc<dyn PlatformApi>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub policies: Arc<ScalingPolicies>,
    pub engine: DecisionEngine,
    pub executor: ActionExecutor,
    pub history_size: usize,
    pub logger: StructuredLogger,
}

impl ServiceWorker {
    pub async fn process(&self, mut record: ServiceRecord) -> ServiceOutcome {
        let config = self.policies.for_service(&record.id).clone();
        let ignore_exposed = self.engine.settings().ignore_exposed;

        let already_ignored =
            config.ignore || (ignore_exposed && record.has_exposed_ports());
        if !already_ignored && record.needs_probe(ignore_exposed) {
            let probe = probe_service(self.api.as_ref(), &record, ignore_exposed).await;
            record.apply_probe(&probe);
        }

        let now = self.clock.now();
        let mut state = self.store.load(&record.id);
        state.cpu_history.push(
            CpuSample {
                at: now,
                cpu_percent: record.cpu_percent,
            },
            self.history_size,
        );

        let decision = self.engine.evaluate(&record, &config, &state, now);
        self.logger.log_decision(&record, &decision);

        let base = ServiceOutcome::new(record.id.clone(), OutcomeStatus::Held)
            .with_reason(decision.reason)
            .with_cpu(decision.smoothed_cpu);

        let outcome = match (decision.kind, decision.target_replicas) {
            (DecisionKind::Hold, _) | (_, None) => {
                let status = if decision.reason == DecisionReason::Ignored {
                    OutcomeStatus::Ignored
                } else {
                    OutcomeStatus::Held
                };
                ServiceOutcome {
                    status,
                    ..base.with_replicas(record.current_replicas, record.current_replicas)
                }
            }
            (kind, Some(target)) => match self.executor.execute(&record, target).await {
                Ok(action) => {
                    self.logger.log_scale_result(&record.id, &action);
                    state.last_scale_at = Some(self.clock.now());
                    let status = match action {
                        ActionOutcome::Scaled { .. } => OutcomeStatus::from_scale(kind),
                        ActionOutcome::NoOp { .. } => OutcomeStatus::NoOp,
                    };
                    ServiceOutcome {
                        status,
                        ..base.with_replicas(record.current_replicas, Some(action.replicas_after()))
                    }
                }
                Err(err) => {
                    self.logger.log_action_failed(&record.id, target, &err);
                    ServiceOutcome {
                        status: OutcomeStatus::Errored,
                        stage: Some(FailureStage::Action),
                        error: Some(err.to_string()),
                        ..base.with_replicas(record.current_replicas, record.current_replicas)
                    }
                }
            },
        };

        state.last_decision = Some(DecisionRecord {
            decided_at: now,
            decision,
            outcome: Some(outcome.status.to_string()),
        });

        if let Err(err) = self.store.save(&record.id, &state) {
            let message = err.to_string();
            self.logger
                .log_service_errored(&record.id, FailureStage::State, &message);
            return ServiceOutcome {
                status: OutcomeStatus::Errored,
                stage: Some(FailureStage::State),
                error: Some(message),
                ..outcome
            };
        }

        outcome
    }
}
