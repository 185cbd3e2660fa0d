//! Run orchestration
//!
//! One run: take the run lock, fetch and normalize the catalog, then push
//! every service through its pipeline with bounded concurrency. Only the
//! lock and the catalog fetch can abort a run; any per-service failure
//! becomes an errored entry in the report.

mod policy;
mod worker;


pub use policy::ScalingPolicies;

use crate::catalog;
use crate::clock::{Clock, SystemClock};
use crate::decision::{DecisionEngine, EngineSettings};
use crate::error::RunError;
use crate::executor::{ActionExecutor, RetryPolicy};
use crate::history::DEFAULT_HISTORY_SIZE;
use crate::observability::StructuredLogger;
use crate::platform::PlatformApi;
use crate::report::{FailureStage, RunReport, ServiceOutcome};
use crate::state::{RunLock, StateStore, DEFAULT_LOCK_STALE_AFTER};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;
use worker::ServiceWorker;

/// Default number of services processed at the same time
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Run-wide settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub engine: EngineSettings,
    /// Samples kept per service
    pub history_size: usize,
    /// Upper bound on services processed concurrently
    pub max_concurrency: usize,
    /// Directory holding the run lock; `None` disables locking
    pub lock_dir: Option<PathBuf>,
    pub lock_stale_after: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            history_size: DEFAULT_HISTORY_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lock_dir: None,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
            retry: RetryPolicy::default(),
        }
    }
}

/// Drives a single autoscaler run
pub struct RunOrchestrator {
    api: Arc<dyn PlatformApi>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    policies: Arc<ScalingPolicies>,
    settings: RunSettings,
}

impl RunOrchestrator {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        store: Arc<dyn StateStore>,
        policies: ScalingPolicies,
        settings: RunSettings,
    ) -> Self {
        Self {
            api,
            store,
            clock: Arc::new(SystemClock),
            policies: Arc::new(policies),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one run
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = self.clock.now();
        let run_id = format!(
            "{}-{}",
            started_at.format("%Y%m%dT%H%M%SZ"),
            std::process::id()
        );
        let logger = StructuredLogger::new(run_id.clone());

        let _lock = match &self.settings.lock_dir {
            Some(dir) => {
                match RunLock::acquire(dir, self.settings.lock_stale_after, started_at) {
                    Ok(lock) => Some(lock),
                    Err(err) => {
                        logger.log_run_aborted(&err);
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        let payload = match self.api.fetch_catalog().await {
            Ok(payload) => payload,
            Err(source) => {
                let err = RunError::Catalog(source);
                logger.log_run_aborted(&err);
                return Err(err);
            }
        };

        let normalized = catalog::normalize(&payload);
        let mut report = RunReport::new(run_id, started_at);
        report.add_warnings(&normalized.warnings);

        let mut seen = HashSet::new();
        let records: Vec<_> = normalized
            .records
            .into_iter()
            .filter(|record| {
                let first = seen.insert(record.id.clone());
                if !first {
                    logger.log_duplicate(&record.id);
                }
                first
            })
            .collect();

        logger.log_run_started(records.len(), report.warnings.len());

        let worker = ServiceWorker {
            api: self.api.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            policies: self.policies.clone(),
            engine: DecisionEngine::new(self.settings.engine.clone()),
            executor: ActionExecutor::new(self.api.clone(), self.settings.retry.clone()),
            history_size: self.settings.history_size,
            logger: logger.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let service_id = record.id.clone();
            let worker = worker.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ServiceOutcome::errored(
                        record.id,
                        FailureStage::Internal,
                        "concurrency limiter closed",
                    );
                };
                debug!(service = %record.id, "Processing service");
                worker.process(record).await
            });
            handles.push((service_id, handle));
        }

        for (service_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let message = format!("service task failed: {}", join_err);
                    logger.log_service_errored(&service_id, FailureStage::Internal, &message);
                    ServiceOutcome::errored(service_id, FailureStage::Internal, message)
                }
            };
            report.push(outcome);
        }

        report.finish(self.clock.now());
        logger.log_run_completed(&report);
        Ok(report)
    }
}
