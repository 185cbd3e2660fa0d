//! Observability for autoscaler runs
//!
//! Provides:
//! - Prometheus gauges describing the last run, exported through the node
//!   exporter textfile collector
//! - Structured logging of run and per-service events with tracing

use crate::error::{ActionError, RunError};
use crate::executor::ActionOutcome;
use crate::models::{Decision, ServiceRecord};
use crate::report::{FailureStage, OutcomeStatus, RunReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

const STATUSES: &[OutcomeStatus] = &[
    OutcomeStatus::ScaledUp,
    OutcomeStatus::ScaledDown,
    OutcomeStatus::NoOp,
    OutcomeStatus::Held,
    OutcomeStatus::Ignored,
    OutcomeStatus::Errored,
];

/// Gauges summarizing the most recent run
///
/// Each instance owns its registry, so several runs in one process (tests)
/// never collide on metric names.
#[derive(Clone)]
pub struct RunMetrics {
    registry: Registry,
    services: IntGaugeVec,
    service_replicas: IntGaugeVec,
    service_cpu_percent: GaugeVec,
    catalog_warnings: IntGauge,
    run_duration_seconds: Gauge,
    last_run_timestamp_seconds: Gauge,
    last_run_success: IntGauge,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let services = IntGaugeVec::new(
            Opts::new(
                "panel_autoscaler_services",
                "Services processed in the last run by outcome",
            ),
            &["status"],
        )?;
        let service_replicas = IntGaugeVec::new(
            Opts::new(
                "panel_autoscaler_service_replicas",
                "Replica count of each service after the last run",
            ),
            &["service"],
        )?;
        let service_cpu_percent = GaugeVec::new(
            Opts::new(
                "panel_autoscaler_service_cpu_percent",
                "Smoothed CPU utilization used for the last decision",
            ),
            &["service"],
        )?;
        let catalog_warnings = IntGauge::new(
            "panel_autoscaler_catalog_warnings",
            "Malformed catalog fragments skipped in the last run",
        )?;
        let run_duration_seconds = Gauge::new(
            "panel_autoscaler_run_duration_seconds",
            "Wall time of the last run",
        )?;
        let last_run_timestamp_seconds = Gauge::new(
            "panel_autoscaler_last_run_timestamp_seconds",
            "Unix time the last run finished",
        )?;
        let last_run_success = IntGauge::new(
            "panel_autoscaler_last_run_success",
            "1 if the last run completed, 0 if it aborted",
        )?;

        registry.register(Box::new(services.clone()))?;
        registry.register(Box::new(service_replicas.clone()))?;
        registry.register(Box::new(service_cpu_percent.clone()))?;
        registry.register(Box::new(catalog_warnings.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(last_run_timestamp_seconds.clone()))?;
        registry.register(Box::new(last_run_success.clone()))?;

        Ok(Self {
            registry,
            services,
            service_replicas,
            service_cpu_percent,
            catalog_warnings,
            run_duration_seconds,
            last_run_timestamp_seconds,
            last_run_success,
        })
    }

    /// Publish the gauges for a completed run
    pub fn record_report(&self, report: &RunReport) {
        for status in STATUSES {
            let count = report
                .outcomes
                .iter()
                .filter(|o| o.status == *status)
                .count();
            self.services
                .with_label_values(&[status.as_str()])
                .set(count as i64);
        }

        self.service_replicas.reset();
        self.service_cpu_percent.reset();
        for outcome in &report.outcomes {
            if let Some(replicas) = outcome.replicas_after.or(outcome.replicas_before) {
                self.service_replicas
                    .with_label_values(&[outcome.service_id.as_str()])
                    .set(i64::from(replicas));
            }
            if let Some(cpu) = outcome.smoothed_cpu {
                self.service_cpu_percent
                    .with_label_values(&[outcome.service_id.as_str()])
                    .set(cpu);
            }
        }

        self.catalog_warnings.set(report.warnings.len() as i64);
        self.run_duration_seconds.set(report.duration_secs());
        self.last_run_timestamp_seconds
            .set(report.finished_at.timestamp() as f64);
        self.last_run_success.set(1);
    }

    /// Mark the last run as aborted
    pub fn record_failure(&self, at: DateTime<Utc>) {
        self.last_run_timestamp_seconds.set(at.timestamp() as f64);
        self.last_run_success.set(0);
    }

    /// Prometheus text exposition of all gauges
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }

    /// Write the exposition to `path` for the node exporter textfile
    /// collector. The file is replaced atomically.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        let temp_path = path.with_extension(format!("prom.tmp-{}", std::process::id()));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(rendered.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result.with_context(|| format!("Failed to write metrics textfile {:?}", path))
    }
}

/// Structured logger for run events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, services: usize, warnings: usize) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            services = services,
            catalog_warnings = warnings,
            "Autoscaler run started"
        );
    }

    pub fn log_decision(&self, record: &ServiceRecord, decision: &Decision) {
        info!(
            event = "service_decision",
            run_id = %self.run_id,
            service = %record.id,
            project = %record.project,
            decision = %decision.kind,
            reason = %decision.reason,
            current_replicas = ?record.current_replicas,
            target_replicas = ?decision.target_replicas,
            cpu_percent = ?record.cpu_percent,
            smoothed_cpu = ?decision.smoothed_cpu,
            "Evaluated service"
        );
    }

    pub fn log_scale_result(&self, service_id: &str, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Scaled { from, to, attempts } => info!(
                event = "scale_executed",
                run_id = %self.run_id,
                service = %service_id,
                from_replicas = ?from,
                to_replicas = to,
                attempts = attempts,
                "Scaled service"
            ),
            ActionOutcome::NoOp { replicas, attempts } => info!(
                event = "scale_noop",
                run_id = %self.run_id,
                service = %service_id,
                replicas = replicas,
                attempts = attempts,
                "Service already at target replica count"
            ),
        }
    }

    pub fn log_action_failed(&self, service_id: &str, target: u32, err: &ActionError) {
        error!(
            event = "action_failed",
            run_id = %self.run_id,
            service = %service_id,
            target_replicas = target,
            attempts = err.attempts(),
            error = %err,
            "Scale action failed"
        );
    }

    pub fn log_service_errored(&self, service_id: &str, stage: FailureStage, err: &str) {
        error!(
            event = "service_errored",
            run_id = %self.run_id,
            service = %service_id,
            stage = ?stage,
            error = %err,
            "Service processing failed"
        );
    }

    pub fn log_duplicate(&self, service_id: &str) {
        warn!(
            event = "duplicate_service",
            run_id = %self.run_id,
            service = %service_id,
            "Service listed more than once, processing first occurrence only"
        );
    }

    pub fn log_run_completed(&self, report: &RunReport) {
        let counts = report.counts();
        let degraded = report.is_degraded();
        if degraded {
            warn!(
                event = "run_completed",
                run_id = %self.run_id,
                processed = counts.processed,
                scaled_up = counts.scaled_up,
                scaled_down = counts.scaled_down,
                no_op = counts.no_op,
                held = counts.held,
                ignored = counts.ignored,
                errored = counts.errored,
                duration_secs = report.duration_secs(),
                "Autoscaler run completed with failures"
            );
        } else {
            info!(
                event = "run_completed",
                run_id = %self.run_id,
                processed = counts.processed,
                scaled_up = counts.scaled_up,
                scaled_down = counts.scaled_down,
                no_op = counts.no_op,
                held = counts.held,
                ignored = counts.ignored,
                duration_secs = report.duration_secs(),
                "Autoscaler run completed"
            );
        }
    }

    pub fn log_run_aborted(&self, err: &RunError) {
        error!(
            event = "run_aborted",
            run_id = %self.run_id,
            exit_code = err.exit_code(),
            error = %err,
            "Autoscaler run aborted"
        );
    }
}
