//! Panel Autoscaler - one-shot CPU based replica autoscaler
//!
//! Each invocation (typically from cron or a systemd timer) fetches the
//! service catalog, decides per service whether to scale, applies the
//! decisions and persists per-service state for the next run.

mod config;
mod logging;

use clap::Parser;
use crate::config::{AutoscalerConfig, LoggingSettings};
use scaler_lib::{
    EasypanelClient, FileStateStore, RunError, RunMetrics, RunOrchestrator, RunReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-shot replica autoscaler for panel-hosted services
#[derive(Parser)]
#[command(name = "autoscaler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "AUTOSCALER_CONFIG", default_value = "services.json")]
    config: PathBuf,

    /// State directory (overrides global.state_dir)
    #[arg(long, env = "AUTOSCALER_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => ExitCode::from(err.exit_code()),
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let config = match AutoscalerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            let _ = logging::init(&LoggingSettings::default());
            error!(
                event = "config_invalid",
                path = %cli.config.display(),
                error = %err,
                "Configuration rejected"
            );
            return Err(err);
        }
    };

    if let Err(err) = logging::init(&config.logging) {
        eprintln!("autoscaler: {:#}", err);
        let _ = logging::init(&LoggingSettings::default());
    }

    info!(
        version = AUTOSCALER_VERSION,
        config = %cli.config.display(),
        api = %config.api.base_url,
        services_configured = config.services.len(),
        "Starting autoscaler run"
    );

    let state_dir = cli
        .state_dir
        .unwrap_or_else(|| config.global.state_dir.clone());

    let token = config.token().unwrap_or_default().to_string();
    let client = EasypanelClient::new(&config.api.base_url, token, config.timeout())
        .map_err(|e| RunError::Config(format!("{:#}", e)))?;
    let store = FileStateStore::open(&state_dir)
        .map_err(|e| RunError::Config(format!("{:#}", e)))?;

    let metrics = match RunMetrics::new() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let orchestrator = RunOrchestrator::new(
        Arc::new(client),
        Arc::new(store),
        config.policies(),
        config.run_settings(&state_dir),
    );

    let result = orchestrator.run().await;

    if let (Some(metrics), Some(path)) = (&metrics, &config.global.metrics_textfile) {
        match &result {
            Ok(report) => {
                metrics.record_report(report);
                export_metrics(metrics, path);
            }
            // The textfile belongs to the run holding the lock
            Err(RunError::LockHeld { .. }) => {}
            Err(_) => {
                metrics.record_failure(chrono::Utc::now());
                export_metrics(metrics, path);
            }
        }
    }

    let report = result?;
    print_summary(&report);
    Ok(())
}

fn export_metrics(metrics: &RunMetrics, path: &Path) {
    if let Err(e) = metrics.write_textfile(path) {
        warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to export metrics");
    }
}

fn print_summary(report: &RunReport) {
    let counts = report.counts();
    for outcome in report.outcomes.iter().filter(|o| o.error.is_some()) {
        warn!(
            service = %outcome.service_id,
            stage = ?outcome.stage,
            error = outcome.error.as_deref().unwrap_or_default(),
            "Service needs attention"
        );
    }
    info!(
        processed = counts.processed,
        scaled = counts.scaled_up + counts.scaled_down,
        held = counts.held + counts.ignored + counts.no_op,
        errored = counts.errored,
        warnings = report.warnings.len(),
        "Run summary"
    );
}
