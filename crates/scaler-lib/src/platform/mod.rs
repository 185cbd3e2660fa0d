//! Platform API access
//!
//! [`PlatformApi`] is the only seam between the autoscaler and the hosting
//! platform. [`EasypanelClient`] talks to the real tRPC endpoints; tests plug
//! in in-memory fakes.

mod http;

pub use http::EasypanelClient;

use crate::error::PlatformError;
use crate::models::{ServiceProbe, ServiceRecord};
use serde_json::Value;
use tracing::warn;

pub use async_trait::async_trait;

/// Operations the autoscaler needs from the platform
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Raw project and service listing, envelope included
    async fn fetch_catalog(&self) -> Result<Value, PlatformError>;

    /// Live CPU utilization of one service, `None` when not reported
    async fn cpu_percent(&self, project: &str, service: &str)
        -> Result<Option<f64>, PlatformError>;

    /// Replica count currently deployed, `None` when not reported
    async fn current_replicas(
        &self,
        project: &str,
        service: &str,
    ) -> Result<Option<u32>, PlatformError>;

    /// Whether the service publishes at least one port
    async fn exposed_ports(&self, project: &str, service: &str) -> Result<bool, PlatformError>;

    /// Set the desired replica count
    async fn scale(&self, project: &str, service: &str, replicas: u32)
        -> Result<(), PlatformError>;
}

/// Fetch the live fields a catalog record is missing
///
/// Best effort: a failed endpoint leaves its field absent and is logged, so
/// the decision engine falls back to a hold.
pub async fn probe_service(
    api: &dyn PlatformApi,
    record: &ServiceRecord,
    ignore_exposed: bool,
) -> ServiceProbe {
    let mut probe = ServiceProbe::default();

    if record.cpu_percent.is_none() {
        match api.cpu_percent(&record.project, &record.name).await {
            Ok(cpu) => probe.cpu_percent = cpu,
            Err(e) => probe_failed(record, "cpu", &e),
        }
    }

    if record.current_replicas.is_none() {
        match api.current_replicas(&record.project, &record.name).await {
            Ok(replicas) => probe.replicas = replicas,
            Err(e) => probe_failed(record, "replicas", &e),
        }
    }

    if ignore_exposed && record.exposed_ports.is_none() {
        match api.exposed_ports(&record.project, &record.name).await {
            Ok(exposed) => probe.exposed_ports = Some(exposed),
            Err(e) => probe_failed(record, "exposed_ports", &e),
        }
    }

    probe
}

fn probe_failed(record: &ServiceRecord, field: &str, error: &PlatformError) {
    warn!(
        event = "probe_failed",
        service = %record.id,
        field = field,
        error = %error,
        "Live lookup failed, leaving field unknown"
    );
}
