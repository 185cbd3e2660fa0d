//! Normalization of the platform's service catalog
//!
//! This module provides:
//! - Shape detection for the project listing (list, single project, keyed map)
//! - The ordered field candidate policy for CPU, replicas and ports
//! - Per-fragment error isolation with recorded warnings

pub mod fields;
mod normalizer;

#[cfg(test)]
mod tests;

pub use fields::{
    cpu_percent, exposed_ports, replica_count, unwrap_envelope, CPU_FIELD_CANDIDATES,
    EXPOSED_PORT_FIELD_CANDIDATES, REPLICA_FIELD_CANDIDATES,
};
pub use normalizer::{normalize, CatalogShape, NormalizationWarning, NormalizedCatalog};
