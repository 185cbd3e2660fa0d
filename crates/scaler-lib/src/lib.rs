//! Core library for the panel replica autoscaler
//!
//! This crate provides the decision-and-state engine for one autoscaler run:
//! - Catalog normalization of the platform's project/service listing
//! - Bounded CPU history and smoothing
//! - Durable per-service state with crash-safe writes
//! - Hysteresis decision engine with cooldown
//! - Scale action execution with retry and idempotency
//! - Run orchestration with bounded concurrency and a run lock

pub mod catalog;
pub mod clock;
pub mod decision;
pub mod error;
pub mod executor;
pub mod history;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod state;

pub use clock::{Clock, FixedClock, SystemClock};
pub use decision::{DecisionEngine, EngineSettings};
pub use error::{ActionError, PlatformError, RunError, StateError};
pub use executor::{ActionExecutor, ActionOutcome, RetryPolicy};
pub use models::*;
pub use observability::{RunMetrics, StructuredLogger};
pub use orchestrator::{RunOrchestrator, RunSettings, ScalingPolicies};
pub use platform::{probe_service, EasypanelClient, PlatformApi};
pub use report::{FailureStage, OutcomeStatus, RunCounts, RunReport, ServiceOutcome};
pub use state::{FileStateStore, RunLock, StateStore};
