//! Error taxonomy for the autoscaler core
//!
//! Only [`RunError`] is allowed to abort a run. Everything else is caught at
//! the per-service boundary and recorded in the run report.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the platform API client
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PlatformError {
    /// Whether retrying the same call may succeed.
    ///
    /// Connectivity problems, timeouts, 5xx, 408 and 429 are transient.
    /// Authentication, validation and decode failures are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Connect(_) | PlatformError::Timeout => true,
            PlatformError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            PlatformError::Decode(_) | PlatformError::InvalidRequest(_) => false,
        }
    }
}

/// Errors from the state store
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to write state for {service_id} at {path}: {source}")]
    Write {
        service_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state for {service_id}: {source}")]
    Serialize {
        service_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a scaling action after the executor's retry policy
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("permanent failure after {attempts} attempt(s): {error}")]
    Permanent { attempts: u32, error: PlatformError },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: PlatformError },
}

impl ActionError {
    pub fn attempts(&self) -> u32 {
        match self {
            ActionError::Permanent { attempts, .. } | ActionError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Fatal errors that abort a whole run before any state mutation
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to fetch service catalog: {0}")]
    Catalog(#[source] PlatformError),

    #[error("another run is still active (lock {path} held by pid {pid} since {since})")]
    LockHeld {
        path: PathBuf,
        pid: u32,
        since: String,
    },

    #[error("failed to acquire run lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Process exit code for this fatal condition
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Catalog(_) => 1,
            RunError::Config(_) => 2,
            RunError::LockHeld { .. } | RunError::Lock { .. } => 3,
        }
    }
}
