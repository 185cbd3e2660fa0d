//! Durable state between runs
//!
//! This module provides:
//! - A file-backed per-service state store with atomic writes
//! - Corruption-tolerant loading and import of the legacy state layout
//! - The run lock that keeps overlapping invocations apart

mod lock;
mod store;

pub use lock::{LockInfo, RunLock, DEFAULT_LOCK_STALE_AFTER, LOCK_FILE_NAME};
pub use store::{FileStateStore, StateStore};
