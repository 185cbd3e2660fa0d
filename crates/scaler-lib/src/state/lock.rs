//! Run-level lock file
//!
//! A run holds `<state_dir>/.autoscaler.lock` for its whole duration. The
//! file is created with exclusive-create semantics, so two processes can
//! never both succeed. A lock left behind by a crashed run is broken once it
//! is older than the configured staleness limit. Breaking and releasing only
//! ever remove a lock whose contents match the expected holder.

use crate::error::RunError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Lock file name inside the state directory
pub const LOCK_FILE_NAME: &str = ".autoscaler.lock";

/// Default age after which a lock is considered abandoned (1 hour)
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

static BREAK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Held run lock, released on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Acquire the run lock in `dir`
    ///
    /// Fails with [`RunError::LockHeld`] when another live run holds it.
    pub fn acquire(
        dir: &Path,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, RunError> {
        let path = dir.join(LOCK_FILE_NAME);
        fs::create_dir_all(dir).map_err(|source| RunError::Lock {
            path: path.clone(),
            source,
        })?;

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: now,
        };

        // Second attempt only happens after breaking a stale lock.
        for _ in 0..2 {
            match create_exclusive(&path, &info) {
                Ok(()) => {
                    debug!(path = %path.display(), "Run lock acquired");
                    return Ok(Self { path, info });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    let age = now.signed_duration_since(holder.acquired_at);
                    let stale = age
                        .to_std()
                        .map(|age| age >= stale_after)
                        .unwrap_or(false);

                    if !stale {
                        return Err(RunError::LockHeld {
                            path,
                            pid: holder.pid,
                            since: holder.acquired_at.to_rfc3339(),
                        });
                    }

                    break_stale(&path, &holder)?;
                }
                Err(source) => return Err(RunError::Lock { path, source }),
            }
        }

        let holder = read_holder(&path);
        Err(RunError::LockHeld {
            path,
            pid: holder.pid,
            since: holder.acquired_at.to_rfc3339(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // A lock broken as stale may since belong to another run.
        if read_info(&self.path).as_ref() != Some(&self.info) {
            warn!(
                path = %self.path.display(),
                pid = self.info.pid,
                "Run lock no longer owned by this run, leaving it in place"
            );
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Run lock released"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove run lock"
            ),
        }
    }
}

/// Move a stale lock aside and delete it, unless another process replaced it
/// in the meantime, in which case it is put back.
fn break_stale(path: &Path, holder: &LockInfo) -> Result<(), RunError> {
    let aside = path.with_file_name(format!(
        "{}.stale-{}-{}",
        LOCK_FILE_NAME,
        std::process::id(),
        BREAK_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else broke it first
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(RunError::Lock {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    if read_holder(&aside) != *holder {
        // Fresh lock taken between our check and the rename. Linking fails
        // when yet another lock appeared, which is just as good.
        let restored = fs::hard_link(&aside, path);
        let _ = fs::remove_file(&aside);
        debug!(
            path = %path.display(),
            restored = restored.is_ok(),
            "Run lock changed hands while breaking"
        );
        return Ok(());
    }

    warn!(
        event = "stale_lock_broken",
        path = %path.display(),
        holder_pid = holder.pid,
        acquired_at = %holder.acquired_at,
        "Removing run lock left behind by an earlier run"
    );
    fs::remove_file(&aside).map_err(|source| RunError::Lock {
        path: aside.clone(),
        source,
    })
}

fn create_exclusive(path: &Path, info: &LockInfo) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let json = serde_json::to_vec(info)?;
    file.write_all(&json)?;
    file.sync_all()
}

/// Read the lock holder, falling back to the file's mtime when the contents
/// are unreadable (e.g. a crash between create and write)
fn read_holder(path: &Path) -> LockInfo {
    if let Some(info) = read_info(path) {
        return info;
    }

    let acquired_at = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    LockInfo {
        pid: 0,
        acquired_at,
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    fs::read(path)
        .ok()
        .and_then(|data| serde_json::from_slice(&data).ok())
}
