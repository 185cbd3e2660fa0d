//! File-backed per-service state store
//!
//! One JSON document per service under the state directory. Writes go to a
//! temporary file that is synced and then renamed over the record, so a crash
//! mid-write leaves either the old or the new record, never a torn one.

use crate::error::StateError;
use crate::models::{CpuSample, ServiceState};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Persistence of [`ServiceState`] keyed by service id
pub trait StateStore: Send + Sync {
    /// Load the state for a service. Missing or unreadable records yield the
    /// default state.
    fn load(&self, service_id: &str) -> ServiceState;

    /// Durably replace the state for a service
    fn save(&self, service_id: &str, state: &ServiceState) -> Result<(), StateError>;
}

/// State store writing one JSON file per service
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStateStore {
    /// Open (and create if needed) a state directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;

        Ok(Self {
            dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the durable record for a service
    pub fn path_for(&self, service_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(service_id)))
    }

    fn temp_path_for(&self, service_id: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}.json.tmp-{}-{}",
            file_stem(service_id),
            std::process::id(),
            n
        ))
    }

    fn write_atomically(&self, path: &Path, temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(temp_path, path)
    }

    /// Import `<id>.last` / `<id>.cpu` files written by the previous
    /// generation of the autoscaler
    fn load_legacy(&self, service_id: &str) -> Option<ServiceState> {
        let stem = file_stem(service_id);
        let last_path = self.dir.join(format!("{}.last", stem));
        let cpu_path = self.dir.join(format!("{}.cpu", stem));

        let last_scale_at = fs::read_to_string(&last_path)
            .ok()
            .and_then(|s| parse_legacy_timestamp(s.trim()));

        let cpu_sample = fs::read_to_string(&cpu_path).ok().and_then(|s| {
            let cpu = s.trim().parse::<f64>().ok()?;
            let modified = fs::metadata(&cpu_path).ok()?.modified().ok()?;
            Some(CpuSample {
                at: DateTime::<Utc>::from(modified),
                cpu_percent: Some(cpu),
            })
        });

        if last_scale_at.is_none() && cpu_sample.is_none() {
            return None;
        }

        let mut state = ServiceState {
            last_scale_at,
            ..Default::default()
        };
        if let Some(sample) = cpu_sample {
            state.cpu_history.push(sample, 1);
        }

        info!(
            service = %service_id,
            last_scale_at = ?state.last_scale_at,
            "Imported legacy state files"
        );
        Some(state)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, service_id: &str) -> ServiceState {
        let path = self.path_for(service_id);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(service = %service_id, "No prior state, starting fresh");
                return self.load_legacy(service_id).unwrap_or_default();
            }
            Err(e) => {
                warn!(
                    event = "state_unreadable",
                    service = %service_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to read state, treating service as new"
                );
                return ServiceState::default();
            }
        };

        match serde_json::from_slice::<ServiceState>(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    event = "state_corrupted",
                    service = %service_id,
                    path = %path.display(),
                    error = %e,
                    "Corrupted state record, resetting to defaults"
                );
                ServiceState::default()
            }
        }
    }

    fn save(&self, service_id: &str, state: &ServiceState) -> Result<(), StateError> {
        let path = self.path_for(service_id);
        let temp_path = self.temp_path_for(service_id);

        let json = serde_json::to_vec_pretty(state).map_err(|source| StateError::Serialize {
            service_id: service_id.to_string(),
            source,
        })?;

        if let Err(source) = self.write_atomically(&path, &temp_path, &json) {
            let _ = fs::remove_file(&temp_path);
            return Err(StateError::Write {
                service_id: service_id.to_string(),
                path,
                source,
            });
        }

        debug!(service = %service_id, path = %path.display(), "State saved");
        Ok(())
    }
}

/// Map a service id onto a safe file name
fn file_stem(service_id: &str) -> String {
    service_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Parse RFC 3339 or a naive local ISO timestamp
fn parse_legacy_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
