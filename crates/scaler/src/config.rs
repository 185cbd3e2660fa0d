//! Autoscaler configuration
//!
//! A JSON file (default `services.json`) with `api`, `global` and `logging`
//! sections. Every other top-level key is a service id (`project_service`)
//! holding that service's scaling limits. `EASYPANEL_API_URL` and
//! `EASYPANEL_API_TOKEN` override the file, and `AUTOSCALER__SECTION__KEY`
//! variables override individual settings.

use scaler_lib::decision::EngineSettings;
use scaler_lib::{RetryPolicy, RunError, RunSettings, ScalingConfig, ScalingPolicies};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub global: GlobalSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Per-service limits keyed by service id
    #[serde(flatten)]
    pub services: HashMap<String, ScalingConfig>,
}

/// Platform API connection
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Run-wide behavior
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSettings {
    /// Never scale services that publish ports
    #[serde(default = "default_true")]
    pub ignore_exposed: bool,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// CPU samples kept per service for smoothing
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Age after which a leftover run lock is broken
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Node exporter textfile to write run gauges to
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            ignore_exposed: true,
            cooldown_secs: default_cooldown_secs(),
            history_size: default_history_size(),
            max_concurrency: default_max_concurrency(),
            state_dir: default_state_dir(),
            lock_stale_secs: default_lock_stale_secs(),
            retry: RetrySettings::default(),
            metrics_textfile: None,
        }
    }
}

/// Scale call retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_history_size() -> usize {
    scaler_lib::history::DEFAULT_HISTORY_SIZE
}

fn default_max_concurrency() -> usize {
    scaler_lib::orchestrator::DEFAULT_MAX_CONCURRENCY
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_lock_stale_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn config_error(err: impl std::fmt::Display) -> RunError {
    RunError::Config(err.to_string())
}

impl AutoscalerConfig {
    /// Load from `path` and the process environment
    pub fn load(path: &Path) -> Result<Self, RunError> {
        Self::load_with_overrides(
            path,
            std::env::var("EASYPANEL_API_URL").ok(),
            std::env::var("EASYPANEL_API_TOKEN").ok(),
        )
    }

    /// Load from `path` with explicit API overrides. A missing file yields
    /// the defaults.
    pub fn load_with_overrides(
        path: &Path,
        api_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self, RunError> {
        let api_url = api_url.filter(|s| !s.trim().is_empty());
        let api_token = api_token.filter(|s| !s.trim().is_empty());

        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("AUTOSCALER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("api.base_url", api_url)
            .map_err(config_error)?
            .set_override_option("api.token", api_token)
            .map_err(config_error)?
            .build()
            .map_err(|e| RunError::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| RunError::Config(format!("invalid configuration: {}", e)))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the run cannot work with
    pub fn validate(&self) -> Result<(), RunError> {
        if self.token().is_none() {
            return Err(RunError::Config(
                "API token missing: set api.token or EASYPANEL_API_TOKEN".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(config_error("api.timeout_secs must be positive"));
        }
        if self.global.history_size == 0 {
            return Err(config_error("global.history_size must be at least 1"));
        }
        if self.global.max_concurrency == 0 {
            return Err(config_error("global.max_concurrency must be at least 1"));
        }
        if self.global.retry.max_attempts == 0 {
            return Err(config_error("global.retry.max_attempts must be at least 1"));
        }

        self.policies().validate().map_err(config_error)
    }

    /// Non-empty API token
    pub fn token(&self) -> Option<&str> {
        self.api
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn policies(&self) -> ScalingPolicies {
        let mut policies = ScalingPolicies::new(ScalingConfig::default());
        for (id, config) in &self.services {
            policies.insert(id.clone(), config.clone());
        }
        policies
    }

    pub fn run_settings(&self, state_dir: &Path) -> RunSettings {
        let retry = &self.global.retry;
        RunSettings {
            engine: EngineSettings {
                ignore_exposed: self.global.ignore_exposed,
                cooldown: Duration::from_secs(self.global.cooldown_secs),
            },
            history_size: self.global.history_size,
            max_concurrency: self.global.max_concurrency,
            lock_dir: Some(state_dir.to_path_buf()),
            lock_stale_after: Duration::from_secs(self.global.lock_stale_secs),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                initial_backoff: Duration::from_millis(retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(retry.max_backoff_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("services.json");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_with_env_token_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");

        let config =
            AutoscalerConfig::load_with_overrides(&path, None, Some("tok".into())).unwrap();

        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.token(), Some("tok"));
        assert!(config.global.ignore_exposed);
        assert_eq!(config.global.cooldown_secs, 300);
        assert_eq!(config.global.history_size, 5);
        assert_eq!(config.global.max_concurrency, 4);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_full_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "api": {"base_url": "https://panel.example.com", "token": "file-token"},
                "global": {"ignore_exposed": false, "cooldown_secs": 120, "retry": {"max_attempts": 5}},
                "logging": {"level": "debug", "format": "json"},
                "shop_web": {"min": 2, "max": 6, "up": 75, "down": 25},
                "shop_db": {"ignore": true}
            }"#,
        );

        let config = AutoscalerConfig::load_with_overrides(&path, None, None).unwrap();

        assert_eq!(config.api.base_url, "https://panel.example.com");
        assert_eq!(config.token(), Some("file-token"));
        assert!(!config.global.ignore_exposed);
        assert_eq!(config.global.retry.max_attempts, 5);
        assert_eq!(config.global.retry.initial_backoff_ms, 500);
        assert_eq!(config.logging.format, LogFormat::Json);

        let policies = config.policies();
        let web = policies.for_service("shop_web");
        assert_eq!((web.min, web.max), (2, 6));
        assert_eq!(web.up, 75.0);
        assert!(policies.for_service("shop_db").ignore);
        assert_eq!(policies.for_service("shop_api"), &ScalingConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"api": {"base_url": "http://file:3000", "token": "file-token"}}"#,
        );

        let config = AutoscalerConfig::load_with_overrides(
            &path,
            Some("http://env:3000".into()),
            Some("env-token".into()),
        )
        .unwrap();

        assert_eq!(config.api.base_url, "http://env:3000");
        assert_eq!(config.token(), Some("env-token"));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"api": {"token": "  "}}"#);

        let err = AutoscalerConfig::load_with_overrides(&path, None, None).unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_inverted_thresholds_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"shop_web": {"up": 30, "down": 60}}"#);

        let err =
            AutoscalerConfig::load_with_overrides(&path, None, Some("tok".into())).unwrap_err();
        assert!(err.to_string().contains("shop_web"));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{ not json");

        let err =
            AutoscalerConfig::load_with_overrides(&path, None, Some("tok".into())).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_run_settings_mapping() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"global": {"cooldown_secs": 60, "max_concurrency": 2, "lock_stale_secs": 90}}"#,
        );
        let config =
            AutoscalerConfig::load_with_overrides(&path, None, Some("tok".into())).unwrap();

        let settings = config.run_settings(dir.path());
        assert_eq!(settings.engine.cooldown, Duration::from_secs(60));
        assert_eq!(settings.max_concurrency, 2);
        assert_eq!(settings.lock_stale_after, Duration::from_secs(90));
        assert_eq!(settings.lock_dir.as_deref(), Some(dir.path()));
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(500));
    }
}
