//! Runtime configuration for the device agent.
//!
//! Resolution order, lowest to highest precedence:
//! built-in defaults, the YAML config file, environment variables.
//! Each layer overrides the previous one key by key. Resolution never fails:
//! a source that cannot be read is skipped with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::level_filters::LevelFilter;

use crate::error::{AgentError, Result};

/// Config file used when neither `--config` nor `CONFIG_FILE` is given.
pub const DEFAULT_CONFIG_FILE: &str = "/app/config/config.yml";

pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";
pub const ENV_SITE_ID: &str = "SITE_ID";
pub const ENV_CONTROLLER_ENDPOINT: &str = "CONTROLLER_ENDPOINT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_METRICS_INTERVAL: &str = "METRICS_INTERVAL";
pub const ENV_PROMETHEUS_PORT: &str = "PROMETHEUS_PORT";

/// The fully merged configuration the agent runs with.
///
/// Integer values are kept signed and unvalidated; callers decide how to
/// interpret out-of-range values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub site_id: String,
    pub controller_endpoint: String,
    pub log_level: String,
    /// Seconds to sleep between ticks.
    pub metrics_interval: i64,
    pub prometheus_port: i64,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            site_id: "site-a".to_string(),
            controller_endpoint: "http://localhost:8080".to_string(),
            log_level: "INFO".to_string(),
            metrics_interval: 30,
            prometheus_port: 9092,
        }
    }
}

impl EffectiveConfig {
    /// Sleep between ticks. Negative intervals behave like zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval.max(0) as u64)
    }

    /// Maps the configured level name onto a tracing filter.
    ///
    /// Accepts the usual level names case-insensitively, including the
    /// `WARNING`, `CRITICAL`, `FATAL` and `NOTSET` spellings.
    pub fn level_filter(&self) -> Result<LevelFilter> {
        match self.log_level.trim().to_uppercase().as_str() {
            "TRACE" | "NOTSET" => Ok(LevelFilter::TRACE),
            "DEBUG" => Ok(LevelFilter::DEBUG),
            "INFO" => Ok(LevelFilter::INFO),
            "WARN" | "WARNING" => Ok(LevelFilter::WARN),
            "ERROR" | "CRITICAL" | "FATAL" => Ok(LevelFilter::ERROR),
            _ => Err(AgentError::Config(format!(
                "Unknown log level '{}'. Use one of DEBUG, INFO, WARNING, ERROR, CRITICAL",
                self.log_level
            ))),
        }
    }

    /// Prometheus listen port, checked against the TCP port range.
    pub fn exporter_port(&self) -> Result<u16> {
        u16::try_from(self.prometheus_port).map_err(|_| {
            AgentError::Config(format!(
                "Invalid prometheus_port {}: must be between 0 and 65535",
                self.prometheus_port
            ))
        })
    }

    fn overlay_file(&mut self, mapping: &Mapping) {
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                tracing::debug!("Ignoring non-string config key {:?}", key);
                continue;
            };

            match key {
                "site_id" => overlay_string(&mut self.site_id, key, value),
                "controller_endpoint" => overlay_string(&mut self.controller_endpoint, key, value),
                "log_level" => overlay_string(&mut self.log_level, key, value),
                "metrics_interval" => overlay_integer(&mut self.metrics_interval, key, value),
                "prometheus_port" => overlay_integer(&mut self.prometheus_port, key, value),
                other => tracing::debug!("Ignoring unknown config key '{}'", other),
            }
        }
    }
}

fn overlay_string(slot: &mut String, key: &str, value: &Value) {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            tracing::warn!("Ignoring config key '{}': expected a scalar value", key);
            return;
        }
    };
    *slot = text;
}

fn overlay_integer(slot: &mut i64, key: &str, value: &Value) {
    match value.as_i64() {
        Some(n) => *slot = n,
        None => tracing::warn!("Ignoring config key '{}': expected an integer", key),
    }
}

/// Reads the config file as a YAML mapping.
///
/// `Ok(None)` means the file does not exist. An empty document is an empty
/// mapping; any other non-mapping document is an error.
fn read_config_file(path: &Path) -> Result<Option<Mapping>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Some(Mapping::new()));
    }

    match serde_yaml::from_str::<Value>(&content)? {
        Value::Mapping(mapping) => Ok(Some(mapping)),
        Value::Null => Ok(Some(Mapping::new())),
        _ => Err(AgentError::Config(
            "expected a key/value mapping at the top level".to_string(),
        )),
    }
}

/// Merges defaults, the config file and environment overrides.
///
/// The environment is captured once at construction so resolution is
/// deterministic and can be driven from a plain map.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    env: HashMap<String, String>,
    config_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn from_env() -> Self {
        Self::new(std::env::vars())
    }

    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            config_path: None,
        }
    }

    /// Uses `path` instead of `CONFIG_FILE` when set.
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Config file location: explicit path, then `CONFIG_FILE`, then the default.
    pub fn config_path(&self) -> PathBuf {
        let raw = match &self.config_path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self
                .env
                .get(ENV_CONFIG_FILE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string()),
        };
        PathBuf::from(shellexpand::tilde(&raw).as_ref())
    }

    pub fn resolve(&self) -> EffectiveConfig {
        let mut config = EffectiveConfig::default();

        let path = self.config_path();
        match read_config_file(&path) {
            Ok(Some(mapping)) => {
                tracing::debug!("Loaded config file {}", path.display());
                config.overlay_file(&mapping);
            }
            Ok(None) => tracing::debug!("No config file at {}, using defaults", path.display()),
            Err(e) => tracing::warn!("Could not load config file {}: {}", path.display(), e),
        }

        self.overlay_env(&mut config);
        config
    }

    /// Set and non-empty environment value.
    fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn overlay_env(&self, config: &mut EffectiveConfig) {
        if let Some(v) = self.env_value(ENV_SITE_ID) {
            config.site_id = v.to_string();
        }
        if let Some(v) = self.env_value(ENV_CONTROLLER_ENDPOINT) {
            config.controller_endpoint = v.to_string();
        }
        if let Some(v) = self.env_value(ENV_LOG_LEVEL) {
            config.log_level = v.to_string();
        }

        // Unparseable integers keep the previous value.
        if let Some(n) = self.env_integer(ENV_METRICS_INTERVAL) {
            config.metrics_interval = n;
        }
        if let Some(n) = self.env_integer(ENV_PROMETHEUS_PORT) {
            config.prometheus_port = n;
        }
    }

    fn env_integer(&self, name: &str) -> Option<i64> {
        self.env_value(name).and_then(|v| v.trim().parse().ok())
    }
}
