//! Runtime configuration.
//!
//! Note: `api_token` is masked in `Debug` output so it never ends up in logs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use proctor_core::config::EngineConfig;

/// A configuration value the engine cannot run with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("violation_limit must be at least 1")]
    ZeroViolationLimit,

    #[error("tick_ms must be greater than zero")]
    ZeroTick,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("base_url must start with http:// or https://, got '{0}'")]
    InvalidBaseUrl(String),
}

/// Top-level proctor configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProctorConfig {
    /// Root URL of the exam backend. Unset means local-only operation.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token sent with every backend request.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory of the durable key/value store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where local runs write delivered results.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Question bank file or directory used when no backend is configured.
    #[serde(default)]
    pub bank: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl std::fmt::Debug for ProctorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProctorConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("data_dir", &self.data_dir)
            .field("results_dir", &self.results_dir)
            .field("bank", &self.bank)
            .field("engine", &self.engine)
            .finish()
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".proctor")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("./proctor-results")
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: default_timeout_secs(),
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            bank: None,
            engine: EngineSettings::default(),
        }
    }
}

/// Engine timings as written in TOML: whole seconds or milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub violation_limit: u32,
    pub warning_freeze_secs: u64,
    pub reentrancy_window_ms: u64,
    pub review_grace_ms: u64,
    pub retry_interval_ms: u64,
    pub offline_poll_ms: u64,
    pub tamper_check_interval_secs: u64,
    pub inactivity_threshold_secs: u64,
    pub inactivity_check_interval_secs: u64,
    pub resize_threshold_px: u32,
    pub desktop: bool,
    pub default_question_timeout_secs: u64,
    pub tick_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            violation_limit: engine.violation_limit,
            warning_freeze_secs: engine.warning_freeze.as_secs(),
            reentrancy_window_ms: engine.reentrancy_window.as_millis() as u64,
            review_grace_ms: engine.review_grace.as_millis() as u64,
            retry_interval_ms: engine.retry_interval.as_millis() as u64,
            offline_poll_ms: engine.offline_poll.as_millis() as u64,
            tamper_check_interval_secs: engine.tamper_check_interval.as_secs(),
            inactivity_threshold_secs: engine.inactivity_threshold.as_secs(),
            inactivity_check_interval_secs: engine.inactivity_check_interval.as_secs(),
            resize_threshold_px: engine.resize_threshold_px,
            desktop: engine.desktop,
            default_question_timeout_secs: engine.default_question_timeout_secs,
            tick_ms: engine.tick.as_millis() as u64,
        }
    }
}

impl EngineSettings {
    /// Check the settings and convert them for the engine.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.violation_limit == 0 {
            return Err(ConfigError::ZeroViolationLimit);
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        for (name, value) in [
            ("retry_interval_ms", self.retry_interval_ms),
            ("offline_poll_ms", self.offline_poll_ms),
            ("tamper_check_interval_secs", self.tamper_check_interval_secs),
            ("inactivity_check_interval_secs", self.inactivity_check_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        Ok(EngineConfig {
            violation_limit: self.violation_limit,
            warning_freeze: Duration::from_secs(self.warning_freeze_secs),
            reentrancy_window: Duration::from_millis(self.reentrancy_window_ms),
            review_grace: Duration::from_millis(self.review_grace_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            offline_poll: Duration::from_millis(self.offline_poll_ms),
            tamper_check_interval: Duration::from_secs(self.tamper_check_interval_secs),
            inactivity_threshold: Duration::from_secs(self.inactivity_threshold_secs),
            inactivity_check_interval: Duration::from_secs(self.inactivity_check_interval_secs),
            resize_threshold_px: self.resize_threshold_px,
            desktop: self.desktop,
            default_question_timeout_secs: self.default_question_timeout_secs,
            tick: Duration::from_millis(self.tick_ms),
        })
    }
}

impl ProctorConfig {
    /// Validate backend settings. Engine settings are checked by
    /// [`EngineSettings::to_engine_config`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidBaseUrl(url.clone()));
            }
        }
        self.engine.to_engine_config().map(|_| ())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| resolve_env_vars(&v))
        .filter(|v| !v.trim().is_empty())
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `proctor.toml` in the current directory
/// 2. `~/.config/proctor/config.toml`
///
/// Environment variable overrides: `PROCTOR_BASE_URL`, `PROCTOR_API_TOKEN`.
pub fn load_config() -> Result<ProctorConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ProctorConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("proctor.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ProctorConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ProctorConfig::default(),
    };

    if let Ok(url) = std::env::var("PROCTOR_BASE_URL") {
        config.base_url = Some(url);
    }
    if let Ok(token) = std::env::var("PROCTOR_API_TOKEN") {
        config.api_token = Some(token);
    }

    config.base_url = resolve_optional(config.base_url.take());
    config.api_token = resolve_optional(config.api_token.take());

    config
        .validate()
        .with_context(|| match &config_path {
            Some(path) => format!("invalid config: {}", path.display()),
            None => "invalid config".to_string(),
        })?;

    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("proctor"))
}
