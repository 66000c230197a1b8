//! Runtime configuration.
//!
//! Values come from JSON, from `SHELFSYNC_*` environment variables (a `.env`
//! file is honoured), or from defaults.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::EventKind;

pub const ENV_API_BASE_URL: &str = "SHELFSYNC_API_BASE_URL";
pub const ENV_NAMESPACE: &str = "SHELFSYNC_NAMESPACE";
pub const ENV_DISMISS_AFTER_MS: &str = "SHELFSYNC_DISMISS_AFTER_MS";
pub const ENV_RECONNECT_BASE_MS: &str = "SHELFSYNC_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_MS: &str = "SHELFSYNC_RECONNECT_MAX_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "SHELFSYNC_MAX_RECONNECT_ATTEMPTS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SHELFSYNC_CONNECT_TIMEOUT_MS";
pub const ENV_STALE_AFTER_MS: &str = "SHELFSYNC_STALE_AFTER_MS";
pub const ENV_VISIBLE_KINDS: &str = "SHELFSYNC_VISIBLE_KINDS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read env file: {0}")]
    EnvFile(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the library API, e.g. `https://library.example.com/api`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Push namespace appended to the base URL.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// How long a notification stays current before it is auto-dismissed.
    #[serde(default = "default_dismiss_after_ms")]
    pub dismiss_after_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// `None` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Freshness window for entries written by the data-fetch layer.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Event kinds that also produce a user-facing notification.
    #[serde(default = "default_visible_kinds")]
    pub visible_kinds: Vec<EventKind>,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_namespace() -> String {
    "/notifications".to_string()
}
fn default_dismiss_after_ms() -> u64 { 5_000 }
fn default_reconnect_base_ms() -> u64 { 1_000 }
fn default_reconnect_max_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_stale_after_ms() -> u64 { 60_000 }
fn default_visible_kinds() -> Vec<EventKind> {
    vec![EventKind::Notification, EventKind::BorrowUpdate]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            namespace: default_namespace(),
            dismiss_after_ms: default_dismiss_after_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            stale_after_ms: default_stale_after_ms(),
            visible_kinds: default_visible_kinds(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment after applying `.env`, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a dotenv-style file only; the process environment is ignored.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut vars = HashMap::new();
        let iter = dotenvy::from_path_iter(path.as_ref())
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::EnvFile(e.to_string()))?;
            vars.insert(key, value);
        }
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a config from an arbitrary key lookup. Unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get(ENV_API_BASE_URL) {
            config.api_base_url = url;
        }
        if let Some(namespace) = get(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        if let Some(raw) = get(ENV_DISMISS_AFTER_MS) {
            config.dismiss_after_ms = parse_number(ENV_DISMISS_AFTER_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_RECONNECT_BASE_MS) {
            config.reconnect_base_ms = parse_number(ENV_RECONNECT_BASE_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_RECONNECT_MAX_MS) {
            config.reconnect_max_ms = parse_number(ENV_RECONNECT_MAX_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_RECONNECT_ATTEMPTS) {
            config.max_reconnect_attempts = Some(parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &raw)?);
        }
        if let Some(raw) = get(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_STALE_AFTER_MS) {
            config.stale_after_ms = parse_number(ENV_STALE_AFTER_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_VISIBLE_KINDS) {
            config.visible_kinds = parse_kinds(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: ENV_API_BASE_URL,
                value: self.api_base_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.dismiss_after_ms == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_DISMISS_AFTER_MS,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::Invalid {
                key: ENV_RECONNECT_BASE_MS,
                value: self.reconnect_base_ms.to_string(),
                reason: format!("exceeds {ENV_RECONNECT_MAX_MS} ({})", self.reconnect_max_ms),
            });
        }
        Ok(())
    }

    /// Full push endpoint, `{api_base_url}{namespace}`.
    pub fn endpoint(&self) -> String {
        let base = self.api_base_url.trim().trim_end_matches('/');
        let namespace = self.namespace.trim().trim_start_matches('/');
        if namespace.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{namespace}")
        }
    }

    pub fn dismiss_after(&self) -> Duration {
        Duration::from_millis(self.dismiss_after_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn is_visible(&self, kind: EventKind) -> bool {
        self.visible_kinds.contains(&kind)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Comma-separated kinds; `none` disables notifications for push events.
fn parse_kinds(raw: &str) -> Result<Vec<EventKind>, ConfigError> {
    if raw.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind = part.parse::<EventKind>().map_err(|e| ConfigError::Invalid {
            key: ENV_VISIBLE_KINDS,
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}
