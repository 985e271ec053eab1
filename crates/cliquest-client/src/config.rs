//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client runs with zero configuration.

use std::time::Duration;

use cliquest_shared::constants::{
    DEFAULT_AVATAR_SERVICE, DEFAULT_STORAGE_QUOTA, MAX_UPLOAD_SIZE, SEARCH_DEBOUNCE_MS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Input inactivity before a search runs.
    /// Env: `CLIQUEST_SEARCH_DEBOUNCE_MS`
    /// Default: `300`
    pub search_debounce: Duration,

    /// Storage available to one project, in bytes.
    /// Env: `CLIQUEST_STORAGE_QUOTA_BYTES`
    /// Default: 1 GiB
    pub storage_quota_bytes: u64,

    /// Largest single upload, in bytes.
    /// Env: `CLIQUEST_MAX_UPLOAD_BYTES`
    /// Default: 50 MiB
    pub max_upload_bytes: u64,

    /// Base URL of the generated-avatar service.
    /// Env: `CLIQUEST_AVATAR_SERVICE`
    pub avatar_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            search_debounce: Duration::from_millis(SEARCH_DEBOUNCE_MS),
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA,
            max_upload_bytes: MAX_UPLOAD_SIZE,
            avatar_service: DEFAULT_AVATAR_SERVICE.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; invalid values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("CLIQUEST_SEARCH_DEBOUNCE_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.search_debounce = Duration::from_millis(ms),
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid CLIQUEST_SEARCH_DEBOUNCE_MS, using default"),
            }
        }

        if let Some(raw) = lookup("CLIQUEST_STORAGE_QUOTA_BYTES") {
            match raw.trim().parse::<u64>() {
                Ok(bytes) => config.storage_quota_bytes = bytes,
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid CLIQUEST_STORAGE_QUOTA_BYTES, using default"),
            }
        }

        if let Some(raw) = lookup("CLIQUEST_MAX_UPLOAD_BYTES") {
            match raw.trim().parse::<u64>() {
                Ok(bytes) if bytes > 0 => config.max_upload_bytes = bytes,
                _ => tracing::warn!(value = %raw, "Invalid CLIQUEST_MAX_UPLOAD_BYTES, using default"),
            }
        }

        if let Some(url) = lookup("CLIQUEST_AVATAR_SERVICE") {
            if !url.trim().is_empty() {
                config.avatar_service = url.trim().to_string();
            }
        }

        config
    }
}
