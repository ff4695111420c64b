//! Offline subsystem configuration.
//!
//! Every field has a default so an empty JSON object is a valid config.
//! Unknown fields are rejected to catch typos in hand-edited files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_CONNECTIVITY_TIMEOUT_SECS: u64 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct OfflineConfig {
    /// Attempts after which an item counts as failed
    pub max_retries: u32,
    /// Back-off after the first failure; doubles per further failure
    pub retry_base_delay_ms: u64,
    /// Upper bound for the back-off window
    pub retry_max_delay_ms: u64,
    /// Check set/update items against the server copy while draining
    pub detect_conflicts_on_drain: bool,
    /// Resolved conflict records kept for auditing
    pub history_limit: usize,
    /// Optional URL probed to decide whether the device is online
    pub connectivity_probe_url: Option<String>,
    pub connectivity_timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            detect_conflicts_on_drain: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            connectivity_probe_url: None,
            connectivity_timeout_secs: DEFAULT_CONNECTIVITY_TIMEOUT_SECS,
        }
    }
}

impl OfflineConfig {
    /// Parse and validate a JSON config payload
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validated()
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let payload = std::fs::read_to_string(path)?;
        Self::from_json_str(&payload)
    }

    /// Normalize optional values and reject inconsistent settings
    pub fn validated(mut self) -> Result<Self> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(Error::Config(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }

        self.connectivity_probe_url = normalize_text_option(self.connectivity_probe_url);
        if let Some(url) = &self.connectivity_probe_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "connectivity_probe_url must include http:// or https://".to_string(),
                ));
            }
        }
        Ok(self)
    }

    /// Back-off window after `retry_count` failed attempts
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry_count - 1).min(32);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    pub const fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity_timeout_secs)
    }
}
