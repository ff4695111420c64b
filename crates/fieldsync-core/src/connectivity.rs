//! Connectivity signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::OfflineConfig;
use crate::error::{Error, Result};
use crate::util::compact_text;

/// One-shot "is the device online" query
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity controlled by a flag (tests, forced offline mode)
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Connectivity decided by probing an HTTP endpoint
#[derive(Clone)]
pub struct HttpConnectivity {
    probe_url: String,
    client: reqwest::Client,
}

impl HttpConnectivity {
    pub fn new(probe_url: impl Into<String>, config: &OfflineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.connectivity_timeout())
            .build()
            .map_err(|error| Error::Config(format!("failed to build probe HTTP client: {error}")))?;
        Ok(Self {
            probe_url: probe_url.into(),
            client,
        })
    }

    /// Build from config when a probe URL is configured
    pub fn from_config(config: &OfflineConfig) -> Result<Option<Self>> {
        config
            .connectivity_probe_url
            .as_deref()
            .map(|url| Self::new(url, config))
            .transpose()
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.probe_url).send().await {
            Ok(response) => {
                // Any HTTP answer means the network path works
                tracing::debug!("Connectivity probe answered {}", response.status());
                true
            }
            Err(error) => {
                tracing::debug!(
                    "Connectivity probe failed: {}",
                    compact_text(&error.to_string())
                );
                false
            }
        }
    }
}

/// Wraps a real signal with a switch that forces the device offline
pub struct SimulatedConnectivity {
    inner: Arc<dyn Connectivity>,
    forced_offline: AtomicBool,
}

impl SimulatedConnectivity {
    pub fn new(inner: Arc<dyn Connectivity>) -> Self {
        Self {
            inner,
            forced_offline: AtomicBool::new(false),
        }
    }

    pub fn force_offline(&self, offline: bool) {
        self.forced_offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_forced_offline(&self) -> bool {
        self.forced_offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connectivity for SimulatedConnectivity {
    async fn is_online(&self) -> bool {
        !self.is_forced_offline() && self.inner.is_online().await
    }
}
