//! Client configuration.

use std::time::Duration;

use rampkit_agent::{FlowConfig, TransportConfig};
use rampkit_state::CacheConfig;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration for [`crate::RampClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfig {
    pub transport: TransportConfig,

    pub flow: FlowConfig,

    pub cache: CacheConfig,

    /// Retry policy for indexed-store reads.
    pub retry: RetryPolicy,

    /// How long to wait for the agent to push payments after opening the
    /// collection surface.
    pub metadata_timeout_ms: u64,

    /// Cache polling interval used alongside push delivery.
    pub metadata_poll_interval_ms: u64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            flow: FlowConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            metadata_timeout_ms: 60_000,
            metadata_poll_interval_ms: 250,
        }
    }
}

impl RampConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn metadata_poll_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_poll_interval_ms.max(1))
    }

    pub fn with_flow(mut self, flow: FlowConfig) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metadata_timeout_ms(mut self, ms: u64) -> Self {
        self.metadata_timeout_ms = ms;
        self
    }

    pub fn with_metadata_poll_interval_ms(mut self, ms: u64) -> Self {
        self.metadata_poll_interval_ms = ms;
        self
    }

    /// Log every agent message.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.transport.debug = debug;
        self
    }
}
