//! Tunables of a split run.

use std::time::Duration;

use semver::Version;

use mitosis_shard::ProxyConfig;

/// Default ceiling of one range deletion insert, in bytes.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Default room left under the ceiling for the insert command envelope.
pub const DEFAULT_BATCH_HEADROOM_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Delivery attempts per shard command.
    pub retry_attempts: u32,
    pub refresh_timeout: Duration,
    pub command_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_batch_bytes: usize,
    pub batch_headroom_bytes: usize,
    /// Feature compatibility version the cluster must be running.
    pub required_feature_version: Version,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            refresh_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(100),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            batch_headroom_bytes: DEFAULT_BATCH_HEADROOM_BYTES,
            required_feature_version: Version::new(4, 4, 0),
        }
    }
}

impl SplitConfig {
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            max_attempts: self.retry_attempts,
            refresh_timeout: self.refresh_timeout,
            command_timeout: self.command_timeout,
            retry_backoff: self.retry_backoff,
        }
    }
}
