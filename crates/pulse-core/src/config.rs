//! Centralized Configuration Management
//!
//! All tunables of the scheduler and both transports. Durations are stored as
//! milliseconds so the structures round-trip cleanly through TOML.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PulseError, PulseResult};

/// Largest frame payload accepted by default, after inflation
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

// ----------------------------------------------------------------------------
// Scheduler Configuration
// ----------------------------------------------------------------------------

/// Configuration for the scheduler and its worker loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive non-suspending cycles before a forced cool-down
    pub max_spin_cycles: u32,
    /// Length of the forced cool-down
    pub cooldown_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_spin_cycles: 1000,
            cooldown_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

// ----------------------------------------------------------------------------
// Persistent Transport Configuration
// ----------------------------------------------------------------------------

/// Configuration for the long-lived socket transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// `host:port` of the back end
    pub address: String,
    /// Interval between keep-alive frames
    pub heartbeat_interval_ms: u64,
    /// Consecutive failures before giving up
    pub max_retries: u32,
    /// Backoff unit, multiplied by the retry count
    pub backoff_base_ms: u64,
    /// Timeout for establishing the socket
    pub connect_timeout_ms: u64,
    /// Minimum spacing between attempts triggered by resume signals
    pub min_reconnect_interval_ms: u64,
    /// Largest accepted frame payload
    pub max_payload_size: usize,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9900".to_string(),
            heartbeat_interval_ms: 15 * 60 * 1000, // 15 minutes
            max_retries: 3,
            backoff_base_ms: 5_000,
            connect_timeout_ms: 30_000,
            min_reconnect_interval_ms: 60_000,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl PersistentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_interval_ms)
    }

    /// Backoff before the given retry (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(retry as u64))
    }
}

// ----------------------------------------------------------------------------
// Polling Transport Configuration
// ----------------------------------------------------------------------------

/// Configuration for the batched HTTP + long-poll transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Endpoint receiving batched request POSTs
    pub rpg_url: String,
    /// Endpoint answering long-poll requests
    pub poll_url: String,
    /// Attempts per batch on retryable errors
    pub max_post_retries: u32,
    /// Consecutive empty poll replies before the poller stops
    pub max_empty_polls: u32,
    /// Pause between two polls
    pub poll_interval_ms: u64,
    /// Timeout for a single HTTP exchange
    pub request_timeout_ms: u64,
    /// Largest accepted frame payload once inflated
    pub max_payload_size: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            rpg_url: "http://127.0.0.1:8080/rpg".to_string(),
            poll_url: "http://127.0.0.1:8080/poll".to_string(),
            max_post_retries: 3,
            max_empty_polls: 20,
            poll_interval_ms: 1_000,
            request_timeout_ms: 60_000,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl PollingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Which transport strategy carries requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Persistent,
    Polling,
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Persistent
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub mode: TransportMode,
    pub scheduler: SchedulerConfig,
    pub persistent: PersistentConfig,
    pub polling: PollingConfig,
}

impl PulseConfig {
    /// Configuration with short intervals for tests
    pub fn testing() -> Self {
        Self {
            mode: TransportMode::Persistent,
            scheduler: SchedulerConfig {
                max_spin_cycles: 1000,
                cooldown_ms: 50,
            },
            persistent: PersistentConfig {
                heartbeat_interval_ms: 60_000,
                max_retries: 3,
                backoff_base_ms: 5,
                connect_timeout_ms: 500,
                min_reconnect_interval_ms: 0,
                ..PersistentConfig::default()
            },
            polling: PollingConfig {
                max_post_retries: 3,
                max_empty_polls: 3,
                poll_interval_ms: 5,
                request_timeout_ms: 500,
                ..PollingConfig::default()
            },
        }
    }

    /// Check the configuration for values the runtime cannot work with
    pub fn validate(&self) -> PulseResult<()> {
        if self.scheduler.max_spin_cycles == 0 {
            return Err(PulseError::config_error("max_spin_cycles must be positive"));
        }
        match self.mode {
            TransportMode::Persistent => {
                if self.persistent.address.trim().is_empty() {
                    return Err(PulseError::config_error("persistent address is empty"));
                }
                if self.persistent.max_retries == 0 {
                    return Err(PulseError::config_error("max_retries must be positive"));
                }
                if self.persistent.heartbeat_interval_ms == 0 {
                    return Err(PulseError::config_error(
                        "heartbeat_interval_ms must be positive",
                    ));
                }
            }
            TransportMode::Polling => {
                for (name, value) in [
                    ("rpg_url", &self.polling.rpg_url),
                    ("poll_url", &self.polling.poll_url),
                ] {
                    url::Url::parse(value).map_err(|e| {
                        PulseError::config_error(format!("invalid {}: {}", name, e))
                    })?;
                }
                if self.polling.max_post_retries == 0 {
                    return Err(PulseError::config_error("max_post_retries must be positive"));
                }
                if self.polling.max_empty_polls == 0 {
                    return Err(PulseError::config_error("max_empty_polls must be positive"));
                }
            }
        }
        Ok(())
    }
}
