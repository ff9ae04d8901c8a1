use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    CONNECT_RETRY_DELAY_MS, DEFAULT_MTU, MAX_CONNECT_RETRIES, MAX_MTU,
    PRIORITY_REQUEST_TIMEOUT_MS, SCAN_TIMEOUT_MS, SERVICE_DISCOVERY_DELAY_MS,
};

/// Timings and limits of the central core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CentralConfig {
    /// How long a scan runs before it stops on its own (ms)
    pub scan_timeout_ms: u64,

    /// Connection attempts before a connect is abandoned
    pub max_connect_retries: u32,

    /// Delay between connection attempts (ms)
    pub connect_retry_delay_ms: u64,

    /// Settle delay between Connected and service discovery (ms)
    pub service_discovery_delay_ms: u64,

    /// Bound on the wait for a connection priority result (ms)
    pub priority_request_timeout_ms: u64,

    pub max_mtu: u16,
    pub default_mtu: u16,

    /// Pending commands the command context buffers before callers wait
    pub command_queue_capacity: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            scan_timeout_ms: SCAN_TIMEOUT_MS,
            max_connect_retries: MAX_CONNECT_RETRIES,
            connect_retry_delay_ms: CONNECT_RETRY_DELAY_MS,
            service_discovery_delay_ms: SERVICE_DISCOVERY_DELAY_MS,
            priority_request_timeout_ms: PRIORITY_REQUEST_TIMEOUT_MS,
            max_mtu: MAX_MTU,
            default_mtu: DEFAULT_MTU,
            command_queue_capacity: 64,
        }
    }
}

impl CentralConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.service_discovery_delay_ms)
    }

    pub fn priority_timeout(&self) -> Duration {
        Duration::from_millis(self.priority_request_timeout_ms)
    }
}
