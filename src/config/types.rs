use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{
    CONNECT_TIMEOUT, DISCONNECT_DEADLINE, IS_CONNECTED_DEADLINE, SCAN_POLL_DELAY, SCAN_TIMEOUT, SUPERVISION_INTERVAL,
    WRITE_DEADLINE,
};

/// Timeouts and limits of an adapter. All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterConfig {
    pub scan_timeout_ms: u64,
    pub scan_poll_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_deadline_ms: u64,
    pub supervision_interval_ms: u64,
    pub is_connected_deadline_ms: u64,
    pub disconnect_deadline_ms: u64,
    /// `None` keeps every inbound message, otherwise the oldest are dropped.
    pub inbound_capacity: Option<usize>,
}

impl AdapterConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn scan_poll(&self) -> Duration {
        Duration::from_millis(self.scan_poll_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn supervision_interval(&self) -> Duration {
        Duration::from_millis(self.supervision_interval_ms.max(1))
    }

    pub fn is_connected_deadline(&self) -> Duration {
        Duration::from_millis(self.is_connected_deadline_ms)
    }

    pub fn disconnect_deadline(&self) -> Duration {
        Duration::from_millis(self.disconnect_deadline_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            scan_timeout_ms: SCAN_TIMEOUT,
            scan_poll_ms: SCAN_POLL_DELAY,
            connect_timeout_ms: CONNECT_TIMEOUT,
            write_deadline_ms: WRITE_DEADLINE,
            supervision_interval_ms: SUPERVISION_INTERVAL,
            is_connected_deadline_ms: IS_CONNECTED_DEADLINE,
            disconnect_deadline_ms: DISCONNECT_DEADLINE,
            inbound_capacity: None,
        }
    }
}
