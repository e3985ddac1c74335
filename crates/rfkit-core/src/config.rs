//! Driver tuning loaded from TOML.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Timeouts, retry bounds and channel plans shared by all drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Bulk read timeout for polling reads.
    pub read_timeout_ms: u64,
    /// Control transfer timeout.
    pub control_timeout_ms: u64,
    /// ButteRFly command retransmissions before giving up.
    pub command_retries: u32,
    /// BLE advertising channels swept by the Ubertooth while unsynchronized.
    pub sweep_channels: Vec<u8>,
    pub sweep_dwell_ms: u64,
    /// RFStorm channels visited while scanning for Mosart devices.
    pub scan_channels: Vec<u8>,
    pub scan_dwell_ms: u64,
    /// Polls spent waiting for a dongle sync marker before injecting anyway.
    pub sync_injection_attempts: u32,
    /// Interval at which background tasks check their stop flag.
    pub task_poll_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 20,
            control_timeout_ms: 1000,
            command_retries: 5,
            sweep_channels: vec![37, 38, 39],
            sweep_dwell_ms: 250,
            scan_channels: (2..=83).collect(),
            scan_dwell_ms: 100,
            sync_injection_attempts: 200,
            task_poll_ms: 10,
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn sweep_dwell(&self) -> Duration {
        Duration::from_millis(self.sweep_dwell_ms)
    }

    pub fn scan_dwell(&self) -> Duration {
        Duration::from_millis(self.scan_dwell_ms)
    }

    pub fn task_poll(&self) -> Duration {
        Duration::from_millis(self.task_poll_ms.max(1))
    }
}
