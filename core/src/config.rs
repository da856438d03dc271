//! SDK configuration
//!
//! Tunables for callback dispatch, discovery and the firmware transfer. All
//! values have working defaults; a JSON form is accepted so front ends can
//! persist it next to their own settings.

use crate::BlueStError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Worker threads used for listener callbacks (default 5)
    pub dispatcher_threads: usize,
    /// Length of one scan slice in milliseconds (default 1000ms)
    pub scan_slice_ms: u64,
    /// Discovery duration used when none is given (default 10s)
    pub default_discovery_timeout_ms: u64,
    /// Log discarded advertisements at warn instead of debug
    pub show_warnings: bool,
    /// Largest single write on the debug console (default 20 bytes)
    pub console_max_write_bytes: usize,
    /// Firmware bytes per packet (default 16, multiple of the 8-byte flash word)
    pub firmware_packet_bytes: usize,
    /// Packets sent before each progress report (default 10)
    pub firmware_packets_per_block: usize,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            dispatcher_threads: 5,
            scan_slice_ms: 1000,
            default_discovery_timeout_ms: 10_000,
            show_warnings: false,
            console_max_write_bytes: 20,
            firmware_packet_bytes: 16,
            firmware_packets_per_block: 10,
        }
    }
}

impl SdkConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), BlueStError> {
        let non_zero = [
            ("dispatcher_threads", self.dispatcher_threads as u64),
            ("scan_slice_ms", self.scan_slice_ms),
            ("console_max_write_bytes", self.console_max_write_bytes as u64),
            ("firmware_packet_bytes", self.firmware_packet_bytes as u64),
            ("firmware_packets_per_block", self.firmware_packets_per_block as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(BlueStError::InvalidConfig(format!("{} must be > 0", name)));
        }

        if self.firmware_packet_bytes > self.console_max_write_bytes {
            return Err(BlueStError::InvalidConfig(format!(
                "firmware packet ({} bytes) exceeds console write size ({} bytes)",
                self.firmware_packet_bytes, self.console_max_write_bytes
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, BlueStError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BlueStError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, BlueStError> {
        serde_json::to_string_pretty(self).map_err(|e| BlueStError::InvalidConfig(e.to_string()))
    }

    pub fn scan_slice(&self) -> Duration {
        Duration::from_millis(self.scan_slice_ms)
    }

    pub fn default_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.default_discovery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SdkConfig::default();
        assert_eq!(config.dispatcher_threads, 5);
        assert_eq!(config.scan_slice(), Duration::from_secs(1));
        assert_eq!(config.default_discovery_timeout(), Duration::from_secs(10));
        assert!(!config.show_warnings);
        assert_eq!(config.console_max_write_bytes, 20);
        assert_eq!(config.firmware_packet_bytes, 16);
        assert_eq!(config.firmware_packets_per_block, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = SdkConfig {
            dispatcher_threads: 0,
            ..SdkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BlueStError::InvalidConfig(msg)) if msg.contains("dispatcher_threads")
        ));

        let config = SdkConfig {
            firmware_packets_per_block: 0,
            ..SdkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_packet_larger_than_console_write_rejected() {
        let config = SdkConfig {
            firmware_packet_bytes: 24,
            ..SdkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SdkConfig::from_json_str(r#"{ "scan_slice_ms": 250, "show_warnings": true }"#)
            .expect("valid json");
        assert_eq!(config.scan_slice_ms, 250);
        assert!(config.show_warnings);
        assert_eq!(config.dispatcher_threads, 5);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SdkConfig {
            default_discovery_timeout_ms: 3000,
            ..SdkConfig::default()
        };
        let json = config.to_json_string().expect("serialize");
        assert_eq!(SdkConfig::from_json_str(&json).expect("parse"), config);
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        assert!(SdkConfig::from_json_str(r#"{ "console_max_write_bytes": 0 }"#).is_err());
        assert!(SdkConfig::from_json_str("not json").is_err());
    }
}
