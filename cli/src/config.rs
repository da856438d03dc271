// Configuration management for the bluest CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/bluest/config.json
// - Linux: ~/.config/bluest/config.json
// - Windows: %APPDATA%\bluest\config.json

use anyhow::{Context, Result};
use bluestsdk_core::SdkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan duration used when `--timeout` is not given, in seconds
    pub scan_timeout: u64,

    /// Index of the Bluetooth adapter to use
    pub adapter_index: usize,

    /// Settings handed to the SDK
    pub sdk: SdkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout: 10,
            adapter_index: 0,
            sdk: SdkConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("bluest");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it on first use
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .sdk
                .validate()
                .context("Invalid SDK settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (not persisted until `save`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "scan_timeout" => updated.scan_timeout = value.parse().context("Invalid number")?,
            "adapter_index" => updated.adapter_index = value.parse().context("Invalid number")?,
            "dispatcher_threads" => {
                updated.sdk.dispatcher_threads = value.parse().context("Invalid number")?
            }
            "scan_slice_ms" => updated.sdk.scan_slice_ms = value.parse().context("Invalid number")?,
            "default_discovery_timeout_ms" => {
                updated.sdk.default_discovery_timeout_ms = value.parse().context("Invalid number")?
            }
            "show_warnings" => {
                updated.sdk.show_warnings = value.parse().context("Invalid boolean value")?
            }
            "console_max_write_bytes" => {
                updated.sdk.console_max_write_bytes = value.parse().context("Invalid number")?
            }
            "firmware_packet_bytes" => {
                updated.sdk.firmware_packet_bytes = value.parse().context("Invalid number")?
            }
            "firmware_packets_per_block" => {
                updated.sdk.firmware_packets_per_block = value.parse().context("Invalid number")?
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.sdk.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("scan_timeout".to_string(), self.scan_timeout.to_string()),
            ("adapter_index".to_string(), self.adapter_index.to_string()),
            (
                "dispatcher_threads".to_string(),
                self.sdk.dispatcher_threads.to_string(),
            ),
            ("scan_slice_ms".to_string(), self.sdk.scan_slice_ms.to_string()),
            (
                "default_discovery_timeout_ms".to_string(),
                self.sdk.default_discovery_timeout_ms.to_string(),
            ),
            ("show_warnings".to_string(), self.sdk.show_warnings.to_string()),
            (
                "console_max_write_bytes".to_string(),
                self.sdk.console_max_write_bytes.to_string(),
            ),
            (
                "firmware_packet_bytes".to_string(),
                self.sdk.firmware_packet_bytes.to_string(),
            ),
            (
                "firmware_packets_per_block".to_string(),
                self.sdk.firmware_packets_per_block.to_string(),
            ),
        ]
    }
}
