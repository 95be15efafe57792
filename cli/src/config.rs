// Configuration management for the TapTape CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/taptape/config.json
// - Linux: ~/.config/taptape/config.json
// - Windows: %APPDATA%\taptape\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upload URL finished recordings are delivered to
    pub endpoint: String,

    /// Name fragment that identifies the button during BLE scans
    pub marker: String,

    /// Name fragments that disqualify a device even when the marker matches
    pub excluded: Vec<String>,

    /// Delivery attempts before an item is parked as failed
    pub max_retries: u32,

    /// Storage directory for the queue file and spooled recordings
    pub storage_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Unset until the user points us at a server
            endpoint: String::new(),
            marker: "shutter".to_string(),
            excluded: Vec::new(),
            max_retries: 5,
            storage_dir: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("taptape");

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("taptape");

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)
                .context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&config_file, contents)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "endpoint" => {
                self.endpoint = value.to_string();
            }
            "marker" => {
                if value.trim().is_empty() {
                    anyhow::bail!("marker must not be empty");
                }
                self.marker = value.to_string();
            }
            "excluded" => {
                // Comma-separated list; empty value clears it
                self.excluded = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "max_retries" => {
                self.max_retries = value.parse()
                    .context("Invalid retry count")?;
                if self.max_retries == 0 {
                    anyhow::bail!("max_retries must be at least 1");
                }
            }
            "storage_dir" => {
                self.storage_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "endpoint" => Some(self.endpoint.clone()),
            "marker" => Some(self.marker.clone()),
            "excluded" => Some(self.excluded.join(",")),
            "max_retries" => Some(self.max_retries.to_string()),
            "storage_dir" => self.storage_dir.clone(),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "endpoint".to_string(),
                if self.endpoint.is_empty() {
                    "(unset)".to_string()
                } else {
                    self.endpoint.clone()
                },
            ),
            ("marker".to_string(), self.marker.clone()),
            (
                "excluded".to_string(),
                if self.excluded.is_empty() {
                    "(none)".to_string()
                } else {
                    self.excluded.join(",")
                },
            ),
            ("max_retries".to_string(), self.max_retries.to_string()),
            (
                "storage_dir".to_string(),
                self.storage_dir.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
        ]
    }
}
