//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use can_live_core::{parse_selector, MonitorConfig, Selector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Start receiving as soon as the program starts
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bitrate: default_bitrate(),
            autostart: default_true(),
        }
    }
}

fn default_bitrate() -> u32 {
    500_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelsConfig {
    /// Dedicated channels as hex ids ("7E8", "0x100")
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub auto_add: bool,
}

impl ChannelsConfig {
    /// Parsed dedicated selectors; malformed ids are skipped
    pub fn selectors(&self) -> Vec<Selector> {
        self.ids
            .iter()
            .filter_map(|text| match parse_selector(text) {
                Some(selector @ Selector::Id(_)) => Some(selector),
                _ => {
                    log::warn!("Ignoring channel id {:?} in config", text);
                    None
                }
            })
            .collect()
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.device.bitrate == 0 {
        bail!("device.bitrate must be positive");
    }
    if config.monitor.channel_capacity == 0 {
        bail!("monitor.channel_capacity must be at least 1");
    }
    let delta = &config.monitor.delta;
    if delta.micros_below > delta.millis_below {
        bail!("monitor.delta.micros_below must not exceed millis_below");
    }
    Ok(())
}
