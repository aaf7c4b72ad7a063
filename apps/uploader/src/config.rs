//! Uploader configuration.
//!
//! Stored as TOML at `$NODEFLASH_CONFIG`, else
//! `$XDG_CONFIG_HOME/nodeflash/config.toml` (Linux: `~/.config/...`,
//! Windows: `%APPDATA%/nodeflash/config.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use nodeflash_image::DEFAULT_MAX_IMAGE_SIZE;
use nodeflash_uploader::UploaderConfig;
use serde::{Deserialize, Serialize};

use crate::link::LinkSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node to upload to, as hex (`03f95a`).
    #[serde(default = "default_target")]
    pub target: String,

    /// Script image to send.
    #[serde(default = "default_image")]
    pub image: PathBuf,

    #[serde(default)]
    pub uploader: UploaderSection,

    #[serde(default)]
    pub link: LinkSection,
}

fn default_target() -> String {
    "03f95a".into()
}

fn default_image() -> PathBuf {
    PathBuf::from("blink.spy")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: default_target(),
            image: default_image(),
            uploader: UploaderSection::default(),
            link: LinkSection::default(),
        }
    }
}

/// Retry and stall-detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderSection {
    /// Ticks without a completion before an attempt is declared stalled.
    pub wait_budget: u32,
    /// Total transfer attempts, the first one included.
    pub max_attempts: u32,
    /// Stall-check period in milliseconds.
    pub tick_period_ms: u64,
    /// Retry when the transport itself reports a timeout.
    pub retry_transport_timeouts: bool,
    /// Reject images larger than this many bytes.
    pub max_image_size: u64,
}

impl Default for UploaderSection {
    fn default() -> Self {
        let defaults = UploaderConfig::default();
        Self {
            wait_budget: defaults.wait_budget,
            max_attempts: defaults.max_attempts,
            tick_period_ms: defaults.tick_period.as_millis() as u64,
            retry_transport_timeouts: defaults.retry_transport_timeouts,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl UploaderSection {
    pub fn to_uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            wait_budget: self.wait_budget,
            max_attempts: self.max_attempts,
            tick_period: Duration::from_millis(self.tick_period_ms),
            retry_transport_timeouts: self.retry_transport_timeouts,
            ..UploaderConfig::default()
        }
    }
}

/// Behaviour of the simulated radio link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Fixed per-transfer latency in milliseconds.
    pub latency_ms: u64,
    /// Over-the-air throughput; 0 disables the size-dependent delay.
    pub bytes_per_sec: u32,
    /// Number of initial transfers that vanish without a report.
    pub lost_transfers: u32,
    /// Number of transfers after the lost ones that report a timeout.
    pub timeout_transfers: u32,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            latency_ms: 1500,
            bytes_per_sec: 2000,
            lost_transfers: 0,
            timeout_transfers: 0,
        }
    }
}

impl LinkSection {
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            latency: Duration::from_millis(self.latency_ms),
            bytes_per_sec: self.bytes_per_sec,
            lost_transfers: self.lost_transfers,
            timeout_transfers: self.timeout_transfers,
        }
    }
}

impl Config {
    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("NODEFLASH_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("nodeflash").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("nodeflash").join("config.toml"))
    }
}
