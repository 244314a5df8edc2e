//! cbz-volumes configuration management.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Largest volume archive size before splitting kicks in (84 MiB).
pub const DEFAULT_MAX_VOLUME_SIZE: u64 = 84 * 1024 * 1024;

/// How far past the maximum a volume must be before it is split.
pub const DEFAULT_SPLIT_MARGIN: f64 = 1.33;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Target upper bound for a volume archive in bytes. 0 disables splitting.
    #[serde(default = "default_max_volume_size")]
    pub max_volume_size: u64,

    /// Volumes are split only when larger than max_volume_size * split_margin
    #[serde(default = "default_split_margin")]
    pub split_margin: f64,
}

fn default_max_volume_size() -> u64 {
    DEFAULT_MAX_VOLUME_SIZE
}

fn default_split_margin() -> f64 {
    DEFAULT_SPLIT_MARGIN
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            max_volume_size: default_max_volume_size(),
            split_margin: default_split_margin(),
        }
    }
}

impl PackerConfig {
    /// Get the config file path: ~/.config/cli-programs/cbz-volumes.toml
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Neither HOME nor USERPROFILE is set")?;
        Ok([home.as_str(), ".config", "cli-programs", "cbz-volumes.toml"]
            .iter()
            .collect())
    }

    /// Load config from file, falling back to defaults when there is none
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Parse and validate a config document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PackerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the packer cannot work with.
    pub fn validate(&self) -> Result<()> {
        validate_split_margin(self.split_margin)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.validate()?;
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// A split margin is a finite ratio of at least 1.0.
pub fn validate_split_margin(margin: f64) -> Result<()> {
    if !margin.is_finite() || margin < 1.0 {
        bail!("Split margin must be a number of at least 1.0, got {}", margin);
    }
    Ok(())
}
