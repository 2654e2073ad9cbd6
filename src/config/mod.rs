//! On-disk configuration for the `v2kvm` CLI driver.
//!
//! The core library itself is configured purely through the types in
//! [`crate::request`] that the caller builds up; this module only covers
//! the optional `v2kvm.toml` the CLI front-end reads to fill in defaults
//! the caller didn't specify on the command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI-level defaults, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory local output artifacts are written to when the caller
    /// didn't pass `--output-dir`.
    pub default_output_dir: PathBuf,
    /// Default bridge name for the network mapper's `default_bridge` rule.
    pub default_bridge: Option<String>,
    /// Default network name for the network mapper's `default_network` rule.
    pub default_network: Option<String>,
    /// Whether to keep `console=xvc0`/`console=hvc0` bootloader arguments
    /// alongside the rewritten `console=ttyS0`, instead of removing them.
    pub keep_serial_console: bool,
    /// Directory scanned for local RPM/deb packages the Linux converter
    /// may install (spec.md Non-goals: never reached over the network).
    pub local_package_dir: Option<PathBuf>,
    /// Path to an expanded `virtio-win` driver tree or ISO, used by the
    /// Windows converter when the caller doesn't override it.
    pub virtio_win_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            default_output_dir: home.join("v2kvm-out"),
            default_bridge: None,
            default_network: Some("default".to_string()),
            keep_serial_console: false,
            local_package_dir: None,
            virtio_win_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// The configuration file path, `$XDG_CONFIG_HOME/v2kvm/config.toml`.
    pub fn config_file_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("v2kvm")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_network_rule_is_set_but_bridge_is_not() {
        let cfg = Config::default();
        assert_eq!(cfg.default_network.as_deref(), Some("default"));
        assert!(cfg.default_bridge.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.default_output_dir, cfg.default_output_dir);
        assert_eq!(back.keep_serial_console, cfg.keep_serial_console);
    }
}
