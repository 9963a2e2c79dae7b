//! Relay server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Relay server settings, loadable from TOML with CLI overrides on top
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// UDP bind address for the relay
    #[serde(default = "default_udp_addr")]
    pub udp_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_addr: default_udp_addr(),
        }
    }
}

fn default_udp_addr() -> String {
    "0.0.0.0:51820".to_string()
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let config: ServerConfig =
            toml::from_str(&content).context("failed to parse TOML config")?;
        Ok(config)
    }

    /// Probe the default paths, falling back to built-in defaults
    pub fn load_or_default() -> Self {
        let paths = [
            "/etc/wgspan/config.toml",
            "~/.wgspan/config.toml",
            "./wgspan.toml",
        ];

        for path in &paths {
            let expanded = shellexpand::tilde(path).to_string();
            if Path::new(&expanded).exists() {
                if let Ok(config) = Self::load(&expanded) {
                    return config;
                }
            }
        }

        Self::default()
    }
}
