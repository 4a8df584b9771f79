//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use anyhow::{Context, Result};
use icerelay_core::{MasterPullConfig, MountConfig, RelayConfig, RelayDaemonConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `ICERELAY_BIND_PORT`
    pub bind_port: u16,

    /// Address to bind the HTTP server to.
    /// Override: `ICERELAY_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Statically configured mounts this server accepts source connections
    /// or relay traffic for.
    pub mounts: Vec<MountConfig>,

    /// Statically configured outbound relays, pulling audio from upstream
    /// masters into local mounts.
    pub relays: Vec<RelayConfig>,

    /// Optional master server to periodically pull a stream list from, used
    /// to discover relays this server should carry beyond the static list.
    pub master_pull: Option<MasterPullConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8000,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mounts: Vec::new(),
            relays: Vec::new(),
            master_pull: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ICERELAY_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("ICERELAY_BIND_ADDRESS") {
            if let Ok(addr) = val.parse() {
                self.bind_address = addr;
            }
        }
    }

    /// Converts to icerelay-core's bootstrap config.
    pub fn to_daemon_config(&self) -> RelayDaemonConfig {
        RelayDaemonConfig {
            mounts: self.mounts.clone(),
            relays: self.relays.clone(),
            master_pull: self.master_pull.clone(),
        }
    }
}
