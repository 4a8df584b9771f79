//! Configuration types shared by the relay core: one mount's ingest/egress
//! settings, one relay client's master list, and defaults for both.

use serde::Deserialize;

use crate::protocol_constants::{DEFAULT_ICY_METAINT, DEFAULT_QUEUE_BLOCK_SIZE};

fn default_icy_metaint() -> usize {
    DEFAULT_ICY_METAINT
}

fn default_queue_block_size() -> usize {
    DEFAULT_QUEUE_BLOCK_SIZE
}

fn default_charset() -> String {
    "ISO-8859-1".to_string()
}

fn default_retry_interval() -> u64 {
    15
}

fn default_numframes() -> u8 {
    3
}

/// Settings for one mountpoint's source ingest and ICY egress defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub mountpoint: String,
    /// Default ICY egress interval offered to listeners that didn't
    /// negotiate one of their own, in bytes. 0 disables ICY egress.
    #[serde(rename = "icy-metaint")]
    pub icy_metaint: usize,
    /// Charset inbound inline metadata is declared in.
    pub charset: String,
    pub queue_block_size: usize,
    pub on_demand: bool,
    /// Consecutive frames `MpegSync` requires before declaring lock.
    pub sync_numframes: u8,
    pub dump_file: Option<String>,
    pub stream_name: Option<String>,
    pub stream_description: Option<String>,
    pub stream_url: Option<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mountpoint: String::new(),
            icy_metaint: default_icy_metaint(),
            charset: default_charset(),
            queue_block_size: default_queue_block_size(),
            on_demand: false,
            sync_numframes: default_numframes(),
            dump_file: None,
            stream_name: None,
            stream_description: None,
            stream_url: None,
        }
    }
}

/// One upstream candidate a relay will try, in order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RelayMaster {
    pub ip: String,
    pub port: u16,
    pub mount: String,
    pub bind: Option<String>,
    #[serde(default = "default_master_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub skip: bool,
}

fn default_master_timeout_ms() -> u64 {
    4000
}

/// One relay client's configuration: which mount it feeds, which masters it
/// tries in order, and how it authenticates / retries.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub localmount: String,
    pub masters: Vec<RelayMaster>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mp3_metadata: bool,
    pub on_demand: bool,
    #[serde(rename = "interval")]
    pub retry_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            localmount: String::new(),
            masters: Vec::new(),
            username: None,
            password: None,
            mp3_metadata: true,
            on_demand: false,
            retry_interval_secs: default_retry_interval(),
        }
    }
}

/// Master server stream-list pull settings, consulted alongside any
/// statically configured relays.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterPullConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub update_interval_secs: u64,
}

impl Default for MasterPullConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8000,
            username: None,
            password: None,
            update_interval_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_config_defaults_match_protocol_constants() {
        let config = MountConfig::default();
        assert_eq!(config.icy_metaint, DEFAULT_ICY_METAINT);
        assert_eq!(config.queue_block_size, DEFAULT_QUEUE_BLOCK_SIZE);
        assert_eq!(config.charset, "ISO-8859-1");
        assert_eq!(config.sync_numframes, 3);
    }

    #[test]
    fn relay_config_defaults_to_mp3_metadata_enabled() {
        let config = RelayConfig::default();
        assert!(config.mp3_metadata);
        assert_eq!(config.retry_interval_secs, 15);
    }
}
