//! Core library for a standalone streaming audio relay: MP3/AAC ingest with
//! inline ICY metadata extraction, per-listener ICY/iceblock/FLV egress, and
//! outbound relay pull from upstream masters.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod flv_packager;
pub mod listener;
pub mod metadata;
pub mod mount;
pub mod mpeg_sync;
pub mod protocol_constants;
pub mod refbuf;
pub mod relay;
pub mod source;
pub mod stats;

pub use admin::{build_router, AdminState};
pub use bootstrap::{bootstrap_services, BootstrappedServices, RelayDaemonConfig};
pub use config::{MasterPullConfig, MountConfig, RelayConfig, RelayMaster};
pub use error::{RelayCoreError, RelayResult};
pub use listener::{ListenerMode, ListenerWriter};
pub use mount::{Mount, MountRegistry};
pub use relay::RelayController;
pub use stats::{LogStatsSink, StatsSink};
