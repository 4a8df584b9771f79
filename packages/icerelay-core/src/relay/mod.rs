//! Outbound relay: pulling a stream from an upstream master and re-serving
//! it locally, plus redirecting arriving listeners to peer servers.

pub mod client;
pub mod controller;
pub mod http_client;
pub mod redirector;
pub mod streamlist;

pub use client::{update_relay_set, RelayClient, RelayCtx, RelayState, StepOutcome};
pub use controller::{ControllerCommand, RelayController};
pub use http_client::{connect as relay_connect, MasterTarget};
pub use redirector::{redirect_location, RedirectTarget, RedirectorEntry, RedirectorPool};
pub use streamlist::{parse_streamlist, pull_streamlist};
