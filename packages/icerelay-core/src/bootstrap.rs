//! Composition root: wires the mount registry, relay controller, and admin
//! router together from a loaded [`RelayDaemonConfig`].
//!
//! Grounded on the teacher's `bootstrap.rs` (`BootstrappedServices` struct +
//! `bootstrap_services` free function, `shutdown()` driving a
//! `CancellationToken`), generalized from Sonos/discovery wiring to mount/
//! relay wiring.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::admin::{build_router, AdminState};
use crate::config::{MasterPullConfig, MountConfig, RelayConfig};
use crate::error::RelayResult;
use crate::mount::MountRegistry;
use crate::relay::{RedirectorPool, RelayController};

const REDIRECTOR_MAX_ENTRIES: usize = 64;

/// Everything needed to start a relay daemon: statically configured mounts,
/// statically configured relays, and an optional master to periodically
/// pull a stream list from.
#[derive(Debug, Clone, Default)]
pub struct RelayDaemonConfig {
    pub mounts: Vec<MountConfig>,
    pub relays: Vec<RelayConfig>,
    pub master_pull: Option<MasterPullConfig>,
}

/// Container for all bootstrapped services, consumed by the binary's
/// `main` to start the HTTP server and background tasks.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub mounts: Arc<MountRegistry>,
    pub relay_controller: Arc<RelayController>,
    pub router: axum::Router,
    http_client: Client,
    cancel_token: CancellationToken,
    master_pull: Option<MasterPullConfig>,
}

impl BootstrappedServices {
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawns the periodic master stream-list pull as a `tokio::task`, per
    /// the design note that it needs no dedicated OS thread (no blocking
    /// call to isolate it from).
    pub fn spawn_background_tasks(&self) {
        if let Some(master_pull) = self.master_pull.clone() {
            let controller = Arc::clone(&self.relay_controller);
            let cancel = self.cancel_token.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(master_pull.update_interval_secs.max(1)));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            match controller.run_streamlist_pull(&master_pull).await {
                                Ok(count) => log::debug!("streamlist pull merged {} relay(s)", count),
                                Err(e) => log::warn!("streamlist pull failed: {}", e),
                            }
                        }
                    }
                }
            });
        }

        let controller = Arc::clone(&self.relay_controller);
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => controller.tick(std::time::Instant::now()),
                }
            }
        });
    }

    /// Initiates graceful shutdown of all background tasks.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        for mountpoint in self.mounts.mountpoints() {
            if let Some(mount) = self.mounts.get(&mountpoint) {
                mount.begin_termination();
            }
        }
        log::info!("shutdown complete");
    }
}

fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build HTTP client")
}

/// Bootstraps all services from a loaded config. Wiring order: mount
/// registry first (relays need somewhere to attach their source), then the
/// shared HTTP client, then the relay controller, then every statically
/// configured mount/relay is installed.
pub fn bootstrap_services(config: &RelayDaemonConfig) -> RelayResult<BootstrappedServices> {
    let mounts = Arc::new(MountRegistry::new());
    for mount_config in &config.mounts {
        mounts.create(mount_config.clone());
    }

    let http_client = create_http_client();
    let relay_controller = Arc::new(RelayController::new(Arc::clone(&mounts), http_client.clone()));
    for relay in &config.relays {
        mounts.get_or_create(MountConfig {
            mountpoint: relay.localmount.clone(),
            on_demand: relay.on_demand,
            ..Default::default()
        });
        relay_controller.install(relay.clone());
    }

    let redirector = Arc::new(RedirectorPool::new(REDIRECTOR_MAX_ENTRIES));

    let router = build_router(AdminState {
        mounts: Arc::clone(&mounts),
        relay_controller: Arc::clone(&relay_controller),
        redirector,
    });

    Ok(BootstrappedServices {
        mounts,
        relay_controller,
        router,
        http_client,
        cancel_token: CancellationToken::new(),
        master_pull: config.master_pull.clone(),
    })
}
