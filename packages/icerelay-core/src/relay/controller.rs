//! `RelayController`: owns every outbound relay client, admits `Connecting`
//! attempts under a global cap, and drains a command channel instead of
//! polling global mutable flags.
//!
//! Grounded on the teacher's `bootstrap.rs` composition-root shape (a
//! `Clone`-able services struct wired once at startup) plus
//! `services/discovery_service.rs`'s periodic-background-task pattern for
//! the master stream-list pull loop.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;

use crate::config::{MasterPullConfig, MountConfig, RelayConfig};
use crate::error::{RelayCoreError, RelayResult};
use crate::mount::MountRegistry;
use crate::protocol_constants::MAX_CONCURRENT_CONNECTING;
use crate::relay::client::{update_relay_set, RelayClient, RelayCtx, RelayState};
use crate::relay::http_client::{connect, MasterTarget};
use crate::relay::streamlist::{parse_streamlist, pull_streamlist};

/// Global flags modeled as commands drained from a bounded channel each
/// tick, rather than mutable booleans polled from every task.
#[derive(Debug, Clone)]
pub enum ControllerCommand {
    UpdateAllMounts,
    Restart,
    RebuildMounts,
    StreamlistCheck,
}

pub struct RelayController {
    clients: DashMap<String, Mutex<RelayClient>>,
    connecting: AtomicUsize,
    slowdown: AtomicU32,
    mounts: Arc<MountRegistry>,
    http_client: Client,
    command_tx: mpsc::Sender<ControllerCommand>,
    command_rx: Mutex<mpsc::Receiver<ControllerCommand>>,
}

impl RelayController {
    pub fn new(mounts: Arc<MountRegistry>, http_client: Client) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        Self {
            clients: DashMap::new(),
            connecting: AtomicUsize::new(0),
            slowdown: AtomicU32::new(0),
            mounts,
            http_client,
            command_tx,
            command_rx: Mutex::new(command_rx),
        }
    }

    pub fn command_sender(&self) -> mpsc::Sender<ControllerCommand> {
        self.command_tx.clone()
    }

    /// Drains every command currently queued without blocking; called once
    /// per controller tick.
    pub fn drain_commands(&self) -> Vec<ControllerCommand> {
        let mut rx = self.command_rx.lock();
        let mut drained = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            drained.push(cmd);
        }
        drained
    }

    pub fn install(&self, relay: RelayConfig) {
        self.clients
            .entry(relay.localmount.clone())
            .or_insert_with(|| Mutex::new(RelayClient::new(relay)));
    }

    pub fn toggle(&self, localmount: &str) -> RelayResult<()> {
        let entry = self
            .clients
            .get(localmount)
            .ok_or_else(|| RelayCoreError::MountNotFound(localmount.to_string()))?;
        entry.lock().toggle();
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn state_of(&self, localmount: &str) -> Option<RelayState> {
        self.clients.get(localmount).map(|c| c.lock().state())
    }

    /// `compare_exchange`-based admission into `Connecting`, the async-safe
    /// equivalent of a spinlock guarding `MAX_CONCURRENT_CONNECTING`.
    pub fn try_admit_connecting(&self) -> bool {
        let mut current = self.connecting.load(Ordering::Acquire);
        loop {
            if current >= MAX_CONCURRENT_CONNECTING {
                self.slowdown.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            match self.connecting.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.slowdown.store(0, Ordering::Relaxed);
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_connecting(&self) {
        self.connecting.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn slowdown(&self) -> u32 {
        self.slowdown.load(Ordering::Relaxed)
    }

    /// Reconciles `desired` against every installed relay's current
    /// descriptor, installing new ones and flagging dropped ones for
    /// cleanup. Matches but unchanged relays are left alone.
    pub fn reconcile(&self, desired: &[RelayConfig]) {
        let current: Vec<RelayConfig> = self
            .clients
            .iter()
            .map(|entry| entry.value().lock().config.clone())
            .collect();

        let next = update_relay_set(&current, desired);
        for relay in next {
            if let Some(entry) = self.clients.get(&relay.localmount) {
                let mut client = entry.lock();
                if client.config != relay {
                    client.config = relay;
                }
            } else {
                self.install(relay);
            }
        }

        for stale in current.iter().filter(|c| !desired.iter().any(|d| d.localmount == c.localmount)) {
            if let Some(entry) = self.clients.get(&stale.localmount) {
                entry.lock().mark_for_cleanup();
            }
        }
    }

    /// Pulls and parses a master's stream list, merging the result into the
    /// controller's installed relays via `reconcile`.
    pub async fn run_streamlist_pull(&self, config: &MasterPullConfig) -> RelayResult<usize> {
        let body = pull_streamlist(&self.http_client, config)
            .await
            .map_err(RelayCoreError::Relay)?;
        let relays = parse_streamlist(&body, config);
        let count = relays.len();
        self.reconcile(&relays);
        Ok(count)
    }

    pub fn mounts(&self) -> &Arc<MountRegistry> {
        &self.mounts
    }

    /// One scheduling tick: steps every installed client's state machine and
    /// spawns a connect-and-stream task for any that just became
    /// `Connecting`. Called periodically by the driver loop in `bootstrap`.
    pub fn tick(self: &Arc<Self>, now: Instant) {
        let localmounts: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for localmount in localmounts {
            let Some(entry) = self.clients.get(&localmount) else { continue };
            let mut client = entry.lock();
            if client.is_driving() {
                continue;
            }

            let mount = self.mounts.get_or_create(MountConfig {
                mountpoint: localmount.clone(),
                ..Default::default()
            });
            let has_listeners = mount.listener_count() > 0;
            let wants_connect = client.wants_to_connect(has_listeners, false);
            let admitted = if wants_connect { self.try_admit_connecting() } else { false };

            let ctx = RelayCtx {
                now,
                mount_owned_by_other: false,
                has_listeners,
                has_fallback_listeners: false,
                connecting_admitted: admitted,
                slowdown: self.slowdown(),
            };
            let outcome = client.step(&ctx);

            if outcome.state == RelayState::Connecting {
                client.set_driving(true);
                drop(client);
                drop(entry);
                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    controller.run_connect_and_stream(localmount).await;
                });
            }
        }
    }

    /// Performs one connect attempt against the client's next unskipped
    /// master and, on success, pumps the response body into the target
    /// mount's `SourceFormat` until the stream ends.
    async fn run_connect_and_stream(self: Arc<Self>, localmount: String) {
        let attempt = {
            let Some(entry) = self.clients.get(&localmount) else { return };
            let mut client = entry.lock();
            client.begin_connecting().map(|idx| {
                let master = client.config.masters[idx].clone();
                (idx, master, client.config.username.clone(), client.config.password.clone())
            })
        };
        self.release_connecting();

        let Some((idx, master, username, password)) = attempt else {
            if let Some(entry) = self.clients.get(&localmount) {
                entry.lock().set_driving(false);
            }
            return;
        };

        let target = MasterTarget {
            url: format!("http://{}:{}{}", master.ip, master.port, master.mount),
            username,
            password,
            timeout: Duration::from_millis(master.timeout_ms),
        };

        let response = match connect(&self.http_client, &target).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[relay {}] connect to {}:{} failed: {}", localmount, master.ip, master.port, e);
                if let Some(entry) = self.clients.get(&localmount) {
                    let mut client = entry.lock();
                    client.report_connect_result(idx, false);
                    client.set_driving(false);
                }
                return;
            }
        };

        if let Some(entry) = self.clients.get(&localmount) {
            entry.lock().report_connect_result(idx, true);
        }

        let metaint = response
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mount = self.mounts.get_or_create(MountConfig {
            mountpoint: localmount.clone(),
            ..Default::default()
        });
        {
            let mut source = mount.source.lock();
            source.swap_client(crate::mpeg_sync::MpegSync::new(localmount.clone()));
            source.set_inline_metadata_interval(metaint);
        }
        mount.set_running(true);

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("[relay {}] stream read error: {}", localmount, e);
                    break;
                }
            };
            let mut source = mount.source.lock();
            source.push_bytes(&chunk);
            loop {
                match source.get_buffer() {
                    Ok(Some(block)) => {
                        source.write_buf_to_file(&block);
                        mount.queue.push(block);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("[relay {}] sync error: {}", localmount, e);
                        break;
                    }
                }
            }
        }

        mount.set_running(false);
        if let Some(entry) = self.clients.get(&localmount) {
            let mut client = entry.lock();
            client.report_stream_ended();
            client.set_driving(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayMaster;

    fn relay_config(localmount: &str) -> RelayConfig {
        RelayConfig {
            localmount: localmount.to_string(),
            masters: vec![RelayMaster {
                ip: "a.example.com".to_string(),
                port: 8000,
                mount: "/live.mp3".to_string(),
                bind: None,
                timeout_ms: 4000,
                skip: false,
            }],
            username: None,
            password: None,
            mp3_metadata: true,
            on_demand: false,
            retry_interval_secs: 15,
        }
    }

    fn controller() -> RelayController {
        RelayController::new(Arc::new(MountRegistry::new()), Client::new())
    }

    #[test]
    fn install_then_toggle_flips_running_state() {
        let controller = controller();
        controller.install(relay_config("/live.mp3"));
        assert_eq!(controller.client_count(), 1);
        assert!(controller.toggle("/live.mp3").is_ok());
    }

    #[test]
    fn toggle_unknown_mount_errors() {
        let controller = controller();
        assert!(controller.toggle("/nope.mp3").is_err());
    }

    #[test]
    fn admission_caps_at_max_concurrent_connecting() {
        let controller = controller();
        for _ in 0..MAX_CONCURRENT_CONNECTING {
            assert!(controller.try_admit_connecting());
        }
        assert!(!controller.try_admit_connecting());
        assert!(controller.slowdown() >= 1);
        controller.release_connecting();
        assert!(controller.try_admit_connecting());
    }

    #[test]
    fn reconcile_installs_new_and_flags_stale_relays() {
        let controller = controller();
        controller.install(relay_config("/a"));
        controller.reconcile(&[relay_config("/b")]);
        assert_eq!(controller.client_count(), 2);
    }

    #[test]
    fn commands_drain_in_fifo_order() {
        let controller = controller();
        let tx = controller.command_sender();
        tx.try_send(ControllerCommand::UpdateAllMounts).unwrap();
        tx.try_send(ControllerCommand::Restart).unwrap();
        let drained = controller.drain_commands();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], ControllerCommand::UpdateAllMounts));
        assert!(matches!(drained[1], ControllerCommand::Restart));
    }

    #[tokio::test]
    async fn tick_drives_startup_through_connecting_and_releases_on_no_masters() {
        let controller = Arc::new(controller());
        controller.install(RelayConfig {
            localmount: "/live.mp3".to_string(),
            masters: vec![],
            ..Default::default()
        });

        let now = Instant::now();
        controller.tick(now); // Init -> Startup
        assert_eq!(controller.state_of("/live.mp3"), Some(RelayState::Startup));

        controller.tick(now); // Startup -> Connecting, spawns the driver task
        assert_eq!(controller.state_of("/live.mp3"), Some(RelayState::Connecting));

        // Let the spawned task run; with no masters configured it gives up
        // immediately and releases the client without touching its state.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let entry = controller.clients.get("/live.mp3").unwrap();
        assert!(!entry.lock().is_driving());
    }
}
