//! `Mount`: one named stream endpoint — its ingest [`SourceFormat`], the
//! [`MountQueue`] ring that fans audio out, and the registry of active
//! listeners. `MountRegistry` is the process-wide keyed directory of mounts.
//!
//! Grounded on the teacher's `StreamRegistry` (`stream/manager.rs`):
//! `DashMap<String, Arc<_>>` keyed storage, same `get`/`remove`/`count`/
//! `list_ids` shape, generalized from a fixed concurrent-stream cap to
//! relay-managed mount creation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::MountConfig;
use crate::error::{RelayCoreError, RelayResult};
use crate::listener::{ListenerMode, ListenerWriter};
use crate::source::{MountQueue, SourceFormat};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u16 {
        /// Source is actively pushing audio (relay streaming or live ingest connected).
        const RUNNING = 0b0000_0001;
        /// Mount stays registered with no source until a listener or relay pull arrives.
        const ON_DEMAND = 0b0000_0010;
        /// New listener accept is paused (e.g. while swapping sources).
        const PAUSE_LISTENERS = 0b0000_0100;
        /// Mount is tearing down; no new listeners admitted, existing ones draining.
        const TERMINATING = 0b0000_1000;
        /// A listener add/remove is in flight; readers should retry.
        const LISTENERS_SYNC = 0b0001_0000;
        /// Source has gone quiet past its configured timeout.
        const TIMEOUT = 0b0010_0000;
    }
}

/// Per-listener bookkeeping the mount keeps alongside its writer state.
pub struct ListenerHandle {
    pub id: Uuid,
    pub writer: Mutex<ListenerWriter>,
}

/// One stream endpoint: ingest format, queue, and attached listeners.
pub struct Mount {
    pub mountpoint: String,
    pub config: MountConfig,
    flags: Mutex<MountFlags>,
    pub queue: MountQueue,
    pub source: Mutex<SourceFormat>,
    listeners: DashMap<Uuid, Arc<ListenerHandle>>,
    termination_count: AtomicUsize,
}

impl Mount {
    pub fn new(config: MountConfig) -> Self {
        let mountpoint = config.mountpoint.clone();
        let queue_capacity = (1_000_000 / config.queue_block_size.max(1)).max(4);
        let mut source = SourceFormat::new(mountpoint.clone());
        source.apply_settings(&config);
        let initial_flags = if config.on_demand {
            MountFlags::ON_DEMAND
        } else {
            MountFlags::empty()
        };
        Self {
            mountpoint,
            config,
            flags: Mutex::new(initial_flags),
            queue: MountQueue::new(queue_capacity),
            source: Mutex::new(source),
            listeners: DashMap::new(),
            termination_count: AtomicUsize::new(0),
        }
    }

    pub fn flags(&self) -> MountFlags {
        *self.flags.lock()
    }

    pub fn set_running(&self, running: bool) {
        let mut flags = self.flags.lock();
        flags.set(MountFlags::RUNNING, running);
    }

    pub fn is_terminating(&self) -> bool {
        self.flags.lock().contains(MountFlags::TERMINATING)
    }

    pub fn begin_termination(&self) {
        self.flags.lock().insert(MountFlags::TERMINATING);
    }

    /// Registers a new listener at the given mode, starting from the ring's
    /// current tail (live audio only, no backlog replay).
    pub fn add_listener(&self, mode: ListenerMode) -> RelayResult<Uuid> {
        if self.flags.lock().contains(MountFlags::TERMINATING) {
            return Err(RelayCoreError::InvalidRequest(format!(
                "mount {} is terminating",
                self.mountpoint
            )));
        }
        let id = Uuid::new_v4();
        let writer = ListenerWriter::new(mode, self.queue.tail_seq(), self.config.icy_metaint);
        self.listeners.insert(
            id,
            Arc::new(ListenerHandle {
                id,
                writer: Mutex::new(writer),
            }),
        );
        Ok(id)
    }

    pub fn remove_listener(&self, id: Uuid) {
        if self.listeners.remove(&id).is_some() {
            self.termination_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn listener(&self, id: Uuid) -> Option<Arc<ListenerHandle>> {
        self.listeners.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener_ids(&self) -> Vec<Uuid> {
        self.listeners.iter().map(|r| *r.key()).collect()
    }
}

/// Process-wide keyed directory of active mounts.
pub struct MountRegistry {
    mounts: DashMap<String, Arc<Mount>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            mounts: DashMap::new(),
        }
    }

    pub fn create(&self, config: MountConfig) -> Arc<Mount> {
        let mount = Arc::new(Mount::new(config));
        self.mounts.insert(mount.mountpoint.clone(), Arc::clone(&mount));
        mount
    }

    pub fn get(&self, mountpoint: &str) -> Option<Arc<Mount>> {
        self.mounts.get(mountpoint).map(|r| Arc::clone(r.value()))
    }

    pub fn get_or_create(&self, config: MountConfig) -> Arc<Mount> {
        if let Some(existing) = self.get(&config.mountpoint) {
            return existing;
        }
        self.create(config)
    }

    pub fn remove(&self, mountpoint: &str) -> Option<Arc<Mount>> {
        self.mounts.remove(mountpoint).map(|(_, m)| m)
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.len()
    }

    pub fn mountpoints(&self) -> Vec<String> {
        self.mounts.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(mountpoint: &str) -> MountConfig {
        MountConfig {
            mountpoint: mountpoint.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn fresh_mount_has_no_listeners_and_is_not_terminating() {
        let mount = Mount::new(test_config("/live.mp3"));
        assert_eq!(mount.listener_count(), 0);
        assert!(!mount.is_terminating());
    }

    #[test]
    fn add_and_remove_listener_round_trips() {
        let mount = Mount::new(test_config("/live.mp3"));
        let id = mount.add_listener(ListenerMode::Plain).unwrap();
        assert_eq!(mount.listener_count(), 1);
        assert!(mount.listener(id).is_some());
        mount.remove_listener(id);
        assert_eq!(mount.listener_count(), 0);
    }

    #[test]
    fn terminating_mount_refuses_new_listeners() {
        let mount = Mount::new(test_config("/live.mp3"));
        mount.begin_termination();
        assert!(mount.add_listener(ListenerMode::Plain).is_err());
    }

    #[test]
    fn registry_get_or_create_reuses_existing_mount() {
        let registry = MountRegistry::new();
        let a = registry.get_or_create(test_config("/live.mp3"));
        let b = registry.get_or_create(test_config("/live.mp3"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.mount_count(), 1);
    }

    #[test]
    fn registry_remove_drops_the_mount() {
        let registry = MountRegistry::new();
        registry.create(test_config("/live.mp3"));
        assert!(registry.remove("/live.mp3").is_some());
        assert_eq!(registry.mount_count(), 0);
    }
}
