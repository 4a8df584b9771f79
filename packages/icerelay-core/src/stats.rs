//! Statistics reporting: an external collaborator contract plus a
//! log-based default implementation, so an embedder can wire metrics into
//! whatever system it already runs without this crate depending on one.

/// One mount's point-in-time stats snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountStats {
    pub listener_count: usize,
    pub queue_len: usize,
    pub metadata_generation: u64,
}

/// Sink for mount lifecycle and periodic stats events. Implementors decide
/// where these go (structured logs, a metrics registry, a push gateway).
pub trait StatsSink: Send + Sync {
    fn mount_started(&self, mountpoint: &str);
    fn mount_stopped(&self, mountpoint: &str);
    fn listener_connected(&self, mountpoint: &str, listener_count: usize);
    fn listener_disconnected(&self, mountpoint: &str, listener_count: usize);
    fn snapshot(&self, mountpoint: &str, stats: MountStats);
}

/// Default [`StatsSink`] that just logs at `info`/`debug`.
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn mount_started(&self, mountpoint: &str) {
        log::info!("mount {} started", mountpoint);
    }

    fn mount_stopped(&self, mountpoint: &str) {
        log::info!("mount {} stopped", mountpoint);
    }

    fn listener_connected(&self, mountpoint: &str, listener_count: usize) {
        log::debug!("mount {} listener connected ({} total)", mountpoint, listener_count);
    }

    fn listener_disconnected(&self, mountpoint: &str, listener_count: usize) {
        log::debug!("mount {} listener disconnected ({} total)", mountpoint, listener_count);
    }

    fn snapshot(&self, mountpoint: &str, stats: MountStats) {
        log::debug!(
            "mount {} stats: listeners={} queue_len={} metadata_gen={}",
            mountpoint,
            stats.listener_count,
            stats.queue_len,
            stats.metadata_generation
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sink_does_not_panic_on_any_event() {
        let sink = LogStatsSink;
        sink.mount_started("/live.mp3");
        sink.listener_connected("/live.mp3", 1);
        sink.listener_disconnected("/live.mp3", 0);
        sink.snapshot("/live.mp3", MountStats::default());
        sink.mount_stopped("/live.mp3");
    }
}
