//! Per-relay client state machine: `Init -> Startup -> Connecting ->
//! Streaming -> Terminating -> (Retry | Dead)`.
//!
//! The transition *decisions* are kept synchronous and clock-free (`step`
//! takes `now` explicitly) so they can be asserted against without driving a
//! real `tokio` runtime, mirroring the cooperative step-function protocol
//! the original reference implementation used. The actual I/O each state
//! implies (opening a TCP connection, running the source producer loop) is
//! carried out by the controller, which calls `begin_connecting`/
//! `report_connect_result`/`report_stream_ended` to drive the transitions
//! that depend on that I/O's outcome.

use std::time::{Duration, Instant};

use crate::config::RelayConfig;
use crate::protocol_constants::{MASTER_SKIP_UPTIME_SECS, MAX_CONNECT_SLOWDOWN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    Startup,
    Connecting,
    Streaming,
    Terminating,
    Retry,
    Dead,
}

/// Externally observed facts `step` needs to decide the next transition;
/// supplied by the controller each tick.
#[derive(Debug, Clone, Copy)]
pub struct RelayCtx {
    pub now: Instant,
    /// `localmount` is already owned by a different relay client.
    pub mount_owned_by_other: bool,
    pub has_listeners: bool,
    pub has_fallback_listeners: bool,
    /// Admission to `Connecting` was granted by the controller's
    /// `MAX_CONCURRENT_CONNECTING` counter.
    pub connecting_admitted: bool,
    /// Global contention slowdown counter, `0..=MAX_CONNECT_SLOWDOWN`.
    pub slowdown: u32,
}

pub struct StepOutcome {
    pub state: RelayState,
    pub reschedule: Duration,
}

pub struct RelayClient {
    pub localmount: String,
    pub config: RelayConfig,
    state: RelayState,
    running: bool,
    cleanup: bool,
    streaming_since: Option<Instant>,
    last_master_index: Option<usize>,
    /// Set while the controller's driver task owns a connect attempt or
    /// streaming pump for this client, so a tick doesn't spawn a second one.
    driving: bool,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            localmount: config.localmount.clone(),
            config,
            state: RelayState::Init,
            running: true,
            cleanup: false,
            streaming_since: None,
            last_master_index: None,
            driving: false,
        }
    }

    pub fn is_driving(&self) -> bool {
        self.driving
    }

    pub fn set_driving(&mut self, driving: bool) {
        self.driving = driving;
    }

    /// Pure predicate mirroring `step_startup`'s on-demand gate, used by the
    /// controller to decide whether to spend a `Connecting` admission slot
    /// on this client before calling `step`.
    pub fn wants_to_connect(&self, has_listeners: bool, has_fallback_listeners: bool) -> bool {
        self.running
            && self.state == RelayState::Startup
            && !(self.config.on_demand && !has_listeners && !has_fallback_listeners)
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `toggle`: running -> will tear down on next step; stopped -> `Init`.
    pub fn toggle(&mut self) {
        self.running = !self.running;
        if self.running && self.state == RelayState::Dead {
            self.state = RelayState::Init;
        }
    }

    pub fn mark_for_cleanup(&mut self) {
        self.cleanup = true;
    }

    fn first_unskipped_master(&self) -> Option<usize> {
        self.config.masters.iter().position(|m| !m.skip)
    }

    /// One synchronous decision step. Does not perform any I/O.
    pub fn step(&mut self, ctx: &RelayCtx) -> StepOutcome {
        match self.state {
            RelayState::Init => {
                if ctx.mount_owned_by_other {
                    return self.outcome(Duration::from_secs(2));
                }
                self.state = RelayState::Startup;
                self.outcome(Duration::ZERO)
            }
            RelayState::Startup => self.step_startup(ctx),
            RelayState::Connecting => {
                // Real progress happens via begin_connecting/report_connect_result,
                // invoked by the controller once its detached task resolves.
                self.outcome(Duration::from_millis(200))
            }
            RelayState::Streaming => {
                if !self.running || self.cleanup {
                    self.state = RelayState::Terminating;
                    return self.outcome(Duration::ZERO);
                }
                self.outcome(Duration::from_secs(1))
            }
            RelayState::Terminating => {
                self.state = if self.cleanup { RelayState::Dead } else { RelayState::Retry };
                self.outcome(Duration::ZERO)
            }
            RelayState::Retry => self.step_retry(ctx),
            RelayState::Dead => self.outcome(Duration::from_secs(3600)),
        }
    }

    fn step_startup(&mut self, ctx: &RelayCtx) -> StepOutcome {
        if !self.running {
            return self.outcome(Duration::from_secs(3600));
        }
        if self.config.on_demand && !ctx.has_listeners && !ctx.has_fallback_listeners {
            let delay = if ctx.has_fallback_listeners {
                Duration::from_secs(self.config.retry_interval_secs)
            } else {
                Duration::from_secs(60)
            };
            return self.outcome(delay);
        }
        if !ctx.connecting_admitted {
            let backoff = 200 * (1 + ctx.slowdown.min(MAX_CONNECT_SLOWDOWN) as u64);
            return self.outcome(Duration::from_millis(backoff));
        }
        self.state = RelayState::Connecting;
        self.outcome(Duration::ZERO)
    }

    fn step_retry(&mut self, ctx: &RelayCtx) -> StepOutcome {
        let uptime = self.streaming_since.map(|since| ctx.now.saturating_duration_since(since));
        let long_enough = uptime.map(|d| d.as_secs() >= MASTER_SKIP_UPTIME_SECS).unwrap_or(false);

        if long_enough {
            for master in &mut self.config.masters {
                master.skip = false;
            }
        } else if let Some(idx) = self.last_master_index {
            if let Some(master) = self.config.masters.get_mut(idx) {
                master.skip = true;
            }
        }

        self.streaming_since = None;
        self.state = RelayState::Startup;
        self.outcome(Duration::from_secs(self.config.retry_interval_secs))
    }

    /// Called by the controller once it has picked a master to try; used
    /// only to know which one to mark `skip` on failure.
    pub fn begin_connecting(&mut self) -> Option<usize> {
        self.first_unskipped_master()
    }

    pub fn report_connect_result(&mut self, master_index: usize, success: bool) {
        if success {
            self.last_master_index = Some(master_index);
            self.streaming_since = Some(Instant::now());
            self.state = RelayState::Streaming;
            return;
        }
        if let Some(master) = self.config.masters.get_mut(master_index) {
            master.skip = true;
        }
        if self.first_unskipped_master().is_none() {
            self.state = RelayState::Retry;
        }
        // else: stays Connecting, controller will retry the next unskipped master.
    }

    pub fn report_stream_ended(&mut self) {
        self.state = RelayState::Terminating;
    }

    fn outcome(&self, reschedule: Duration) -> StepOutcome {
        StepOutcome {
            state: self.state,
            reschedule,
        }
    }
}

/// Reconciles a desired relay set against the current one.
///
/// For each desired relay matching an existing `localmount`, checks whether
/// the master list / `mp3_metadata` / `on_demand` differ; the caller is
/// expected to push the changed descriptor into that client's `new_details`
/// slot. Unmatched desired relays are returned as fresh installs; unmatched
/// existing relays are reported via `to_cleanup`.
pub fn update_relay_set(current: &[RelayConfig], desired: &[RelayConfig]) -> Vec<RelayConfig> {
    let mut next: Vec<RelayConfig> = Vec::with_capacity(desired.len());
    for want in desired {
        match current.iter().find(|c| c.localmount == want.localmount) {
            Some(existing) if existing != want => next.push(want.clone()),
            Some(existing) => next.push(existing.clone()),
            None => next.push(want.clone()),
        }
    }
    next
}

/// Existing relays with no counterpart in `desired`, to be flagged for cleanup.
pub fn relays_to_cleanup(current: &[RelayConfig], desired: &[RelayConfig]) -> Vec<RelayConfig> {
    current
        .iter()
        .filter(|c| !desired.iter().any(|d| d.localmount == c.localmount))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayMaster;

    fn master(ip: &str) -> RelayMaster {
        RelayMaster {
            ip: ip.to_string(),
            port: 8000,
            mount: "/live.mp3".to_string(),
            bind: None,
            timeout_ms: 4000,
            skip: false,
        }
    }

    fn relay_config(localmount: &str) -> RelayConfig {
        RelayConfig {
            localmount: localmount.to_string(),
            masters: vec![master("a.example.com"), master("b.example.com")],
            username: None,
            password: None,
            mp3_metadata: true,
            on_demand: false,
            retry_interval_secs: 15,
        }
    }

    fn ctx(now: Instant) -> RelayCtx {
        RelayCtx {
            now,
            mount_owned_by_other: false,
            has_listeners: true,
            has_fallback_listeners: false,
            connecting_admitted: true,
            slowdown: 0,
        }
    }

    #[test]
    fn init_advances_to_startup_when_mount_is_free() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        let outcome = client.step(&ctx(Instant::now()));
        assert_eq!(outcome.state, RelayState::Startup);
    }

    #[test]
    fn init_defers_when_mount_owned_by_another_relay() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        let mut c = ctx(Instant::now());
        c.mount_owned_by_other = true;
        let outcome = client.step(&c);
        assert_eq!(outcome.state, RelayState::Init);
        assert_eq!(outcome.reschedule, Duration::from_secs(2));
    }

    #[test]
    fn startup_stays_idle_long_when_not_running() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        client.step(&ctx(Instant::now())); // -> Startup
        client.toggle(); // running = false
        let outcome = client.step(&ctx(Instant::now()));
        assert_eq!(outcome.state, RelayState::Startup);
        assert_eq!(outcome.reschedule, Duration::from_secs(3600));
    }

    #[test]
    fn startup_advances_to_connecting_when_admitted() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        client.step(&ctx(Instant::now())); // -> Startup
        let outcome = client.step(&ctx(Instant::now())); // -> Connecting
        assert_eq!(outcome.state, RelayState::Connecting);
    }

    #[test]
    fn startup_backs_off_when_connecting_admission_denied() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        client.step(&ctx(Instant::now())); // -> Startup
        let mut c = ctx(Instant::now());
        c.connecting_admitted = false;
        c.slowdown = 2;
        let outcome = client.step(&c);
        assert_eq!(outcome.state, RelayState::Startup);
        assert_eq!(outcome.reschedule, Duration::from_millis(600));
    }

    #[test]
    fn connect_failure_on_all_masters_transitions_to_retry() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        client.step(&ctx(Instant::now()));
        client.step(&ctx(Instant::now()));
        assert_eq!(client.state(), RelayState::Connecting);
        client.report_connect_result(0, false);
        client.report_connect_result(1, false);
        assert_eq!(client.state(), RelayState::Retry);
    }

    #[test]
    fn connect_success_transitions_to_streaming() {
        let mut client = RelayClient::new(relay_config("/live.mp3"));
        client.step(&ctx(Instant::now()));
        client.step(&ctx(Instant::now()));
        client.report_connect_result(0, true);
        assert_eq!(client.state(), RelayState::Streaming);
    }

    #[test]
    fn update_relay_set_is_idempotent() {
        let current = vec![relay_config("/a"), relay_config("/b")];
        let desired = vec![relay_config("/a"), relay_config("/c")];
        let once = update_relay_set(&current, &desired);
        let twice = update_relay_set(&once, &desired);
        assert_eq!(once, twice);
    }

    #[test]
    fn update_relay_set_keeps_unchanged_existing_descriptor() {
        let current = vec![relay_config("/a")];
        let desired = vec![relay_config("/a")];
        let next = update_relay_set(&current, &desired);
        assert_eq!(next, desired);
    }

    #[test]
    fn relays_to_cleanup_reports_unmatched_existing() {
        let current = vec![relay_config("/a"), relay_config("/b")];
        let desired = vec![relay_config("/a")];
        let cleanup = relays_to_cleanup(&current, &desired);
        assert_eq!(cleanup.len(), 1);
        assert_eq!(cleanup[0].localmount, "/b");
    }
}
