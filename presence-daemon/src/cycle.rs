//! Polling loop: the one cycle that runs on every tick, wiring the engine
//! crate's building blocks together against a live adapter and registry.
//!
//! Order matters here and mirrors the original scanner's loop body: drain
//! fast-path events first so a just-paired device counts as a signal before
//! anything else runs, free ACL slots before probing so the adapter has
//! room, and only decide/publish after every signal source for the cycle
//! has been collected.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use presence_protocol::{
    decide, note_transition, probe_batch, select_probe_set, AdapterDriver, AttendanceEntry, DeviceRecord,
    DeviceStatus, FastPathQueue, L2pingResistance, MacAddress, NewDevice, Overrides, PairingAgentState,
    PresenceStatus, RegistryClient, SchedulerState, SignalSource,
};
use presence_protocol::state::{EngineState, UnpublishedDevice};
use tracing::{debug, info};

use crate::config::Config;
use crate::error_handler::ErrorHandler;

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Owns everything a polling cycle needs that survives across ticks:
/// adapter/registry handles, shared pairing state, and the engine-local
/// bookkeeping (`EngineState`, `SchedulerState`, resistance counters,
/// overrides).
pub struct Cycle {
    adapter: Arc<dyn AdapterDriver>,
    registry: Arc<dyn RegistryClient>,
    pairing: PairingAgentState,
    fast_path: Arc<FastPathQueue>,
    config: Config,
    override_path: Option<PathBuf>,
    error_handler: ErrorHandler,

    engine: EngineState,
    scheduler_state: SchedulerState,
    resistance: L2pingResistance,
    overrides: Overrides,
    last_override_reload: Option<Instant>,
}

impl Cycle {
    pub fn new(
        adapter: Arc<dyn AdapterDriver>,
        registry: Arc<dyn RegistryClient>,
        pairing: PairingAgentState,
        fast_path: Arc<FastPathQueue>,
        config: Config,
    ) -> Self {
        let override_path = config.device_override_file.as_ref().map(PathBuf::from);
        Self {
            adapter,
            registry,
            pairing,
            fast_path,
            config,
            override_path,
            error_handler: ErrorHandler::new(),
            engine: EngineState::new(),
            scheduler_state: SchedulerState::default(),
            resistance: L2pingResistance::new(),
            overrides: Overrides::default(),
            last_override_reload: None,
        }
    }

    /// Runs exactly one polling cycle. Never panics: every fallible step is
    /// routed through the error handler and logged, never propagated.
    pub async fn run_once(&mut self) {
        let now = Instant::now();
        let wall_now = unix_now();
        let mut any_signal_this_cycle = false;

        if let Some(path) = self.override_path.clone() {
            let due = self
                .last_override_reload
                .map_or(true, |t| now.saturating_duration_since(t) >= self.config.device_override_refresh);
            if due {
                self.overrides = Overrides::reload(&path);
                self.last_override_reload = Some(now);
            }
        }

        for event in self.fast_path.drain() {
            self.engine.record_signal(&event.mac, now, SignalSource::FastPath);
            any_signal_this_cycle = true;
        }

        let connected: HashSet<MacAddress> = self.adapter.list_connected().await.into_iter().collect();
        if !connected.is_empty() {
            any_signal_this_cycle = true;
        }
        for mac in &connected {
            self.engine.record_signal(mac, now, SignalSource::Connected);
            let name = self.adapter.get_device_name(mac).await;
            self.pairing.note_connected(mac, name, now);
        }

        // Free ACL slots before probing: a presence tracker has no use for
        // holding a link open once it's counted as this cycle's signal.
        for mac in &connected {
            self.adapter.disconnect(mac).await;
        }

        let devices = self.registry.get_devices().await;
        let by_mac: HashMap<MacAddress, DeviceRecord> = devices.into_iter().map(|d| (d.mac.clone(), d)).collect();

        self.reconcile_unpublished(now, wall_now).await;

        let mut candidates: Vec<MacAddress> = by_mac.keys().cloned().collect();
        for mac in self.engine.unpublished.keys() {
            if !candidates.contains(mac) {
                candidates.push(mac.clone());
            }
        }
        let newly_registered: HashSet<MacAddress> = self
            .engine
            .unpublished
            .iter()
            .filter(|(mac, _)| !self.engine.last_presence_signal.contains_key(mac))
            .map(|(mac, _)| mac.clone())
            .collect();

        let selected = select_probe_set(
            &candidates,
            &connected,
            &newly_registered,
            &self.engine.last_presence_signal,
            now,
            &self.config.scheduler_config(),
            &mut self.scheduler_state,
        );

        let probe_results = probe_batch(self.adapter.as_ref(), &selected, &self.resistance, &self.config.probe_config()).await;
        for (mac, success) in &probe_results {
            if *success {
                self.engine.record_signal(mac, now, SignalSource::L2ping);
                any_signal_this_cycle = true;
            } else {
                self.engine.record_miss(mac);
            }
        }

        self.engine.observe_cycle_signal_count(any_signal_this_cycle);

        self.register_newly_seen(&connected, &probe_results, &by_mac, now, wall_now).await;

        self.publish_decisions(&by_mac, any_signal_this_cycle, now, wall_now).await;

        if let Err(e) = self.registry.cleanup_expired_grace_periods(wall_now).await {
            self.error_handler.handle(&e, "cleanup_expired_grace_periods");
        }

        for mac in self.pairing.cleanup_failed_pairings(now) {
            debug!(mac = %mac, "removing stale pairing");
            self.adapter.remove(&mac).await;
            self.pairing.reset_device_state(&mac);
        }

        let known: HashSet<MacAddress> = by_mac.keys().cloned().chain(self.engine.unpublished.keys().cloned()).collect();
        self.engine.prune(&known);
    }

    /// Retries or expires pending registrations that haven't made it into
    /// the registry yet.
    async fn reconcile_unpublished(&mut self, now: Instant, wall_now: i64) {
        let macs: Vec<MacAddress> = self.engine.unpublished.keys().cloned().collect();
        for mac in macs {
            let Some(entry) = self.engine.unpublished.get(&mac) else { continue };

            if now.saturating_duration_since(entry.last_seen) >= self.config.unpublished_device_ttl {
                debug!(mac = %mac, "dropping unpublished device past its TTL");
                self.engine.unpublished.remove(&mac);
                self.engine.failed_registrations.remove(&mac);
                continue;
            }

            let due = entry
                .last_attempt
                .map_or(true, |t| now.saturating_duration_since(t) >= self.config.registration_retry_interval);
            if due {
                let name = entry.name.clone();
                self.try_register(&mac, name, now, wall_now).await;
            }
        }
    }

    /// Registers `mac` with the registry if and only if the pairing agent
    /// has reported it `paired`; otherwise it stays in `unpublished` and is
    /// retried on the next `registration_retry_interval` tick.
    async fn try_register(&mut self, mac: &MacAddress, name: Option<String>, now: Instant, wall_now: i64) {
        if let Some(entry) = self.engine.unpublished.get_mut(mac) {
            entry.last_attempt = Some(now);
        }

        if !self.pairing.is_paired(mac) {
            debug!(mac = %mac, "registration refused: not yet paired");
            return;
        }

        let grace_period_end = wall_now + self.config.grace_period.as_secs() as i64;
        let device = NewDevice { mac: mac.clone(), name, grace_period_end };

        match self.registry.register_pending_device(device).await {
            Ok(()) => {
                self.engine.unpublished.remove(mac);
                self.engine.failed_registrations.remove(mac);
            }
            Err(e) => {
                self.engine.failed_registrations.insert(mac.clone());
                self.error_handler.handle(&e, "register_pending_device");
            }
        }
    }

    /// Adds MACs with a signal this cycle that the registry has never heard
    /// of to the unpublished set and attempts registration immediately.
    async fn register_newly_seen(
        &mut self,
        connected: &HashSet<MacAddress>,
        probe_results: &HashMap<MacAddress, bool>,
        by_mac: &HashMap<MacAddress, DeviceRecord>,
        now: Instant,
        wall_now: i64,
    ) {
        let mut seen: HashSet<MacAddress> = connected.clone();
        seen.extend(probe_results.iter().filter(|(_, ok)| **ok).map(|(mac, _)| mac.clone()));

        for mac in seen {
            if by_mac.contains_key(&mac) {
                continue;
            }
            if let Some(entry) = self.engine.unpublished.get_mut(&mac) {
                entry.last_seen = now;
                continue;
            }

            let name = self.adapter.get_device_name(&mac).await;
            self.engine
                .unpublished
                .insert(mac.clone(), UnpublishedDevice { name: name.clone(), last_seen: now, last_attempt: None });
            self.try_register(&mac, name, now, wall_now).await;
        }
    }

    /// Runs the decision engine over every registered device and publishes
    /// status changes plus attendance entries for anything that flipped.
    async fn publish_decisions(
        &mut self,
        by_mac: &HashMap<MacAddress, DeviceRecord>,
        any_signal_this_cycle: bool,
        now: Instant,
        wall_now: i64,
    ) {
        let decision_config = self.config.decision_config();
        let registered_macs: Vec<MacAddress> =
            by_mac.iter().filter(|(_, record)| record.is_registered()).map(|(mac, _)| mac.clone()).collect();

        for mac in registered_macs {
            let signal_detected = self.engine.last_presence_signal.get(&mac).is_some_and(|ts| *ts == now);
            let decision = decide(&mac, signal_detected, any_signal_this_cycle, now, &self.engine, &self.overrides, &decision_config);
            let new_status = if decision.present { PresenceStatus::Present } else { PresenceStatus::Absent };
            let previous = self.engine.previous_status.get(&mac).copied();

            if previous == Some(new_status) {
                continue;
            }

            note_transition(&mac, now, &mut self.engine, &decision_config);
            self.engine.previous_status.insert(mac.clone(), new_status);

            let wire_status = if decision.present { DeviceStatus::Present } else { DeviceStatus::Absent };
            info!(mac = %mac, status = ?wire_status, reason = ?decision.reason, "presence transition");

            if let Err(e) = self.registry.update_device_status(&mac, wire_status).await {
                self.error_handler.handle(&e, "update_device_status");
            }
            if let Err(e) = self.registry.log_attendance(AttendanceEntry { mac: mac.clone(), status: wire_status, at: wall_now }).await {
                self.error_handler.handle(&e, "log_attendance");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_protocol::adapter::fake::FakeAdapterDriver;
    use presence_protocol::registry::fake::FakeRegistryClient;
    use std::time::Duration;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn harness() -> (Cycle, Arc<FakeAdapterDriver>, Arc<FakeRegistryClient>) {
        let adapter = Arc::new(FakeAdapterDriver::new());
        let registry = Arc::new(FakeRegistryClient::new());
        let fast_path = Arc::new(FastPathQueue::new(16, Duration::from_secs(30)));
        let pairing = PairingAgentState::new(fast_path.clone(), Duration::from_secs(30));
        let mut config = Config::from_env();
        config.grace_period = Duration::from_secs(300);
        config.registration_retry_interval = Duration::from_secs(60);

        let cycle = Cycle::new(adapter.clone(), registry.clone(), pairing, fast_path, config);
        (cycle, adapter, registry)
    }

    #[tokio::test]
    async fn cold_start_registers_a_newly_seen_paired_device() {
        let (mut cycle, adapter, registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:01");
        adapter.set_connected([target.clone()]);
        adapter.set_name(target.clone(), "Phone");
        cycle.pairing.start_pairing_request(target.clone(), Instant::now());
        cycle.pairing.mark_paired(&target);

        cycle.run_once().await;

        assert_eq!(registry.registered(), vec![target]);
    }

    #[tokio::test]
    async fn unpaired_device_is_seen_but_not_registered() {
        let (mut cycle, adapter, registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:08");
        adapter.set_connected([target.clone()]);
        adapter.set_name(target.clone(), "Phone");

        cycle.run_once().await;

        assert!(registry.registered().is_empty());
        assert!(cycle.engine.unpublished.contains_key(&target));
    }

    #[tokio::test]
    async fn registered_present_device_publishes_present_on_first_signal() {
        let (mut cycle, adapter, registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:02");
        registry.seed(DeviceRecord {
            mac: target.clone(),
            name: Some("Watch".into()),
            first_name: None,
            last_name: None,
            status: DeviceStatus::Unknown,
            pending_registration: false,
            grace_period_end: None,
            connected_since: None,
        });
        adapter.set_connected([target.clone()]);

        cycle.run_once().await;

        assert_eq!(registry.status_updates(), vec![(target, DeviceStatus::Present)]);
    }

    #[tokio::test]
    async fn acl_is_freed_after_counting_as_a_signal() {
        let (mut cycle, adapter, _registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:03");
        adapter.set_connected([target.clone()]);

        cycle.run_once().await;

        assert_eq!(adapter.disconnect_calls(), vec![target]);
    }

    #[tokio::test]
    async fn registry_write_failure_is_handled_without_panicking() {
        let (mut cycle, adapter, registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:04");
        registry.seed(DeviceRecord {
            mac: target.clone(),
            name: None,
            first_name: None,
            last_name: None,
            status: DeviceStatus::Unknown,
            pending_registration: false,
            grace_period_end: None,
            connected_since: None,
        });
        adapter.set_connected([target]);
        registry.fail_writes();

        cycle.run_once().await;
    }

    #[tokio::test]
    async fn fast_path_event_marks_a_registered_device_present_without_a_probe() {
        let (mut cycle, adapter, registry) = harness();
        let target = mac("AA:BB:CC:DD:EE:05");
        registry.seed(DeviceRecord {
            mac: target.clone(),
            name: Some("Laptop".into()),
            first_name: None,
            last_name: None,
            status: DeviceStatus::Unknown,
            pending_registration: false,
            grace_period_end: None,
            connected_since: None,
        });

        cycle.pairing.start_pairing_request(target.clone(), Instant::now());
        cycle.pairing.mark_paired(&target);
        cycle.pairing.note_connected(&target, Some("Laptop".into()), Instant::now());

        cycle.run_once().await;

        assert_eq!(registry.status_updates(), vec![(target, DeviceStatus::Present)]);
        assert!(adapter.l2ping_calls().is_empty());
    }

    #[tokio::test]
    async fn walks_out_of_range_holds_then_flips_absent() {
        let adapter = Arc::new(FakeAdapterDriver::new());
        let registry = Arc::new(FakeRegistryClient::new());
        let fast_path = Arc::new(FastPathQueue::new(16, Duration::from_secs(30)));
        let pairing = PairingAgentState::new(fast_path.clone(), Duration::from_secs(30));
        let mut config = Config::from_env();
        config.all_silent_absence_cycles = 0;
        let mut cycle = Cycle::new(adapter.clone(), registry.clone(), pairing, fast_path, config);

        let target = mac("AA:BB:CC:DD:EE:06");
        registry.seed(DeviceRecord {
            mac: target.clone(),
            name: None,
            first_name: None,
            last_name: None,
            status: DeviceStatus::Present,
            pending_registration: false,
            grace_period_end: None,
            connected_since: None,
        });

        let now = Instant::now();
        cycle.engine.previous_status.insert(target.clone(), PresenceStatus::Present);
        cycle.engine.last_presence_signal.insert(target.clone(), now - Duration::from_secs(90));
        cycle.engine.signal_stats.entry(target.clone()).or_default().consecutive_misses = 1;

        cycle.run_once().await;
        assert!(registry.status_updates().is_empty(), "should hold present during the absence-hold window");

        cycle.engine.last_presence_signal.insert(target.clone(), now - Duration::from_secs(9999));
        cycle.engine.signal_stats.entry(target.clone()).or_default().consecutive_misses = 10;

        cycle.run_once().await;
        assert_eq!(registry.status_updates(), vec![(target, DeviceStatus::Absent)]);
    }
}
