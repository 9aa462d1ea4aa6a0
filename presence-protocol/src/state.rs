//! Engine-local per-MAC state the decision engine and polling loop share.
//!
//! Everything here is in-memory only and rebuilt from the live adapter and
//! the remote registry on every restart — nothing is persisted across
//! process lifetimes.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Connected,
    L2ping,
    ConnectProbe,
    FastPath,
}

#[derive(Debug, Clone)]
pub struct SignalStats {
    pub consecutive_hits: u32,
    pub consecutive_misses: u32,
    pub last_signal_ts: Option<Instant>,
    pub last_signal_source: Option<SignalSource>,
}

impl Default for SignalStats {
    fn default() -> Self {
        Self { consecutive_hits: 0, consecutive_misses: 0, last_signal_ts: None, last_signal_source: None }
    }
}

impl SignalStats {
    pub fn record_hit(&mut self, now: Instant, source: SignalSource) {
        self.consecutive_hits += 1;
        self.consecutive_misses = 0;
        self.last_signal_ts = Some(now);
        self.last_signal_source = Some(source);
    }

    pub fn record_miss(&mut self) {
        self.consecutive_misses += 1;
        self.consecutive_hits = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Present,
    Absent,
}

/// Aggregated in-memory engine state, keyed by MAC. A MAC only appears once
/// it's been observed or registered; absence from these maps is not a
/// signal by itself.
#[derive(Default)]
pub struct EngineState {
    pub last_presence_signal: HashMap<MacAddress, Instant>,
    pub signal_stats: HashMap<MacAddress, SignalStats>,
    pub transition_history: HashMap<MacAddress, VecDeque<Instant>>,
    pub freeze_until: HashMap<MacAddress, Instant>,
    pub previous_status: HashMap<MacAddress, PresenceStatus>,
    pub unpublished: HashMap<MacAddress, UnpublishedDevice>,
    pub failed_registrations: std::collections::HashSet<MacAddress>,
    pub silent_cycle_streak: u32,
}

#[derive(Debug, Clone)]
pub struct UnpublishedDevice {
    pub name: Option<String>,
    pub last_seen: Instant,
    pub last_attempt: Option<Instant>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `last_presence_signal` is monotonic: a stale write (earlier than the
    /// current value) is a no-op.
    pub fn record_signal(&mut self, mac: &MacAddress, now: Instant, source: SignalSource) {
        let advance = match self.last_presence_signal.get(mac) {
            Some(prev) => now >= *prev,
            None => true,
        };
        if advance {
            self.last_presence_signal.insert(mac.clone(), now);
        }
        self.signal_stats.entry(mac.clone()).or_default().record_hit(now, source);
    }

    pub fn record_miss(&mut self, mac: &MacAddress) {
        self.signal_stats.entry(mac.clone()).or_default().record_miss();
    }

    /// Appends `now` to the MAC's transition history, trims anything older
    /// than `window`, and returns whether the device is now flapping
    /// (history length at or above `threshold`).
    pub fn record_transition(&mut self, mac: &MacAddress, now: Instant, window: Duration, threshold: usize) -> bool {
        let history = self.transition_history.entry(mac.clone()).or_default();
        history.push_back(now);
        while let Some(front) = history.front() {
            if now.saturating_duration_since(*front) > window {
                history.pop_front();
            } else {
                break;
            }
        }
        history.len() >= threshold
    }

    pub fn freeze(&mut self, mac: &MacAddress, until: Instant) {
        self.freeze_until.insert(mac.clone(), until);
    }

    pub fn is_frozen(&self, mac: &MacAddress, now: Instant) -> bool {
        self.freeze_until.get(mac).is_some_and(|until| *until > now)
    }

    /// Zero-signal cycles reset the flap streak; any signalled cycle breaks
    /// it, per the silent-cycle grace rule.
    pub fn observe_cycle_signal_count(&mut self, any_signal_this_cycle: bool) {
        if any_signal_this_cycle {
            self.silent_cycle_streak = 0;
        } else {
            self.silent_cycle_streak += 1;
        }
    }

    pub fn prune(&mut self, known_macs: &std::collections::HashSet<MacAddress>) {
        self.last_presence_signal.retain(|mac, _| known_macs.contains(mac));
        self.signal_stats.retain(|mac, _| known_macs.contains(mac));
        self.transition_history.retain(|mac, _| known_macs.contains(mac));
        self.freeze_until.retain(|mac, _| known_macs.contains(mac));
        self.previous_status.retain(|mac, _| known_macs.contains(mac));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[test]
    fn record_signal_is_monotonic() {
        let mut state = EngineState::new();
        let m = mac("AA:BB:CC:DD:EE:01");
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);

        state.record_signal(&m, t1, SignalSource::Connected);
        state.record_signal(&m, t0, SignalSource::L2ping);

        assert_eq!(state.last_presence_signal[&m], t1);
    }

    #[test]
    fn transition_history_trims_outside_window() {
        let mut state = EngineState::new();
        let m = mac("AA:BB:CC:DD:EE:02");
        let t0 = Instant::now();

        state.record_transition(&m, t0, Duration::from_secs(60), 4);
        let flapping =
            state.record_transition(&m, t0 + Duration::from_secs(120), Duration::from_secs(60), 4);

        assert!(!flapping);
        assert_eq!(state.transition_history[&m].len(), 1);
    }

    #[test]
    fn flap_threshold_trips_at_configured_count() {
        let mut state = EngineState::new();
        let m = mac("AA:BB:CC:DD:EE:03");
        let t0 = Instant::now();
        let window = Duration::from_secs(3600);

        assert!(!state.record_transition(&m, t0, window, 4));
        assert!(!state.record_transition(&m, t0 + Duration::from_secs(10), window, 4));
        assert!(!state.record_transition(&m, t0 + Duration::from_secs(20), window, 4));
        assert!(state.record_transition(&m, t0 + Duration::from_secs(30), window, 4));
    }

    #[test]
    fn freeze_suppresses_until_elapsed() {
        let mut state = EngineState::new();
        let m = mac("AA:BB:CC:DD:EE:04");
        let now = Instant::now();
        state.freeze(&m, now + Duration::from_secs(300));

        assert!(state.is_frozen(&m, now));
        assert!(!state.is_frozen(&m, now + Duration::from_secs(301)));
    }
}
