//! Presence Decision Engine: turns this cycle's signals into a final
//! present/absent verdict per registered MAC.

use std::time::{Duration, Instant};

use crate::mac::MacAddress;
use crate::overrides::Overrides;
use crate::state::{EngineState, PresenceStatus};

pub struct DecisionConfig {
    pub present_ttl: Duration,
    pub enable_adaptive_hysteresis: bool,
    pub absence_hold: Duration,
    pub absence_consecutive_miss_threshold: u32,
    pub flap_monitor_window: Duration,
    pub flap_alert_threshold: usize,
    pub enable_auto_freeze_on_flap: bool,
    pub auto_freeze_duration: Duration,
    pub all_silent_absence_cycles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub present: bool,
    pub reason: DecisionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Quarantine,
    Force,
    Frozen,
    Ttl,
    TtlExpired,
    AbsenceHold,
    AdaptiveAbsent,
    SilentGrace,
}

/// Decides the status for a single MAC. `signal_detected_this_cycle` is the
/// union of the connected set, probe successes, and fast-path events for
/// this cycle; `any_signal_this_cycle` is that same union across *all*
/// MACs, used for the silent-cycle grace check.
pub fn decide(
    mac: &MacAddress,
    signal_detected_this_cycle: bool,
    any_signal_this_cycle: bool,
    now: Instant,
    state: &EngineState,
    overrides: &Overrides,
    config: &DecisionConfig,
) -> Decision {
    if overrides.is_quarantined(mac) {
        return Decision { present: false, reason: DecisionReason::Quarantine };
    }

    if let Some(forced) = overrides.forced_status(mac) {
        return Decision { present: forced, reason: DecisionReason::Force };
    }

    let previous_status = state.previous_status.get(mac).copied();

    if state.is_frozen(mac, now) {
        if let Some(prev) = previous_status {
            return Decision { present: prev == PresenceStatus::Present, reason: DecisionReason::Frozen };
        }
    }

    if signal_detected_this_cycle {
        return Decision { present: true, reason: DecisionReason::Ttl };
    }

    let signal_age = state.last_presence_signal.get(mac).map(|ts| now.saturating_duration_since(*ts));
    if let Some(age) = signal_age {
        if age <= config.present_ttl {
            return Decision { present: true, reason: DecisionReason::Ttl };
        }
    }

    if !config.enable_adaptive_hysteresis {
        return maybe_silent_grace(state, config, previous_status, DecisionReason::TtlExpired);
    }

    let consecutive_misses = state.signal_stats.get(mac).map(|s| s.consecutive_misses).unwrap_or(0);
    let hold_expired = signal_age.is_some_and(|age| age >= config.absence_hold)
        && consecutive_misses >= config.absence_consecutive_miss_threshold;

    if previous_status == Some(PresenceStatus::Present) && !hold_expired {
        return Decision { present: true, reason: DecisionReason::AbsenceHold };
    }

    maybe_silent_grace(state, config, previous_status, DecisionReason::AdaptiveAbsent)
}

/// If zero devices signalled this cycle and the silent streak is still
/// within grace, hold the previous status instead of flipping to absent.
fn maybe_silent_grace(
    state: &EngineState,
    config: &DecisionConfig,
    previous_status: Option<PresenceStatus>,
    fallback: DecisionReason,
) -> Decision {
    if state.silent_cycle_streak <= config.all_silent_absence_cycles {
        if let Some(prev) = previous_status {
            return Decision { present: prev == PresenceStatus::Present, reason: DecisionReason::SilentGrace };
        }
    }
    Decision { present: false, reason: fallback }
}

/// Runs the flap detector for a status transition and freezes the device
/// if it's flapping and auto-freeze is enabled. Call only when the
/// published status is actually about to change.
pub fn note_transition(mac: &MacAddress, now: Instant, state: &mut EngineState, config: &DecisionConfig) {
    let flapping = state.record_transition(mac, now, config.flap_monitor_window, config.flap_alert_threshold);
    if flapping && config.enable_auto_freeze_on_flap {
        state.freeze(mac, now + config.auto_freeze_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn config() -> DecisionConfig {
        DecisionConfig {
            present_ttl: Duration::from_secs(30),
            enable_adaptive_hysteresis: true,
            absence_hold: Duration::from_secs(60),
            absence_consecutive_miss_threshold: 2,
            flap_monitor_window: Duration::from_secs(3600),
            flap_alert_threshold: 4,
            enable_auto_freeze_on_flap: true,
            auto_freeze_duration: Duration::from_secs(300),
            all_silent_absence_cycles: 0,
        }
    }

    #[test]
    fn quarantine_overrides_everything() {
        let m = mac("AA:BB:CC:DD:EE:01");
        let mut overrides = Overrides::default();
        overrides.quarantine.insert(m.clone());

        let state = EngineState::new();
        let decision = decide(&m, true, true, Instant::now(), &state, &overrides, &config());

        assert_eq!(decision, Decision { present: false, reason: DecisionReason::Quarantine });
    }

    #[test]
    fn force_override_wins_over_signal() {
        let m = mac("AA:BB:CC:DD:EE:02");
        let mut overrides = Overrides::default();
        overrides.force_status.insert(m.clone(), false);

        let state = EngineState::new();
        let decision = decide(&m, true, true, Instant::now(), &state, &overrides, &config());

        assert_eq!(decision, Decision { present: false, reason: DecisionReason::Force });
    }

    #[test]
    fn walks_out_of_range_scenario() {
        let m = mac("AA:BB:CC:DD:EE:03");
        let now = Instant::now();
        let mut state = EngineState::new();
        state.previous_status.insert(m.clone(), PresenceStatus::Present);
        state.last_presence_signal.insert(m.clone(), now - Duration::from_secs(45));
        state.signal_stats.entry(m.clone()).or_default().consecutive_misses = 1;

        let cfg = DecisionConfig {
            present_ttl: Duration::from_secs(30),
            absence_hold: Duration::from_secs(60),
            absence_consecutive_miss_threshold: 2,
            ..config()
        };

        let decision = decide(&m, false, true, now, &state, &Overrides::default(), &cfg);
        assert_eq!(decision.reason, DecisionReason::AbsenceHold);
        assert!(decision.present);

        state.last_presence_signal.insert(m.clone(), now - Duration::from_secs(65));
        state.signal_stats.entry(m.clone()).or_default().consecutive_misses = 3;
        let decision = decide(&m, false, true, now, &state, &Overrides::default(), &cfg);
        assert_eq!(decision.reason, DecisionReason::AdaptiveAbsent);
        assert!(!decision.present);
    }

    #[test]
    fn frozen_device_holds_previous_status() {
        let m = mac("AA:BB:CC:DD:EE:04");
        let now = Instant::now();
        let mut state = EngineState::new();
        state.previous_status.insert(m.clone(), PresenceStatus::Present);
        state.freeze(&m, now + Duration::from_secs(300));

        let decision = decide(&m, false, true, now, &state, &Overrides::default(), &config());
        assert_eq!(decision, Decision { present: true, reason: DecisionReason::Frozen });
    }

    #[test]
    fn silent_cycle_grace_holds_status() {
        let m = mac("AA:BB:CC:DD:EE:05");
        let now = Instant::now();
        let mut state = EngineState::new();
        state.previous_status.insert(m.clone(), PresenceStatus::Present);
        state.last_presence_signal.insert(m.clone(), now - Duration::from_secs(1000));
        state.silent_cycle_streak = 0;

        let cfg = DecisionConfig { all_silent_absence_cycles: 1, ..config() };
        let decision = decide(&m, false, false, now, &state, &Overrides::default(), &cfg);

        assert_eq!(decision, Decision { present: true, reason: DecisionReason::SilentGrace });
    }

    #[test]
    fn disabled_hysteresis_flips_immediately_after_ttl() {
        let m = mac("AA:BB:CC:DD:EE:06");
        let now = Instant::now();
        let mut state = EngineState::new();
        state.previous_status.insert(m.clone(), PresenceStatus::Present);
        state.last_presence_signal.insert(m.clone(), now - Duration::from_secs(31));

        let cfg = DecisionConfig { enable_adaptive_hysteresis: false, ..config() };
        let decision = decide(&m, false, true, now, &state, &Overrides::default(), &cfg);

        assert_eq!(decision, Decision { present: false, reason: DecisionReason::TtlExpired });
    }

    #[test]
    fn flap_detector_freezes_after_threshold() {
        let m = mac("AA:BB:CC:DD:EE:07");
        let now = Instant::now();
        let mut state = EngineState::new();
        let cfg = config();

        note_transition(&m, now, &mut state, &cfg);
        note_transition(&m, now + Duration::from_secs(10), &mut state, &cfg);
        note_transition(&m, now + Duration::from_secs(20), &mut state, &cfg);
        assert!(!state.is_frozen(&m, now + Duration::from_secs(20)));

        note_transition(&m, now + Duration::from_secs(30), &mut state, &cfg);
        assert!(state.is_frozen(&m, now + Duration::from_secs(30)));
    }
}
