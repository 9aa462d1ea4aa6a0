//! Device Scheduler: decides which MACs get probed this cycle.
//!
//! Three tiers by last-signal age (active/warm/cold), with active always
//! fully probed and warm/cold rotating through a bounded batch each cycle
//! so every device gets probed eventually without flooding the adapter.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::mac::MacAddress;

pub struct SchedulerConfig {
    pub present_ttl: Duration,
    pub warm_tier_threshold: Duration,
    pub active_tier_max: usize,
    pub warm_tier_batch: usize,
    pub cold_tier_batch: usize,
}

/// Rotation offsets carried across cycles so warm/cold tiers advance
/// instead of re-probing the same prefix forever.
#[derive(Default)]
pub struct SchedulerState {
    warm_offset: usize,
    cold_offset: usize,
}

enum Tier {
    Active,
    Warm,
    Cold,
}

fn classify(mac: &MacAddress, now: Instant, last_signal: Option<Instant>, newly_registered: &HashSet<MacAddress>, config: &SchedulerConfig) -> Tier {
    match last_signal {
        Some(ts) => {
            let age = now.saturating_duration_since(ts);
            if age <= config.present_ttl {
                Tier::Active
            } else if age <= config.warm_tier_threshold {
                Tier::Warm
            } else {
                Tier::Cold
            }
        }
        None => {
            if newly_registered.contains(mac) {
                Tier::Active
            } else {
                Tier::Cold
            }
        }
    }
}

/// Selects the MACs to probe this cycle out of `candidates` (the union of
/// registered and pending devices), excluding anything already connected.
pub fn select_probe_set(
    candidates: &[MacAddress],
    connected_set: &HashSet<MacAddress>,
    newly_registered: &HashSet<MacAddress>,
    last_presence_signal: &std::collections::HashMap<MacAddress, Instant>,
    now: Instant,
    config: &SchedulerConfig,
    state: &mut SchedulerState,
) -> Vec<MacAddress> {
    let mut sorted: Vec<&MacAddress> = candidates.iter().filter(|mac| !connected_set.contains(*mac)).collect();
    sorted.sort();

    let mut active = Vec::new();
    let mut warm = Vec::new();
    let mut cold = Vec::new();

    for mac in sorted {
        let last_signal = last_presence_signal.get(mac).copied();
        match classify(mac, now, last_signal, newly_registered, config) {
            Tier::Active => active.push(mac.clone()),
            Tier::Warm => warm.push(mac.clone()),
            Tier::Cold => cold.push(mac.clone()),
        }
    }

    let mut selected = Vec::new();
    active.truncate(config.active_tier_max);
    selected.extend(active);

    selected.extend(rotate_select(&warm, config.warm_tier_batch, &mut state.warm_offset));
    selected.extend(rotate_select(&cold, config.cold_tier_batch, &mut state.cold_offset));

    selected
}

/// Picks up to `batch` entries starting at `offset` (mod tier length),
/// wrapping around, and advances `offset` by however many were taken.
fn rotate_select(tier: &[MacAddress], batch: usize, offset: &mut usize) -> Vec<MacAddress> {
    if tier.is_empty() || batch == 0 {
        return Vec::new();
    }
    let len = tier.len();
    let take = batch.min(len);
    let start = *offset % len;

    let mut picked = Vec::with_capacity(take);
    for i in 0..take {
        picked.push(tier[(start + i) % len].clone());
    }
    *offset = (start + take) % len;
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            present_ttl: Duration::from_secs(60),
            warm_tier_threshold: Duration::from_secs(300),
            active_tier_max: 10,
            warm_tier_batch: 2,
            cold_tier_batch: 2,
        }
    }

    #[test]
    fn active_devices_always_selected() {
        let now = Instant::now();
        let m1 = mac("AA:BB:CC:DD:EE:01");
        let mut signals = HashMap::new();
        signals.insert(m1.clone(), now);

        let mut state = SchedulerState::default();
        let selected = select_probe_set(&[m1.clone()], &HashSet::new(), &HashSet::new(), &signals, now, &config(), &mut state);

        assert_eq!(selected, vec![m1]);
    }

    #[test]
    fn connected_macs_excluded() {
        let now = Instant::now();
        let m1 = mac("AA:BB:CC:DD:EE:01");
        let mut connected = HashSet::new();
        connected.insert(m1.clone());

        let mut state = SchedulerState::default();
        let selected = select_probe_set(&[m1], &connected, &HashSet::new(), &HashMap::new(), now, &config(), &mut state);

        assert!(selected.is_empty());
    }

    #[test]
    fn never_seen_newly_registered_counts_as_active() {
        let now = Instant::now();
        let m1 = mac("AA:BB:CC:DD:EE:01");
        let mut newly_registered = HashSet::new();
        newly_registered.insert(m1.clone());

        let mut state = SchedulerState::default();
        let selected = select_probe_set(&[m1.clone()], &HashSet::new(), &newly_registered, &HashMap::new(), now, &config(), &mut state);

        assert_eq!(selected, vec![m1]);
    }

    #[test]
    fn cold_tier_rotates_across_cycles() {
        let now = Instant::now();
        let macs: Vec<MacAddress> =
            (1..=6).map(|i| mac(&format!("AA:BB:CC:DD:EE:0{i}"))).collect();
        let cfg = config();
        let mut state = SchedulerState::default();

        let first = select_probe_set(&macs, &HashSet::new(), &HashSet::new(), &HashMap::new(), now, &cfg, &mut state);
        let second = select_probe_set(&macs, &HashSet::new(), &HashSet::new(), &HashMap::new(), now, &cfg, &mut state);

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_ne!(first, second, "rotation offset should advance between cycles");
    }
}
