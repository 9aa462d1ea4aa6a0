//! Probe Engine: sequential presence verdicts over a MAC list.
//!
//! Mirrors the original scanner's `l2ping_batch` — everything here runs one
//! subprocess at a time. Running l2ping and connect-probe concurrently
//! against the same adapter was the historical source of HCI contention
//! bugs, so this engine never spawns more than one probe in flight.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::adapter::AdapterDriver;
use crate::mac::MacAddress;

/// Consecutive l2ping failures before a MAC is routed straight to
/// connect-probe instead of wasting an l2ping round on it.
const DEFAULT_L2PING_RESIST_THRESHOLD: u32 = 3;

/// Tracks, per MAC, how many consecutive l2pings have failed. A single
/// success resets the counter to zero.
#[derive(Default)]
pub struct L2pingResistance {
    counts: Mutex<HashMap<MacAddress, u32>>,
}

impl L2pingResistance {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_resistant(&self, mac: &MacAddress, threshold: u32) -> bool {
        self.counts.lock().unwrap().get(mac).copied().unwrap_or(0) >= threshold
    }

    fn record_failure(&self, mac: &MacAddress) {
        *self.counts.lock().unwrap().entry(mac.clone()).or_insert(0) += 1;
    }

    fn record_success(&self, mac: &MacAddress) {
        self.counts.lock().unwrap().remove(mac);
    }
}

pub struct ProbeConfig {
    pub l2ping_count: u32,
    pub l2ping_timeout: Duration,
    pub connect_probe_timeout: Duration,
    pub l2ping_resist_threshold: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            l2ping_count: 1,
            l2ping_timeout: Duration::from_secs(5),
            connect_probe_timeout: Duration::from_secs(8),
            l2ping_resist_threshold: DEFAULT_L2PING_RESIST_THRESHOLD,
        }
    }
}

/// Probes `macs` sequentially, returning a verdict for every entry.
///
/// Phase 1 routes each MAC to l2ping unless it's already flagged resistant,
/// in which case it skips straight to the connect-probe queue. Phase 2
/// connect-probes everything that didn't get a positive l2ping result.
/// Every probed MAC is disconnected immediately after its verdict, win or
/// lose, so the ACL budget never holds a link open past its own probe.
pub async fn probe_batch(
    adapter: &dyn AdapterDriver,
    macs: &[MacAddress],
    resistance: &L2pingResistance,
    config: &ProbeConfig,
) -> HashMap<MacAddress, bool> {
    let mut results = HashMap::with_capacity(macs.len());
    let mut connect_probe_queue = Vec::new();

    for mac in macs {
        if resistance.is_resistant(mac, config.l2ping_resist_threshold) {
            connect_probe_queue.push(mac.clone());
            continue;
        }

        let success = adapter.l2ping(mac, config.l2ping_count, config.l2ping_timeout).await;
        results.insert(mac.clone(), success);
        if success {
            resistance.record_success(mac);
            adapter.disconnect(mac).await;
        } else {
            resistance.record_failure(mac);
            connect_probe_queue.push(mac.clone());
        }
    }

    for mac in connect_probe_queue {
        let success = adapter.connect_probe(&mac, config.connect_probe_timeout).await;
        if success {
            resistance.record_success(&mac);
        }
        results.insert(mac.clone(), success);
        adapter.disconnect(&mac).await;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::FakeAdapterDriver;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn l2ping_success_skips_connect_probe() {
        let adapter = FakeAdapterDriver::new();
        let target = mac("AA:BB:CC:DD:EE:01");
        adapter.set_l2ping_success(target.clone());

        let resistance = L2pingResistance::new();
        let results = probe_batch(&adapter, &[target.clone()], &resistance, &ProbeConfig::default()).await;

        assert_eq!(results.get(&target), Some(&true));
        assert!(adapter.connect_probe_calls().is_empty());
        assert_eq!(adapter.disconnect_calls(), vec![target]);
    }

    #[tokio::test]
    async fn l2ping_failure_falls_back_to_connect_probe() {
        let adapter = FakeAdapterDriver::new();
        let target = mac("AA:BB:CC:DD:EE:02");
        adapter.set_connect_probe_success(target.clone());

        let resistance = L2pingResistance::new();
        let results = probe_batch(&adapter, &[target.clone()], &resistance, &ProbeConfig::default()).await;

        assert_eq!(results.get(&target), Some(&true));
        assert_eq!(adapter.l2ping_calls(), vec![target.clone()]);
        assert_eq!(adapter.connect_probe_calls(), vec![target.clone()]);
        assert_eq!(adapter.disconnect_calls(), vec![target]);
    }

    #[tokio::test]
    async fn both_phases_failing_records_absent() {
        let adapter = FakeAdapterDriver::new();
        let target = mac("AA:BB:CC:DD:EE:03");

        let resistance = L2pingResistance::new();
        let results = probe_batch(&adapter, &[target.clone()], &resistance, &ProbeConfig::default()).await;

        assert_eq!(results.get(&target), Some(&false));
    }

    #[tokio::test]
    async fn resistant_mac_skips_straight_to_connect_probe() {
        let adapter = FakeAdapterDriver::new();
        let target = mac("AA:BB:CC:DD:EE:04");
        adapter.set_connect_probe_success(target.clone());

        let resistance = L2pingResistance::new();
        for _ in 0..3 {
            resistance.record_failure(&target);
        }

        let results = probe_batch(&adapter, &[target.clone()], &resistance, &ProbeConfig::default()).await;

        assert_eq!(results.get(&target), Some(&true));
        assert!(adapter.l2ping_calls().is_empty());
        assert_eq!(adapter.connect_probe_calls(), vec![target]);
    }

    #[tokio::test]
    async fn success_resets_resistance_counter() {
        let adapter = FakeAdapterDriver::new();
        let target = mac("AA:BB:CC:DD:EE:05");
        adapter.set_l2ping_success(target.clone());

        let resistance = L2pingResistance::new();
        resistance.record_failure(&target);
        resistance.record_failure(&target);

        probe_batch(&adapter, &[target.clone()], &resistance, &ProbeConfig::default()).await;

        assert!(!resistance.is_resistant(&target, 3));
    }
}
