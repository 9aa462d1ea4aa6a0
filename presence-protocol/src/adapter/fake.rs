//! Scripted adapter driver for exercising the engine without a real radio.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::AdapterDriver;
use crate::mac::MacAddress;

/// Canned responses a test installs before running a cycle. Every field
/// defaults to "nothing configured" (empty sets / `false` / `None`), so a
/// test only needs to set up the parts it cares about.
#[derive(Default)]
pub struct FakeAdapterDriver {
    inner: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    paired: Vec<MacAddress>,
    connected: HashSet<MacAddress>,
    names: HashMap<MacAddress, String>,
    l2ping_ok: HashSet<MacAddress>,
    connect_probe_ok: HashSet<MacAddress>,
    disconnect_calls: Vec<MacAddress>,
    l2ping_calls: Vec<MacAddress>,
    connect_probe_calls: Vec<MacAddress>,
    remove_calls: Vec<MacAddress>,
    register_calls: Vec<MacAddress>,
    properties: HashMap<String, String>,
    binary_missing: bool,
}

impl FakeAdapterDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paired(&self, macs: Vec<MacAddress>) {
        self.inner.lock().unwrap().paired = macs;
    }

    pub fn set_connected(&self, macs: impl IntoIterator<Item = MacAddress>) {
        self.inner.lock().unwrap().connected = macs.into_iter().collect();
    }

    pub fn set_name(&self, mac: MacAddress, name: impl Into<String>) {
        self.inner.lock().unwrap().names.insert(mac, name.into());
    }

    pub fn set_l2ping_success(&self, mac: MacAddress) {
        self.inner.lock().unwrap().l2ping_ok.insert(mac);
    }

    pub fn set_connect_probe_success(&self, mac: MacAddress) {
        self.inner.lock().unwrap().connect_probe_ok.insert(mac);
    }

    pub fn set_property(&self, key: &str, value: impl Into<String>) {
        self.inner.lock().unwrap().properties.insert(key.to_string(), value.into());
    }

    pub fn simulate_binary_missing(&self) {
        self.inner.lock().unwrap().binary_missing = true;
    }

    pub fn disconnect_calls(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().disconnect_calls.clone()
    }

    pub fn l2ping_calls(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().l2ping_calls.clone()
    }

    pub fn connect_probe_calls(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().connect_probe_calls.clone()
    }

    pub fn remove_calls(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().remove_calls.clone()
    }
}

#[async_trait]
impl AdapterDriver for FakeAdapterDriver {
    async fn list_paired(&self) -> Vec<MacAddress> {
        if self.inner.lock().unwrap().binary_missing {
            return Vec::new();
        }
        self.inner.lock().unwrap().paired.clone()
    }

    async fn list_connected(&self) -> Vec<MacAddress> {
        if self.inner.lock().unwrap().binary_missing {
            return Vec::new();
        }
        self.inner.lock().unwrap().connected.iter().cloned().collect()
    }

    async fn get_device_name(&self, mac: &MacAddress) -> Option<String> {
        self.inner.lock().unwrap().names.get(mac).cloned()
    }

    async fn get_info(&self, mac: &MacAddress) -> Option<String> {
        let state = self.inner.lock().unwrap();
        let connected = state.connected.contains(mac);
        let name = state.names.get(mac).cloned().unwrap_or_default();
        Some(format!("Name: {name}\nConnected: {}\nPaired: yes\nTrusted: yes\n", if connected { "yes" } else { "no" }))
    }

    async fn connect(&self, _mac: &MacAddress) -> bool {
        true
    }

    async fn disconnect(&self, mac: &MacAddress) -> bool {
        let mut state = self.inner.lock().unwrap();
        state.disconnect_calls.push(mac.clone());
        state.connected.remove(mac);
        true
    }

    async fn remove(&self, mac: &MacAddress) -> bool {
        self.inner.lock().unwrap().remove_calls.push(mac.clone());
        true
    }

    async fn trust(&self, _mac: &MacAddress) -> bool {
        true
    }

    async fn l2ping(&self, mac: &MacAddress, _count: u32, _timeout: Duration) -> bool {
        let mut state = self.inner.lock().unwrap();
        state.l2ping_calls.push(mac.clone());
        state.l2ping_ok.contains(mac)
    }

    async fn connect_probe(&self, mac: &MacAddress, _timeout: Duration) -> bool {
        let mut state = self.inner.lock().unwrap();
        state.connect_probe_calls.push(mac.clone());
        state.connect_probe_ok.contains(mac)
    }

    async fn discovery_pulse(&self, _duration: Duration) {}

    async fn adapter_property(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().properties.get(key).cloned()
    }

    async fn set_powered(&self, on: bool) -> bool {
        self.inner.lock().unwrap().properties.insert("Powered".into(), yes_no(on));
        true
    }

    async fn set_discoverable(&self, on: bool) -> bool {
        self.inner.lock().unwrap().properties.insert("Discoverable".into(), yes_no(on));
        true
    }

    async fn set_pairable(&self, on: bool) -> bool {
        self.inner.lock().unwrap().properties.insert("Pairable".into(), yes_no(on));
        true
    }

    async fn set_discoverable_timeout(&self, secs: u32) -> bool {
        self.inner.lock().unwrap().properties.insert("DiscoverableTimeout".into(), secs.to_string());
        true
    }

    async fn set_pairable_timeout(&self, secs: u32) -> bool {
        self.inner.lock().unwrap().properties.insert("PairableTimeout".into(), secs.to_string());
        true
    }
}

fn yes_no(b: bool) -> String {
    if b { "yes".into() } else { "no".into() }
}
