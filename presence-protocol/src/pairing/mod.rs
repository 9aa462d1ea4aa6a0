//! Pairing Agent: the always-on auto-accepting `org.bluez.Agent1`
//! implementation and its per-MAC state machine.
//!
//! `pairing_request → paired | failed | timeout`. The agent never prompts
//! a human — `NoInputNoOutput` capability — so every request that isn't an
//! audio-profile rejection is accepted immediately.

mod agent;
pub mod watcher;

pub use agent::BluetoothAgent;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use zbus::zvariant::ObjectPath;
use zbus::Connection;

use crate::adapter::AdapterDriver;
use crate::error::Result;
use crate::fast_path::{FastPathQueue, FastPathSource};
use crate::mac::MacAddress;

/// Object path the agent is served under; arbitrary but fixed, since
/// nothing else needs to address it directly.
const AGENT_PATH: &str = "/org/presence/agent";

/// `NoInputNoOutput` tells BlueZ this agent never prompts a human, so every
/// pairing request is auto-accepted (modulo the audio-profile rejection in
/// [`authorize_service`]).
const AGENT_CAPABILITY: &str = "NoInputNoOutput";

#[zbus::proxy(interface = "org.bluez.AgentManager1", default_service = "org.bluez", default_path = "/org/bluez")]
trait AgentManager1 {
    async fn register_agent(&self, agent: &ObjectPath<'_>, capability: &str) -> zbus::Result<()>;
    async fn unregister_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
    async fn request_default_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Serves a [`BluetoothAgent`] on `connection`'s object server and
/// registers it with BlueZ as the system default pairing agent.
pub async fn register_with_bluez(connection: &Connection, state: PairingAgentState, adapter: Arc<dyn AdapterDriver>) -> Result<()> {
    let path = ObjectPath::try_from(AGENT_PATH).expect("AGENT_PATH is a valid object path");
    let agent = BluetoothAgent::new(state, adapter);
    connection.object_server().at(&path, agent).await?;

    let manager = AgentManager1Proxy::new(connection).await?;
    manager.register_agent(&path, AGENT_CAPABILITY).await?;
    manager.request_default_agent(&path).await?;

    info!(path = AGENT_PATH, "registered as default BlueZ pairing agent");
    Ok(())
}

/// Base UUIDs for audio profiles we refuse to pair: A2DP, HSP, HFP, HFP-AG.
/// A presence tracker has no use for an audio link and accepting one just
/// burns an ACL slot.
pub const REJECTED_AUDIO_UUIDS: &[&str] = &[
    "0000110d-0000-1000-8000-00805f9b34fb",
    "00001108-0000-1000-8000-00805f9b34fb",
    "0000111e-0000-1000-8000-00805f9b34fb",
    "0000111f-0000-1000-8000-00805f9b34fb",
];

pub fn is_rejected_audio_uuid(uuid: &str) -> bool {
    REJECTED_AUDIO_UUIDS.iter().any(|rejected| rejected.eq_ignore_ascii_case(uuid))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    PairingRequest,
    Pairing,
    Paired,
    Failed,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct PendingPairing {
    pub mac: MacAddress,
    pub state: PairingState,
    pub timestamp: Instant,
}

/// Shared, lock-protected pairing state. Cloned cheaply (it's an `Arc`
/// internally) and handed to both the D-Bus agent and the polling loop.
#[derive(Clone)]
pub struct PairingAgentState {
    inner: Arc<Mutex<HashMap<MacAddress, PendingPairing>>>,
    fast_path: Arc<FastPathQueue>,
    pairing_timeout: Duration,
}

impl PairingAgentState {
    pub fn new(fast_path: Arc<FastPathQueue>, pairing_timeout: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), fast_path, pairing_timeout }
    }

    pub fn start_pairing_request(&self, mac: MacAddress, now: Instant) {
        self.inner.lock().unwrap().insert(
            mac.clone(),
            PendingPairing { mac, state: PairingState::PairingRequest, timestamp: now },
        );
    }

    pub fn mark_paired(&self, mac: &MacAddress) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(mac) {
            entry.state = PairingState::Paired;
        }
    }

    pub fn mark_failed(&self, mac: &MacAddress) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(mac) {
            entry.state = PairingState::Failed;
        }
    }

    pub fn cancel_all_pending(&self) {
        let mut state = self.inner.lock().unwrap();
        for entry in state.values_mut() {
            if matches!(entry.state, PairingState::PairingRequest | PairingState::Pairing) {
                entry.state = PairingState::Failed;
            }
        }
    }

    pub fn is_paired(&self, mac: &MacAddress) -> bool {
        matches!(self.inner.lock().unwrap().get(mac), Some(entry) if entry.state == PairingState::Paired)
    }

    pub fn reset_device_state(&self, mac: &MacAddress) {
        self.inner.lock().unwrap().remove(mac);
    }

    /// Sweeps pending entries: ages `pairing_request|pairing` entries past
    /// `pairing_timeout` into `timeout`, then removes and returns every
    /// entry that has reached a terminal non-`paired` state.
    pub fn cleanup_failed_pairings(&self, now: Instant) -> Vec<MacAddress> {
        let mut state = self.inner.lock().unwrap();

        for entry in state.values_mut() {
            if matches!(entry.state, PairingState::PairingRequest | PairingState::Pairing)
                && now.saturating_duration_since(entry.timestamp) > self.pairing_timeout
            {
                entry.state = PairingState::Timeout;
            }
        }

        let stale: Vec<MacAddress> = state
            .iter()
            .filter(|(_, entry)| matches!(entry.state, PairingState::Failed | PairingState::Timeout))
            .map(|(mac, _)| mac.clone())
            .collect();

        for mac in &stale {
            state.remove(mac);
        }
        stale
    }

    /// Emits a fast-path event for a paired device that just reconnected.
    /// Ignored for anything not in `paired` state.
    pub fn note_connected(&self, mac: &MacAddress, name: Option<String>, now: Instant) {
        if !self.is_paired(mac) {
            return;
        }
        debug!(mac = %mac, "fast-path: paired device connected");
        self.fast_path.put(mac.clone(), name, now, FastPathSource::PairingAgent);
    }
}

/// Trusts and confirms a connecting device: `AuthorizeService` accepts
/// everything except the rejected audio profiles, ensuring the device is
/// trusted first.
pub async fn authorize_service(adapter: &dyn AdapterDriver, mac: &MacAddress, uuid: &str) -> bool {
    if is_rejected_audio_uuid(uuid) {
        debug!(mac = %mac, uuid, "rejecting audio profile");
        return false;
    }
    adapter.trust(mac).await;
    true
}
