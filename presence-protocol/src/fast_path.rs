//! Fast-Path Queue: a bounded, non-blocking handoff between the pairing
//! agent and the polling loop for "device just connected" events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathSource {
    PairingAgent,
}

#[derive(Debug, Clone)]
pub struct FastPathEvent {
    pub mac: MacAddress,
    pub name: Option<String>,
    pub ts: Instant,
    pub source: FastPathSource,
}

/// Bounded SPSC-shaped queue. `put` is non-blocking and drops the oldest
/// event on overflow rather than blocking the agent's bus loop; `drain`
/// never blocks the polling loop.
pub struct FastPathQueue {
    capacity: usize,
    events: Mutex<Vec<FastPathEvent>>,
    last_emitted: Mutex<HashMap<MacAddress, Instant>>,
    suppression_window: Duration,
}

impl FastPathQueue {
    pub fn new(capacity: usize, suppression_window: Duration) -> Self {
        Self {
            capacity,
            events: Mutex::new(Vec::new()),
            last_emitted: Mutex::new(HashMap::new()),
            suppression_window,
        }
    }

    /// Enqueues an event unless an identical-MAC event was already emitted
    /// within the suppression window (idempotence).
    pub fn put(&self, mac: MacAddress, name: Option<String>, ts: Instant, source: FastPathSource) {
        {
            let mut last = self.last_emitted.lock().unwrap();
            if let Some(prev) = last.get(&mac) {
                if ts.saturating_duration_since(*prev) < self.suppression_window {
                    return;
                }
            }
            last.insert(mac.clone(), ts);
        }

        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(FastPathEvent { mac, name, ts, source });
    }

    /// Drains every queued event. An empty queue drains to an empty vec,
    /// which is a no-op for the caller.
    pub fn drain(&self) -> Vec<FastPathEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}
