//! HTTP-backed `RegistryClient` talking to the remote document store.
//!
//! Calls are serialized through a single `tokio::sync::Mutex` lane — the
//! same "one instance, one lock" shape `RealAdapterDriver` uses for
//! disconnects — because the underlying `reqwest::Client` is cheap to
//! share but the store itself has no useful notion of concurrent writers.
//! A consecutive-failure counter behind the same lock trips the circuit
//! breaker; while open, reads short-circuit to empty and writes still
//! attempt (a write succeeding is the only way the breaker resets).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::device::{DeviceRecord, DeviceStatus};
use crate::error::{PresenceError, Result};
use crate::mac::MacAddress;

use super::{AttendanceEntry, NewDevice, RegistryClient};

pub struct RegistryConfig {
    pub base_url: String,
    pub admin_key: String,
    pub query_timeout: Duration,
    pub max_consecutive_timeouts: u32,
}

#[derive(Serialize)]
struct RegisterPendingRequest<'a> {
    mac: &'a str,
    name: Option<&'a str>,
    #[serde(rename = "gracePeriodEnd")]
    grace_period_end: i64,
}

#[derive(Serialize)]
struct UpdateStatusRequest<'a> {
    mac: &'a str,
    status: DeviceStatus,
}

#[derive(Serialize)]
struct LogAttendanceRequest<'a> {
    mac: &'a str,
    status: DeviceStatus,
    at: i64,
}

#[derive(Serialize)]
struct CleanupGraceRequest {
    now: i64,
}

#[derive(Serialize)]
struct DeleteDeviceRequest<'a> {
    mac: &'a str,
}

/// Production `RegistryClient`: the remote store reached over HTTP.
pub struct ConvexRegistryClient {
    client: reqwest::Client,
    config: RegistryConfig,
    write_lane: AsyncMutex<()>,
    consecutive_timeouts: AtomicU32,
}

impl ConvexRegistryClient {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            write_lane: AsyncMutex::new(()),
            consecutive_timeouts: AtomicU32::new(0),
        }
    }

    fn circuit_open(&self) -> bool {
        self.consecutive_timeouts.load(Ordering::Relaxed) >= self.config.max_consecutive_timeouts
    }

    fn note_success(&self) {
        self.consecutive_timeouts.store(0, Ordering::Relaxed);
    }

    fn note_failure(&self) -> u32 {
        self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn call<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let _guard = self.write_lane.lock().await;

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.config.admin_key)
            .json(body);

        let outcome = tokio::time::timeout(self.config.query_timeout, request.send()).await;

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => {
                self.note_success();
                Ok(())
            }
            Ok(Ok(response)) => {
                let failures = self.note_failure();
                Err(PresenceError::Registry(format!("{path}: HTTP {} ({failures} consecutive failures)", response.status())))
            }
            Ok(Err(e)) => {
                let failures = self.note_failure();
                Err(PresenceError::Registry(format!("{path}: {e} ({failures} consecutive failures)")))
            }
            Err(_) => {
                let failures = self.note_failure();
                if failures >= self.config.max_consecutive_timeouts {
                    warn!(failures, "registry circuit breaker open");
                }
                Err(PresenceError::Registry(format!("{path}: timed out after {:?}", self.config.query_timeout)))
            }
        }
    }
}

#[async_trait]
impl RegistryClient for ConvexRegistryClient {
    async fn get_devices(&self) -> Vec<DeviceRecord> {
        if self.circuit_open() {
            debug!("registry circuit breaker open; returning empty device list");
            return Vec::new();
        }

        let _guard = self.write_lane.lock().await;
        let url = format!("{}/getDevices", self.config.base_url.trim_end_matches('/'));
        let request = self.client.get(url).bearer_auth(&self.config.admin_key);

        match tokio::time::timeout(self.config.query_timeout, request.send()).await {
            Ok(Ok(response)) if response.status().is_success() => match response.json::<Vec<DeviceRecord>>().await {
                Ok(devices) => {
                    self.note_success();
                    devices
                }
                Err(e) => {
                    warn!(error = %e, "getDevices: malformed response body");
                    self.note_failure();
                    Vec::new()
                }
            },
            Ok(Ok(response)) => {
                warn!(status = %response.status(), "getDevices failed");
                self.note_failure();
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "getDevices transport error");
                self.note_failure();
                Vec::new()
            }
            Err(_) => {
                let failures = self.note_failure();
                if failures >= self.config.max_consecutive_timeouts {
                    warn!(failures, "registry circuit breaker open");
                }
                Vec::new()
            }
        }
    }

    async fn register_pending_device(&self, device: NewDevice) -> Result<()> {
        self.call(
            "registerPendingDevice",
            &RegisterPendingRequest {
                mac: device.mac.as_str(),
                name: device.name.as_deref(),
                grace_period_end: device.grace_period_end,
            },
        )
        .await
    }

    async fn update_device_status(&self, mac: &MacAddress, status: DeviceStatus) -> Result<()> {
        self.call("updateDeviceStatus", &UpdateStatusRequest { mac: mac.as_str(), status }).await
    }

    async fn log_attendance(&self, entry: AttendanceEntry) -> Result<()> {
        self.call(
            "logAttendance",
            &LogAttendanceRequest { mac: entry.mac.as_str(), status: entry.status, at: entry.at },
        )
        .await
    }

    async fn cleanup_expired_grace_periods(&self, now: i64) -> Result<()> {
        self.call("cleanupExpiredGracePeriods", &CleanupGraceRequest { now }).await
    }

    async fn delete_device(&self, mac: &MacAddress) -> Result<()> {
        self.call("deleteDevice", &DeleteDeviceRequest { mac: mac.as_str() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RegistryConfig {
        RegistryConfig {
            base_url: "http://127.0.0.1:0".into(),
            admin_key: "test-key".into(),
            query_timeout: Duration::from_millis(50),
            max_consecutive_timeouts: 3,
        }
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_consecutive_timeouts() {
        let client = ConvexRegistryClient::new(config());

        for _ in 0..3 {
            let _ = client.update_device_status(&MacAddress::parse("AA:BB:CC:DD:EE:01").unwrap(), DeviceStatus::Present).await;
        }

        assert!(client.circuit_open());
        assert!(client.get_devices().await.is_empty());
    }

    #[tokio::test]
    async fn circuit_closed_initially() {
        let client = ConvexRegistryClient::new(config());
        assert!(!client.circuit_open());
    }
}
