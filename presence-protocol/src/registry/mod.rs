//! Remote Registry Client: the façade over the document store holding
//! device records and the attendance log.
//!
//! The store is treated as an opaque RPC service — `getDevices`,
//! `registerPendingDevice`, `updateDeviceStatus`, `logAttendance`,
//! `cleanupExpiredGracePeriods`, `deleteDevice` — reached over HTTP. The
//! polling loop only ever sees the [`RegistryClient`] trait; [`http`] is
//! the production implementation and [`fake`] is a scripted test double.

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod http;

use async_trait::async_trait;

use crate::device::DeviceRecord;
use crate::error::Result;
use crate::mac::MacAddress;

pub use http::{ConvexRegistryClient, RegistryConfig};

/// A device freshly seen on the adapter, not yet known to the registry.
pub struct NewDevice {
    pub mac: MacAddress,
    pub name: Option<String>,
    pub grace_period_end: i64,
}

/// One entry in the attendance log.
#[derive(Clone)]
pub struct AttendanceEntry {
    pub mac: MacAddress,
    pub status: crate::device::DeviceStatus,
    pub at: i64,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches the full device list. Returns an empty list rather than an
    /// error when the circuit breaker is open or the call times out.
    async fn get_devices(&self) -> Vec<DeviceRecord>;

    /// Registers a MAC seen on the adapter that has no registry entry yet.
    async fn register_pending_device(&self, device: NewDevice) -> Result<()>;

    /// Pushes a status change for an already-registered device.
    async fn update_device_status(&self, mac: &MacAddress, status: crate::device::DeviceStatus) -> Result<()>;

    /// Appends an attendance log entry for a registered device.
    async fn log_attendance(&self, entry: AttendanceEntry) -> Result<()>;

    /// Deletes pending registrations whose grace period has elapsed.
    async fn cleanup_expired_grace_periods(&self, now: i64) -> Result<()>;

    /// Deletes a device record outright (stale pairing cleanup, admin
    /// action).
    async fn delete_device(&self, mac: &MacAddress) -> Result<()>;
}
