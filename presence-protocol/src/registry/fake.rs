//! Scripted registry client for exercising the engine without a live store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::device::{DeviceRecord, DeviceStatus};
use crate::error::Result;
use crate::mac::MacAddress;

use super::{AttendanceEntry, NewDevice, RegistryClient};

#[derive(Default)]
pub struct FakeRegistryClient {
    inner: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    devices: HashMap<MacAddress, DeviceRecord>,
    status_updates: Vec<(MacAddress, DeviceStatus)>,
    attendance_log: Vec<AttendanceEntry>,
    registered: Vec<MacAddress>,
    deleted: Vec<MacAddress>,
    cleanup_calls: u32,
    fail_writes: bool,
}

impl FakeRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, device: DeviceRecord) {
        self.inner.lock().unwrap().devices.insert(device.mac.clone(), device);
    }

    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    pub fn status_updates(&self) -> Vec<(MacAddress, DeviceStatus)> {
        self.inner.lock().unwrap().status_updates.clone()
    }

    pub fn attendance_log(&self) -> Vec<AttendanceEntry> {
        self.inner.lock().unwrap().attendance_log.clone()
    }

    pub fn registered(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().registered.clone()
    }

    pub fn deleted(&self) -> Vec<MacAddress> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn cleanup_calls(&self) -> u32 {
        self.inner.lock().unwrap().cleanup_calls
    }
}

#[async_trait]
impl RegistryClient for FakeRegistryClient {
    async fn get_devices(&self) -> Vec<DeviceRecord> {
        self.inner.lock().unwrap().devices.values().cloned().collect()
    }

    async fn register_pending_device(&self, device: NewDevice) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(crate::error::PresenceError::Registry("fake write failure".into()));
        }
        state.registered.push(device.mac.clone());
        state.devices.insert(
            device.mac.clone(),
            DeviceRecord {
                mac: device.mac,
                name: device.name,
                first_name: None,
                last_name: None,
                status: DeviceStatus::Unknown,
                pending_registration: true,
                grace_period_end: Some(device.grace_period_end),
                connected_since: None,
            },
        );
        Ok(())
    }

    async fn update_device_status(&self, mac: &MacAddress, status: DeviceStatus) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(crate::error::PresenceError::Registry("fake write failure".into()));
        }
        state.status_updates.push((mac.clone(), status));
        if let Some(record) = state.devices.get_mut(mac) {
            record.status = status;
        }
        Ok(())
    }

    async fn log_attendance(&self, entry: AttendanceEntry) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(crate::error::PresenceError::Registry("fake write failure".into()));
        }
        state.attendance_log.push(entry);
        Ok(())
    }

    async fn cleanup_expired_grace_periods(&self, now: i64) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.cleanup_calls += 1;
        state.devices.retain(|_, record| {
            !(record.pending_registration && record.grace_period_end.is_some_and(|end| end <= now))
        });
        Ok(())
    }

    async fn delete_device(&self, mac: &MacAddress) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.deleted.push(mac.clone());
        state.devices.remove(mac);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn register_then_get_devices_round_trips() {
        let client = FakeRegistryClient::new();
        client
            .register_pending_device(NewDevice { mac: mac("AA:BB:CC:DD:EE:01"), name: Some("Phone".into()), grace_period_end: 1000 })
            .await
            .unwrap();

        let devices = client.get_devices().await;
        assert_eq!(devices.len(), 1);
        assert!(devices[0].pending_registration);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_pending_devices() {
        let client = FakeRegistryClient::new();
        client
            .register_pending_device(NewDevice { mac: mac("AA:BB:CC:DD:EE:02"), name: None, grace_period_end: 500 })
            .await
            .unwrap();

        client.cleanup_expired_grace_periods(1000).await.unwrap();
        assert!(client.get_devices().await.is_empty());
        assert_eq!(client.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn writes_fail_when_scripted() {
        let client = FakeRegistryClient::new();
        client.fail_writes();
        let result = client.update_device_status(&mac("AA:BB:CC:DD:EE:03"), DeviceStatus::Present).await;
        assert!(result.is_err());
    }
}
