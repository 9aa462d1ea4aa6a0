//! `org.bluez.Agent1` D-Bus interface implementation.
//!
//! Unlike an interactive agent, every method here resolves immediately —
//! there's no human to prompt with `NoInputNoOutput` capability. The only
//! rejection path is the audio-profile check in `authorize_service`.

use std::sync::Arc;
use std::time::Instant;

use zbus::{fdo, interface, zvariant::ObjectPath};

use crate::adapter::AdapterDriver;
use crate::mac::MacAddress;

use super::{authorize_service, PairingAgentState};

/// Extracts the MAC from a BlueZ device object path
/// (`/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`).
fn mac_from_device_path(path: &ObjectPath<'_>) -> Option<MacAddress> {
    let segment = path.as_str().rsplit('/').next()?;
    let hex = segment.strip_prefix("dev_")?;
    MacAddress::parse(&hex.replace('_', ":"))
}

pub struct BluetoothAgent {
    state: PairingAgentState,
    adapter: Arc<dyn AdapterDriver>,
}

impl BluetoothAgent {
    pub fn new(state: PairingAgentState, adapter: Arc<dyn AdapterDriver>) -> Self {
        Self { state, adapter }
    }
}

#[interface(name = "org.bluez.Agent1")]
impl BluetoothAgent {
    async fn release(&self) {}

    async fn request_pin_code(&self, _device: ObjectPath<'_>) -> fdo::Result<String> {
        Ok(String::new())
    }

    async fn display_pincode(&self, device: ObjectPath<'_>, pincode: String) -> fdo::Result<()> {
        tracing::debug!(device = %device, pincode, "display pincode (no UI, logged only)");
        Ok(())
    }

    async fn request_passkey(&self, _device: ObjectPath<'_>) -> fdo::Result<u32> {
        Ok(0)
    }

    async fn display_passkey(&self, device: ObjectPath<'_>, passkey: u32, entered: u16) -> fdo::Result<()> {
        tracing::debug!(device = %device, passkey, entered, "display passkey (no UI, logged only)");
        Ok(())
    }

    async fn request_confirmation(&self, device: ObjectPath<'_>, _passkey: u32) -> fdo::Result<()> {
        if let Some(mac) = mac_from_device_path(&device) {
            self.state.start_pairing_request(mac.clone(), Instant::now());
            self.adapter.trust(&mac).await;
        }
        Ok(())
    }

    async fn request_authorization(&self, device: ObjectPath<'_>) -> fdo::Result<()> {
        if let Some(mac) = mac_from_device_path(&device) {
            self.state.start_pairing_request(mac.clone(), Instant::now());
            self.adapter.trust(&mac).await;
        }
        Ok(())
    }

    async fn authorize_service(&self, device: ObjectPath<'_>, uuid: String) -> fdo::Result<()> {
        let Some(mac) = mac_from_device_path(&device) else {
            return Ok(());
        };
        if authorize_service(self.adapter.as_ref(), &mac, &uuid).await {
            Ok(())
        } else {
            Err(fdo::Error::Failed("Rejected".into()))
        }
    }

    async fn cancel(&self) {
        self.state.cancel_all_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mac_from_device_path() {
        let path = ObjectPath::try_from("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01").unwrap();
        assert_eq!(mac_from_device_path(&path), MacAddress::parse("AA:BB:CC:DD:EE:01"));
    }

    #[test]
    fn rejects_malformed_device_path() {
        let path = ObjectPath::try_from("/org/bluez/hci0").unwrap();
        assert_eq!(mac_from_device_path(&path), None);
    }
}
