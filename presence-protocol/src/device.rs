//! `DeviceRecord`: the registry's view of a device, mirrored read-mostly
//! into the core.

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Present,
    Absent,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub mac: MacAddress,
    pub name: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    pub status: DeviceStatus,
    #[serde(rename = "pendingRegistration")]
    pub pending_registration: bool,
    #[serde(rename = "gracePeriodEnd")]
    pub grace_period_end: Option<i64>,
    #[serde(rename = "connectedSince")]
    pub connected_since: Option<i64>,
}

impl DeviceRecord {
    pub fn is_registered(&self) -> bool {
        !self.pending_registration
    }
}
