//! Watches `org.bluez`'s object tree for pairing and connection events and
//! folds them into [`PairingAgentState`].
//!
//! `InterfacesAdded` carrying `Paired=true` promotes a pending entry to
//! `paired`. `PropertiesChanged` with `Paired=false` drops a tracked MAC to
//! `failed`. `PropertiesChanged` with `Connected=true` on a `paired` MAC
//! emits a fast-path event.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::debug;
use zbus::fdo::{ObjectManagerProxy, PropertiesProxy};
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::mac::MacAddress;

use super::PairingAgentState;

const BLUEZ_SERVICE: &str = "org.bluez";
const DEVICE_INTERFACE: &str = "org.bluez.Device1";
const RESCAN_INTERVAL: Duration = Duration::from_secs(30);

fn mac_from_path(path: &ObjectPath<'_>) -> Option<MacAddress> {
    let segment = path.as_str().rsplit('/').next()?;
    let hex = segment.strip_prefix("dev_")?;
    MacAddress::parse(&hex.replace('_', ":"))
}

fn device_name(props: &std::collections::HashMap<&str, zbus::zvariant::Value<'_>>) -> Option<String> {
    props.get("Name").and_then(|v| String::try_from(v.clone()).ok())
}

/// Spawns the background tasks that watch `InterfacesAdded` (new pairings
/// reaching `Paired=true`) and `PropertiesChanged` on every known device
/// (reconnects and pairing regressions).
pub async fn spawn(connection: Connection, state: PairingAgentState) -> zbus::Result<()> {
    let object_manager = ObjectManagerProxy::new(&connection, BLUEZ_SERVICE, "/").await?;
    let mut interfaces_added = object_manager.receive_interfaces_added().await?;

    let added_state = state.clone();
    tokio::spawn(async move {
        while let Some(signal) = interfaces_added.next().await {
            let Ok(args) = signal.args() else { continue };
            let Some(device_props) = args.interfaces_and_properties().get(DEVICE_INTERFACE) else {
                continue;
            };
            let Some(mac) = mac_from_path(args.object_path()) else { continue };

            let paired = device_props
                .get("Paired")
                .and_then(|v| bool::try_from(v.clone()).ok())
                .unwrap_or(false);

            if paired {
                debug!(mac = %mac, "adapter reports Paired=true");
                added_state.mark_paired(&mac);
            }
        }
    });

    tokio::spawn(watch_device_properties(connection, state));

    Ok(())
}

/// Periodically re-scans the managed object tree and attaches a
/// `PropertiesChanged` listener to every device path not already watched.
/// Devices come and go as BlueZ removes stale objects, so this can't be a
/// one-time subscription set up at startup.
async fn watch_device_properties(connection: Connection, state: PairingAgentState) {
    let mut watched: HashSet<OwnedObjectPath> = HashSet::new();

    loop {
        let scan = async {
            let object_manager = ObjectManagerProxy::new(&connection, BLUEZ_SERVICE, "/").await?;
            object_manager.get_managed_objects().await
        }
        .await;

        if let Ok(objects) = scan {
            for (path, interfaces) in objects {
                if watched.contains(&path) || !interfaces.contains_key(DEVICE_INTERFACE) {
                    continue;
                }
                watched.insert(path.clone());
                tokio::spawn(watch_one_device(connection.clone(), state.clone(), path));
            }
        }

        tokio::time::sleep(RESCAN_INTERVAL).await;
    }
}

async fn watch_one_device(connection: Connection, state: PairingAgentState, path: OwnedObjectPath) {
    let Some(mac) = mac_from_path(&path.as_ref()) else { return };

    let Ok(builder) = PropertiesProxy::builder(&connection)
        .destination(BLUEZ_SERVICE)
        .and_then(|b| b.path(path.as_ref()))
    else {
        return;
    };
    let Ok(properties) = builder.build().await else { return };

    let Ok(mut changes) = properties.receive_properties_changed().await else { return };

    while let Some(signal) = changes.next().await {
        let Ok(args) = signal.args() else { continue };
        if args.interface_name() != DEVICE_INTERFACE {
            continue;
        }

        let changed = args.changed_properties();

        if let Some(paired) = changed.get("Paired").and_then(|v| bool::try_from(v.clone()).ok()) {
            if !paired {
                debug!(mac = %mac, "adapter reports Paired=false");
                state.mark_failed(&mac);
            }
        }

        if let Some(connected) = changed.get("Connected").and_then(|v| bool::try_from(v.clone()).ok()) {
            if connected {
                let name = device_name(changed);
                state.note_connected(&mac, name, Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mac_from_bluez_device_path() {
        let path = ObjectPath::try_from("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01").unwrap();
        assert_eq!(mac_from_path(&path), MacAddress::parse("AA:BB:CC:DD:EE:01"));
    }

    #[test]
    fn non_device_path_yields_no_mac() {
        let path = ObjectPath::try_from("/org/bluez/hci0").unwrap();
        assert_eq!(mac_from_path(&path), None);
    }
}
