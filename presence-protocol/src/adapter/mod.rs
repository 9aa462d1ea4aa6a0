//! Thin, well-typed façade over the platform Bluetooth command surface
//! (`bluetoothctl`, `l2ping`).
//!
//! The daemon never shells out directly — every call goes through
//! [`AdapterDriver`], so the rest of the engine can be driven against
//! [`FakeAdapterDriver`] in tests instead of a real adapter.

pub mod info_cache;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::mac::MacAddress;
use info_cache::DeviceInfoCacheWithStats;

/// Capability surface the rest of the engine is driven against.
///
/// Every method is bounded by an explicit timeout and never panics: a
/// missing binary, an invalid MAC, or a subprocess timeout all collapse to
/// `false`/`None` rather than propagating an error, per the "no error exits
/// the cycle" policy.
#[async_trait]
pub trait AdapterDriver: Send + Sync {
    async fn list_paired(&self) -> Vec<MacAddress>;
    async fn list_connected(&self) -> Vec<MacAddress>;
    async fn get_device_name(&self, mac: &MacAddress) -> Option<String>;
    async fn get_info(&self, mac: &MacAddress) -> Option<String>;
    async fn connect(&self, mac: &MacAddress) -> bool;
    async fn disconnect(&self, mac: &MacAddress) -> bool;
    async fn remove(&self, mac: &MacAddress) -> bool;
    async fn trust(&self, mac: &MacAddress) -> bool;
    async fn l2ping(&self, mac: &MacAddress, count: u32, timeout: Duration) -> bool;
    async fn connect_probe(&self, mac: &MacAddress, timeout: Duration) -> bool;
    /// Short discovery pulse used by the adapter watchdog to nudge
    /// advertising back on when the adapter has drifted unhealthy.
    async fn discovery_pulse(&self, duration: Duration);
    /// Reads a single adapter property via `bluetoothctl show`. Used by the
    /// watchdog; returns `None` if the key isn't present in the output.
    async fn adapter_property(&self, key: &str) -> Option<String>;
    async fn set_powered(&self, on: bool) -> bool;
    async fn set_discoverable(&self, on: bool) -> bool;
    async fn set_pairable(&self, on: bool) -> bool;
    async fn set_discoverable_timeout(&self, secs: u32) -> bool;
    async fn set_pairable_timeout(&self, secs: u32) -> bool;
}

const BLUETOOTHCTL: &str = "bluetoothctl";
const L2PING: &str = "l2ping";

/// Real adapter driver: spawns `bluetoothctl`/`l2ping` subprocesses.
///
/// Disconnects are serialized behind `disconnect_lock` — BlueZ has been
/// observed to race when two `disconnect` calls run concurrently against
/// the same adapter, so every caller funnels through this driver's single
/// instance rather than spawning its own subprocess.
pub struct RealAdapterDriver {
    disconnect_lock: Arc<Mutex<()>>,
    info_cache: DeviceInfoCacheWithStats,
    default_call_timeout: Duration,
}

impl RealAdapterDriver {
    pub fn new(info_cache_ttl: Duration, default_call_timeout: Duration) -> Self {
        Self {
            disconnect_lock: Arc::new(Mutex::new(())),
            info_cache: DeviceInfoCacheWithStats::new(info_cache_ttl),
            default_call_timeout,
        }
    }
}

#[async_trait]
impl AdapterDriver for RealAdapterDriver {
    async fn list_paired(&self) -> Vec<MacAddress> {
        run_and_parse_device_list(BLUETOOTHCTL, &["devices", "Paired"], self.default_call_timeout).await
    }

    async fn list_connected(&self) -> Vec<MacAddress> {
        run_and_parse_device_list(BLUETOOTHCTL, &["devices", "Connected"], self.default_call_timeout).await
    }

    async fn get_device_name(&self, mac: &MacAddress) -> Option<String> {
        let info = self.get_info(mac).await?;
        for line in info.lines() {
            if let Some(rest) = line.trim().strip_prefix("Name:") {
                let name = rest.trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
        None
    }

    async fn get_info(&self, mac: &MacAddress) -> Option<String> {
        if let Some(cached) = self.info_cache.get(mac).await {
            return Some(cached);
        }
        let (ok, stdout, _stderr) =
            run_subprocess(BLUETOOTHCTL, &["info", mac.as_str()], self.default_call_timeout).await?;
        if !ok {
            return None;
        }
        self.info_cache.set(mac.clone(), stdout.clone()).await;
        Some(stdout)
    }

    async fn connect(&self, mac: &MacAddress) -> bool {
        let Some((_, stdout, _)) =
            run_subprocess(BLUETOOTHCTL, &["connect", mac.as_str()], self.default_call_timeout).await
        else {
            return false;
        };
        stdout.contains("Connection successful") || stdout.contains("Connected: yes")
    }

    async fn disconnect(&self, mac: &MacAddress) -> bool {
        let _guard = self.disconnect_lock.lock().await;
        let Some((_, stdout, _)) =
            run_subprocess(BLUETOOTHCTL, &["disconnect", mac.as_str()], self.default_call_timeout).await
        else {
            return false;
        };
        if stdout.contains("Successful disconnected") {
            return true;
        }
        // Don't trust the cache here: verify with a fresh read, the way the
        // scanner this is based on does before declaring failure.
        drop(_guard);
        match self.get_info(mac).await {
            Some(info) if info.contains("Connected: yes") => false,
            _ => true,
        }
    }

    async fn remove(&self, mac: &MacAddress) -> bool {
        let Some((_, stdout, _)) =
            run_subprocess(BLUETOOTHCTL, &["remove", mac.as_str()], self.default_call_timeout).await
        else {
            return false;
        };
        stdout.contains("has been removed")
    }

    async fn trust(&self, mac: &MacAddress) -> bool {
        let Some((_, stdout, _)) =
            run_subprocess(BLUETOOTHCTL, &["trust", mac.as_str()], self.default_call_timeout).await
        else {
            return false;
        };
        stdout.contains("trust succeeded")
    }

    async fn l2ping(&self, mac: &MacAddress, count: u32, timeout: Duration) -> bool {
        let count_s = count.to_string();
        let timeout_s = timeout.as_secs().to_string();
        let wall_clock = timeout + Duration::from_secs(1);
        let Some((exit_ok, stdout, stderr)) = run_subprocess(
            L2PING,
            &["-c", &count_s, "-t", &timeout_s, mac.as_str()],
            wall_clock,
        )
        .await
        else {
            return false;
        };
        let success = exit_ok && stdout.to_lowercase().contains("bytes from");
        if !success {
            let stderr_lower = stderr.to_lowercase();
            if stderr_lower.contains("permission") || stderr_lower.contains("operation not permitted") {
                warn!(mac = %mac, "l2ping permission denied; run with CAP_NET_RAW");
            } else if stderr_lower.contains("too many links") {
                debug!(mac = %mac, "l2ping failed: adapter connection limit reached");
            } else {
                debug!(mac = %mac, stderr = %stderr.trim(), "l2ping failed");
            }
        }
        success
    }

    async fn connect_probe(&self, mac: &MacAddress, timeout: Duration) -> bool {
        let Some((_, stdout, _)) = run_subprocess(BLUETOOTHCTL, &["connect", mac.as_str()], timeout).await else {
            return false;
        };
        stdout.contains("Connected: yes") || stdout.contains("Connection successful")
    }

    async fn discovery_pulse(&self, duration: Duration) {
        let secs = duration.as_secs().to_string();
        let _ =
            run_subprocess(BLUETOOTHCTL, &["--timeout", &secs, "scan", "on"], duration + Duration::from_secs(2))
                .await;
    }

    async fn adapter_property(&self, key: &str) -> Option<String> {
        let (_, stdout, _) = run_subprocess(BLUETOOTHCTL, &["show"], self.default_call_timeout).await?;
        for line in stdout.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix(&format!("{key}:")) {
                return Some(rest.trim().to_string());
            }
        }
        None
    }

    async fn set_powered(&self, on: bool) -> bool {
        self.run_toggle("power", on).await
    }

    async fn set_discoverable(&self, on: bool) -> bool {
        self.run_toggle("discoverable", on).await
    }

    async fn set_pairable(&self, on: bool) -> bool {
        self.run_toggle("pairable", on).await
    }

    async fn set_discoverable_timeout(&self, secs: u32) -> bool {
        let secs_s = secs.to_string();
        run_subprocess(BLUETOOTHCTL, &["discoverable-timeout", &secs_s], self.default_call_timeout).await.is_some()
    }

    async fn set_pairable_timeout(&self, secs: u32) -> bool {
        let secs_s = secs.to_string();
        run_subprocess(BLUETOOTHCTL, &["pairable-timeout", &secs_s], self.default_call_timeout).await.is_some()
    }
}

impl RealAdapterDriver {
    async fn run_toggle(&self, subcommand: &'static str, on: bool) -> bool {
        let value = if on { "on" } else { "off" };
        run_subprocess(BLUETOOTHCTL, &[subcommand, value], self.default_call_timeout).await.is_some()
    }
}

/// Spawns `program` with `args`, bounded by `timeout`. Returns `None` on a
/// missing binary, spawn failure, or timeout; `Some((exit_success, stdout,
/// stderr))` otherwise. A binary's complete absence is logged once at
/// `error!`, everything else at `warn!`/`debug!` by the caller.
async fn run_subprocess(program: &'static str, args: &[&str], timeout: Duration) -> Option<(bool, String, String)> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());

    let child = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(command = program, "binary not found; is bluez installed?");
            return None;
        }
        Ok(Err(e)) => {
            warn!(command = program, error = %e, "failed to spawn subprocess");
            return None;
        }
        Err(_) => {
            debug!(command = program, timeout_secs = timeout.as_secs(), "subprocess timed out");
            return None;
        }
    };

    let stdout = String::from_utf8_lossy(&child.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&child.stderr).into_owned();
    Some((child.status.success(), stdout, stderr))
}

async fn run_and_parse_device_list(program: &'static str, args: &[&str], timeout: Duration) -> Vec<MacAddress> {
    let Some((ok, stdout, _)) = run_subprocess(program, args, timeout).await else {
        return Vec::new();
    };
    if !ok {
        return Vec::new();
    }
    parse_device_lines(&stdout)
}

/// Parses `Device <MAC> <Name>` lines as emitted by `bluetoothctl devices`.
fn parse_device_lines(output: &str) -> Vec<MacAddress> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("Device ")?;
            let mac_str = rest.split_whitespace().next()?;
            MacAddress::parse(mac_str)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_list_lines() {
        let output = "Device AA:BB:CC:DD:EE:01 Phone\nDevice AA:BB:CC:DD:EE:02 Watch\n";
        let macs = parse_device_lines(output);
        assert_eq!(macs, vec![MacAddress::parse("AA:BB:CC:DD:EE:01").unwrap(), MacAddress::parse("AA:BB:CC:DD:EE:02").unwrap()]);
    }

    #[test]
    fn ignores_malformed_lines() {
        let output = "Controller AA:BB:CC:DD:EE:FF [default]\nDevice not-a-mac Foo\n";
        assert!(parse_device_lines(output).is_empty());
    }
}
