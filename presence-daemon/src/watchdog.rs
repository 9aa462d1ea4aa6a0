//! Adapter Watchdog: periodically re-asserts the five properties the
//! pairing agent depends on (`Powered`, `Discoverable`, `Pairable`, and
//! both timeouts pinned at zero) and nudges advertising back on when the
//! adapter has drifted out of that state.

use std::sync::Arc;
use std::time::Duration;

use presence_protocol::AdapterDriver;
use tracing::{debug, info, warn};

fn is_yes(value: Option<String>) -> bool {
    matches!(value.as_deref(), Some("yes"))
}

fn is_zero(value: Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some("0")
}

async fn is_healthy(adapter: &dyn AdapterDriver) -> bool {
    is_yes(adapter.adapter_property("Powered").await)
        && is_yes(adapter.adapter_property("Discoverable").await)
        && is_yes(adapter.adapter_property("Pairable").await)
        && is_zero(adapter.adapter_property("DiscoverableTimeout").await)
        && is_zero(adapter.adapter_property("PairableTimeout").await)
}

async fn reassert(adapter: &dyn AdapterDriver) {
    adapter.set_powered(true).await;
    adapter.set_discoverable(true).await;
    adapter.set_pairable(true).await;
    adapter.set_discoverable_timeout(0).await;
    adapter.set_pairable_timeout(0).await;
}

/// One watchdog check: re-asserts adapter state if unhealthy, and nudges
/// advertising plus a short discovery pulse if it's still unhealthy
/// afterward. Never panics; every adapter call already collapses failures
/// to `false`/`None`.
pub async fn check(adapter: &dyn AdapterDriver, nudge_command: Option<&str>, discovery_pulse: Duration) {
    if is_healthy(adapter).await {
        debug!("adapter watchdog: healthy");
        return;
    }

    warn!("adapter watchdog: unhealthy, re-asserting powered/discoverable/pairable");
    reassert(adapter).await;

    if is_healthy(adapter).await {
        info!("adapter watchdog: recovered after re-assertion");
        return;
    }

    warn!("adapter watchdog: still unhealthy after re-assertion, nudging advertising");
    if let Some(command) = nudge_command.filter(|c| !c.is_empty()) {
        match tokio::process::Command::new("sh").arg("-c").arg(command).status().await {
            Ok(status) if !status.success() => warn!(%status, "advertise nudge command exited non-zero"),
            Err(e) => warn!(error = %e, "failed to spawn advertise nudge command"),
            _ => {}
        }
    }
    adapter.discovery_pulse(discovery_pulse).await;
}

/// Spawns the watchdog as a background task running every `interval`.
pub fn spawn(adapter: Arc<dyn AdapterDriver>, interval: Duration, nudge_command: Option<String>, discovery_pulse: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            check(adapter.as_ref(), nudge_command.as_deref(), discovery_pulse).await;
        }
    });
}
