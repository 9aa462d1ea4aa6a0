//! Daemon configuration, sourced entirely from the environment.
//!
//! Every field has a sane default matching the original scanner's tuning,
//! so the daemon runs unconfigured; operators override individual knobs
//! with env vars rather than a config file, since this runs as a single
//! long-lived systemd unit rather than a desktop app with a settings UI.

use std::time::Duration;

use presence_protocol::{DecisionConfig, ProbeConfig, RegistryConfig, SchedulerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub polling_interval: Duration,
    pub grace_period: Duration,
    pub present_ttl: Duration,
    pub absence_hold: Duration,
    pub absence_consecutive_miss_threshold: u32,
    pub enable_adaptive_hysteresis: bool,
    pub flap_monitor_window: Duration,
    pub flap_alert_threshold: usize,
    pub enable_auto_freeze_on_flap: bool,
    pub auto_freeze_duration: Duration,
    pub all_silent_absence_cycles: u32,

    pub active_tier_max: usize,
    pub warm_tier_batch: usize,
    pub cold_tier_batch: usize,
    pub warm_tier_threshold: Duration,

    pub l2ping_timeout: Duration,
    pub l2ping_count: u32,
    pub l2ping_resist_threshold: u32,
    pub connect_probe_timeout: Duration,

    pub device_info_cache_ttl: Duration,
    pub pairing_timeout: Duration,
    pub adapter_watchdog_interval: Duration,
    pub advertise_nudge_command: Option<String>,

    pub fast_path_queue_enabled: bool,
    pub fast_path_event_suppression: Duration,

    pub registration_retry_interval: Duration,
    pub unpublished_device_ttl: Duration,

    pub convex_query_timeout: Duration,
    pub max_consecutive_timeouts: u32,
    pub remote_store_url: String,
    pub remote_store_admin_key: String,

    pub device_override_file: Option<String>,
    pub device_override_refresh: Duration,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_polling_interval() -> u64 {
    15
}

fn default_grace_period() -> u64 {
    300
}

fn default_present_ttl() -> u64 {
    60
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            polling_interval: env_duration_secs("POLLING_INTERVAL_SECONDS", default_polling_interval()),
            grace_period: env_duration_secs("GRACE_PERIOD_SECONDS", default_grace_period()),
            present_ttl: env_duration_secs("PRESENT_TTL_SECONDS", default_present_ttl()),
            absence_hold: env_duration_secs("ABSENCE_HOLD_SECONDS", 120),
            absence_consecutive_miss_threshold: env_u32("ABSENCE_CONSECUTIVE_MISS_THRESHOLD", 3),
            enable_adaptive_hysteresis: env_bool("ENABLE_ADAPTIVE_HYSTERESIS", true),
            flap_monitor_window: env_duration_secs("FLAP_MONITOR_WINDOW_SECONDS", 600),
            flap_alert_threshold: env_usize("FLAP_ALERT_THRESHOLD", 4),
            enable_auto_freeze_on_flap: env_bool("ENABLE_AUTO_FREEZE_ON_FLAP", true),
            auto_freeze_duration: env_duration_secs("AUTO_FREEZE_DURATION_SECONDS", 900),
            all_silent_absence_cycles: env_u32("ALL_SILENT_ABSENCE_CYCLES", 2),

            active_tier_max: env_usize("ACTIVE_TIER_MAX", 8),
            warm_tier_batch: env_usize("WARM_TIER_BATCH", 4),
            cold_tier_batch: env_usize("COLD_TIER_BATCH", 2),
            warm_tier_threshold: env_duration_secs("WARM_TIER_THRESHOLD_SECONDS", 3600),

            l2ping_timeout: env_duration_secs("L2PING_TIMEOUT_SECONDS", 5),
            l2ping_count: env_u32("L2PING_COUNT", 1),
            l2ping_resist_threshold: env_u32("L2PING_RESIST_THRESHOLD", 3),
            connect_probe_timeout: env_duration_secs("CONNECT_PROBE_TIMEOUT_SECONDS", 8),

            device_info_cache_ttl: env_duration_secs("DEVICE_INFO_CACHE_SECONDS", 30),
            pairing_timeout: env_duration_secs("PAIRING_TIMEOUT_SECONDS", 30),
            adapter_watchdog_interval: env_duration_secs("ADAPTER_WATCHDOG_INTERVAL_SECONDS", 60),
            advertise_nudge_command: std::env::var("ADVERTISE_NUDGE_COMMAND").ok(),

            fast_path_queue_enabled: env_bool("FAST_PATH_QUEUE_ENABLED", true),
            fast_path_event_suppression: env_duration_secs("FAST_PATH_EVENT_SUPPRESSION_SECONDS", 30),

            registration_retry_interval: env_duration_secs("REGISTRATION_RETRY_SECONDS", 60),
            unpublished_device_ttl: env_duration_secs("UNPUBLISHED_DEVICE_TTL_SECONDS", 3600),

            convex_query_timeout: env_duration_secs("CONVEX_QUERY_TIMEOUT", 10),
            max_consecutive_timeouts: env_u32("MAX_CONSECUTIVE_TIMEOUTS", 5),
            remote_store_url: env_string("REMOTE_STORE_URL", "http://localhost:3210"),
            remote_store_admin_key: env_string("REMOTE_STORE_ADMIN_KEY", ""),

            device_override_file: std::env::var("DEVICE_OVERRIDE_FILE").ok(),
            device_override_refresh: env_duration_secs("DEVICE_OVERRIDE_REFRESH_SECONDS", 30),
        }
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            present_ttl: self.present_ttl,
            enable_adaptive_hysteresis: self.enable_adaptive_hysteresis,
            absence_hold: self.absence_hold,
            absence_consecutive_miss_threshold: self.absence_consecutive_miss_threshold,
            flap_monitor_window: self.flap_monitor_window,
            flap_alert_threshold: self.flap_alert_threshold,
            enable_auto_freeze_on_flap: self.enable_auto_freeze_on_flap,
            auto_freeze_duration: self.auto_freeze_duration,
            all_silent_absence_cycles: self.all_silent_absence_cycles,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            present_ttl: self.present_ttl,
            warm_tier_threshold: self.warm_tier_threshold,
            active_tier_max: self.active_tier_max,
            warm_tier_batch: self.warm_tier_batch,
            cold_tier_batch: self.cold_tier_batch,
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            l2ping_count: self.l2ping_count,
            l2ping_timeout: self.l2ping_timeout,
            connect_probe_timeout: self.connect_probe_timeout,
            l2ping_resist_threshold: self.l2ping_resist_threshold,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: self.remote_store_url.clone(),
            admin_key: self.remote_store_admin_key.clone(),
            query_timeout: self.convex_query_timeout,
            max_consecutive_timeouts: self.max_consecutive_timeouts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_scanner_tuning() {
        std::env::remove_var("POLLING_INTERVAL_SECONDS");
        std::env::remove_var("PRESENT_TTL_SECONDS");

        let config = Config::from_env();
        assert_eq!(config.polling_interval, Duration::from_secs(15));
        assert_eq!(config.present_ttl, Duration::from_secs(60));
        assert!(config.enable_adaptive_hysteresis);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("ACTIVE_TIER_MAX", "20");
        let config = Config::from_env();
        assert_eq!(config.active_tier_max, 20);
        std::env::remove_var("ACTIVE_TIER_MAX");
    }
}
