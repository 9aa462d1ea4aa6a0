//! Command-line interface and logging setup for the presence daemon.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Bluetooth presence daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "presence-daemon")]
#[command(about = "Bluetooth presence-tracking daemon", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value = "true")]
    pub timestamps: bool,

    /// Path to the device override file (overrides DEVICE_OVERRIDE_FILE)
    #[arg(long, value_name = "PATH")]
    pub override_file: Option<String>,

    /// Run a single polling cycle and exit instead of looping
    #[arg(long)]
    pub once: bool,
}

/// Default filter directive: the requested level scoped to this crate and
/// `presence_protocol`, `warn` everywhere else. A bare level applied
/// blanket-wide makes `reqwest`'s/`zbus`'s own `info` logging drown out the
/// daemon's.
fn default_filter_directive(level: Level) -> String {
    let level = level.to_string().to_ascii_lowercase();
    format!("warn,presence_daemon={level},presence_protocol={level}")
}

fn build_filter(cli: &Cli) -> Result<EnvFilter> {
    let level = cli.log_level.parse::<Level>().with_context(|| {
        format!("invalid log level '{}' (expected one of error, warn, info, debug, trace)", cli.log_level)
    })?;

    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter_directive(level)))
        .context("failed to build tracing filter")
}

/// Initializes the global tracing subscriber from CLI flags. `RUST_LOG`, if
/// set, wins outright; otherwise the requested level is scoped to this crate
/// and `presence_protocol` rather than applied to every dependency.
pub fn init_logging(cli: &Cli) -> Result<()> {
    let filter = build_filter(cli)?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(json = cli.json_logs, timestamps = cli.timestamps, level = %cli.log_level, "presence daemon logging ready");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_with_defaults() {
        let cli = Cli::parse_from(["presence-daemon"]);
        assert_eq!(cli.log_level, "info");
        assert!(!cli.json_logs);
        assert!(cli.timestamps);
        assert!(!cli.once);
        assert!(cli.override_file.is_none());
    }

    #[test]
    fn cli_accepts_override_file_and_once() {
        let cli = Cli::parse_from(["presence-daemon", "--override-file", "/etc/presence/overrides.json", "--once"]);
        assert_eq!(cli.override_file.as_deref(), Some("/etc/presence/overrides.json"));
        assert!(cli.once);
    }

    #[test]
    fn cli_debug_asserts_clean() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_filter_scopes_level_to_this_crate() {
        let directive = default_filter_directive(Level::DEBUG);
        assert_eq!(directive, "warn,presence_daemon=debug,presence_protocol=debug");
    }
}
