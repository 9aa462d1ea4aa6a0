//! Error types for the presence-tracking engine.
//!
//! Per the error handling design, almost nothing here is fatal: adapter and
//! registry failures are logged and swallowed by their callers, which is why
//! most of the engine's public functions return `bool`/`Option` rather than
//! `Result`. `PresenceError` exists for the handful of operations that *can*
//! fail outright: agent registration, config/override loading, and registry
//! transport setup.

use thiserror::Error;

/// Errors surfaced by the presence engine's fallible setup and I/O paths.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("registry request failed: {0}")]
    Registry(String),

    #[error("override file error: {0}")]
    OverrideFile(#[from] std::io::Error),

    #[error("override file malformed: {0}")]
    OverrideFileMalformed(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PresenceError {
    /// Whether the condition is expected to clear on its own given a retry
    /// on a later cycle (network blip, busy adapter) versus a persistent
    /// misconfiguration that needs operator attention.
    pub fn is_transient(&self) -> bool {
        matches!(self, PresenceError::Registry(_) | PresenceError::DBus(_))
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;
