//! Centralized error logging for the polling loop.
//!
//! There is no desktop session to notify here, so this collapses the
//! teacher's error-handler-plus-notifications pair down to classification
//! and structured logging: transient failures (registry blips, timeouts)
//! are logged at `warn` and the caller is told to retry next cycle;
//! anything else is logged at `error` as a problem worth operator
//! attention.

use presence_protocol::PresenceError;
use tracing::{error, warn};

/// Logs a `PresenceError` at a level matching its severity and reports
/// whether the polling loop should treat it as recoverable.
#[derive(Clone, Default)]
pub struct ErrorHandler;

impl ErrorHandler {
    pub fn new() -> Self {
        Self
    }

    /// Logs `error` at a severity appropriate to its classification and
    /// returns whether the caller should keep retrying on later cycles.
    pub fn handle(&self, error: &PresenceError, context: &str) -> bool {
        if error.is_transient() {
            warn!(context, error = %error, "transient failure, will retry");
        } else {
            error!(context, error = %error, "non-transient failure");
        }
        error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_recoverable() {
        let handler = ErrorHandler::new();
        assert!(handler.handle(&PresenceError::Registry("timeout".into()), "registry write"));
        assert!(handler.handle(&PresenceError::Registry("circuit breaker open after 5 consecutive timeouts".into()), "registry poll"));
    }

    #[test]
    fn configuration_errors_are_not_recoverable() {
        let handler = ErrorHandler::new();
        assert!(!handler.handle(&PresenceError::Configuration("bad override file".into()), "startup"));
    }
}
