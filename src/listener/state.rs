//! Listener state and statistics

use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle state of a change listener
///
/// ```text
/// Idle ──start (automatic)──▶ Installing ──first poll──▶ Listening
/// Idle ──start (manual)───────────────────first poll──▶ Listening
/// Listening ──stop / fault──▶ Stopping ──cleanup──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListenerState {
    #[default]
    Idle,
    Installing,
    Listening,
    Stopping,
}

impl ListenerState {
    /// True only while the receive loop is polling
    pub fn is_active(&self) -> bool {
        matches!(self, ListenerState::Listening)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::Installing => "installing",
            ListenerState::Listening => "listening",
            ListenerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about the listener
///
/// Counters accumulate across restarts of the same listener. `last_error` is
/// best effort and is overwritten by each new failure.
#[derive(Debug, Clone, Default)]
pub struct ListenerStats {
    pub polls: u64,
    pub timeouts: u64,
    pub events_received: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub loop_faults: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ListenerStats {
    pub(crate) fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(Utc::now());
    }
}
