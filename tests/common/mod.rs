//! Shared helpers for listener integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use mssql_notify::{ChangeEvent, ChangeEventHandler, ListenerConfig, ListenerError, Payload};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handler that records everything it receives
///
/// Clones share the recorded events.
#[derive(Clone)]
pub struct RecordingHandler<T> {
    events: Arc<Mutex<Vec<ChangeEvent<T>>>>,
    decode_errors: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    fail_changes: bool,
}

impl<T> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            decode_errors: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
            fail_changes: false,
        }
    }
}

impl<T: Clone> RecordingHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events but report every one as failed
    pub fn failing() -> Self {
        Self {
            fail_changes: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ChangeEvent<T>> {
        self.events.lock().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn decode_errors(&self) -> usize {
        self.decode_errors.load(Ordering::SeqCst)
    }

    pub fn stopped_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Payload + Clone> ChangeEventHandler<T> for RecordingHandler<T> {
    async fn handle_change(&self, event: ChangeEvent<T>) -> mssql_notify::Result<()> {
        self.events.lock().push(event);
        if self.fail_changes {
            return Err(ListenerError::handler("recording handler configured to fail"));
        }
        Ok(())
    }

    async fn handle_decode_error(&self, _message: &str, _error: ListenerError) {
        self.decode_errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config() -> ListenerConfig {
    ListenerConfig::new("server=tcp:localhost,1433", "TEST_DB", "TEST_TABLE")
        .with_command_timeout_ms(200)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
