//! Background receive loop of a change listener

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::ChangeEventHandler;
use super::state::{ListenerState, ListenerStats};
use crate::database::SqlExecutor;
use crate::events::{ChangeEvent, Payload};
use crate::logging::log_error;

/// Everything one loop run needs, detached from the listener that spawned it
pub(crate) struct ReceiveLoop<T: Payload> {
    pub executor: Arc<dyn SqlExecutor>,
    pub handler: Arc<dyn ChangeEventHandler<T>>,
    pub state: Arc<RwLock<ListenerState>>,
    pub stats: Arc<RwLock<ListenerStats>>,
    pub poll_sql: String,
    pub command_timeout: Duration,
    pub identity: i32,
}

/// Handle on a spawned loop
pub(crate) struct ReceiveTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReceiveTask {
    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait until the loop has exited
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Receive loop task ended abnormally");
        }
    }
}

impl<T: Payload> ReceiveLoop<T> {
    pub fn spawn(self) -> ReceiveTask {
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.run(token.clone()));
        ReceiveTask { token, handle }
    }

    async fn run(self, token: CancellationToken) {
        *self.state.write() = ListenerState::Listening;
        info!(identity = self.identity, "Receive loop started");

        loop {
            // Checked between polls only; a poll in flight always completes
            if token.is_cancelled() {
                debug!(identity = self.identity, "Receive loop cancelled");
                break;
            }

            self.stats.write().polls += 1;

            match self
                .executor
                .query_scalar_text(&self.poll_sql, self.command_timeout)
                .await
            {
                Ok(Some(message)) if !message.is_empty() => self.dispatch(message).await,
                Ok(_) => {
                    self.stats.write().timeouts += 1;
                }
                Err(e) => {
                    let identity = self.identity.to_string();
                    log_error("receive_loop", "poll", &e.to_string(), Some(&identity));
                    let mut stats = self.stats.write();
                    stats.loop_faults += 1;
                    stats.record_error(&e.to_string());
                    break;
                }
            }
        }

        *self.state.write() = ListenerState::Stopping;
        self.handler.handle_stopped().await;
        *self.state.write() = ListenerState::Idle;
        info!(identity = self.identity, "Receive loop exited");
    }

    async fn dispatch(&self, message: String) {
        let (event, decode_failure) = ChangeEvent::<T>::decode_message(message);

        {
            let mut stats = self.stats.write();
            stats.events_received += 1;
            stats.last_event_at = Some(Utc::now());
        }
        debug!(
            identity = self.identity,
            message_len = event.message.len(),
            "Dispatching change event"
        );

        if let Some(e) = decode_failure {
            {
                let mut stats = self.stats.write();
                stats.decode_failures += 1;
                stats.record_error(&e.to_string());
            }
            self.handler.handle_decode_error(&event.message, e).await;
        }

        let outcome = AssertUnwindSafe(self.handler.handle_change(event))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("handler panicked".to_string()),
        };

        if let Some(failure) = failure {
            warn!(identity = self.identity, error = %failure, "Change event handler failed");
            let mut stats = self.stats.write();
            stats.handler_failures += 1;
            stats.record_error(&failure);
        }
    }
}
