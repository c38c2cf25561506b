//! Subscriber interface of a change listener

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ListenerError, Result};
use crate::events::{ChangeEvent, Payload};

/// Trait for handling change notifications
///
/// Methods are awaited from the listener's receive loop, one event at a time:
/// the next poll starts only after `handle_change` returns.
#[async_trait]
pub trait ChangeEventHandler<T: Payload>: Send + Sync {
    /// Handle a received change event
    ///
    /// An error is logged and counted; the loop keeps running.
    async fn handle_change(&self, event: ChangeEvent<T>) -> Result<()>;

    /// Called before `handle_change` when the message did not decode into `T`
    async fn handle_decode_error(&self, message: &str, error: ListenerError) {
        warn!(
            error = %error,
            message_len = message.len(),
            "Notification did not match the payload type; delivering default value"
        );
    }

    /// Called once each time the receive loop exits, whatever the reason
    async fn handle_stopped(&self) {
        info!("Change listener receive loop stopped");
    }
}

type ChangeCallback<T> = Box<dyn Fn(ChangeEvent<T>) + Send + Sync>;
type StoppedCallback = Box<dyn Fn() + Send + Sync>;

/// Handler built from plain closures
///
/// ```rust
/// use mssql_notify::listener::CallbackHandler;
///
/// let handler = CallbackHandler::<String>::new(|event| {
///     println!("{}", event.message);
/// })
/// .on_stopped(|| println!("listener stopped"));
/// # let _ = handler;
/// ```
pub struct CallbackHandler<T> {
    on_change: ChangeCallback<T>,
    on_stopped: Option<StoppedCallback>,
}

impl<T> CallbackHandler<T> {
    pub fn new<F>(on_change: F) -> Self
    where
        F: Fn(ChangeEvent<T>) + Send + Sync + 'static,
    {
        Self {
            on_change: Box::new(on_change),
            on_stopped: None,
        }
    }

    /// Register the "loop stopped" callback
    pub fn on_stopped<F>(mut self, on_stopped: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stopped = Some(Box::new(on_stopped));
        self
    }
}

impl<T> std::fmt::Debug for CallbackHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("on_stopped", &self.on_stopped.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Payload> ChangeEventHandler<T> for CallbackHandler<T> {
    async fn handle_change(&self, event: ChangeEvent<T>) -> Result<()> {
        (self.on_change)(event);
        Ok(())
    }

    async fn handle_stopped(&self) {
        if let Some(on_stopped) = &self.on_stopped {
            on_stopped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_callback_handler_invokes_closures() {
        let changes = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));

        let handler = {
            let changes = Arc::clone(&changes);
            let stops = Arc::clone(&stops);
            CallbackHandler::<String>::new(move |event| {
                assert_eq!(event.message, "hello");
                changes.fetch_add(1, Ordering::SeqCst);
            })
            .on_stopped(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            })
        };

        handler
            .handle_change(ChangeEvent::from_message("hello"))
            .await
            .unwrap();
        handler.handle_stopped().await;

        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_callback_is_optional() {
        let handler = CallbackHandler::<String>::new(|_| {});
        handler.handle_stopped().await;
    }
}
