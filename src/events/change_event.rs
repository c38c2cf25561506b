//! Change events delivered to subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::payload::Payload;
use crate::config::ChangeKind;
use crate::error::ListenerError;

/// One received notification
///
/// `message` always holds the text exactly as it came off the queue, so
/// subscribers can fall back to it when `data` is a default value.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub message: String,
    pub data: T,
    pub received_at: DateTime<Utc>,
}

impl<T: Payload> ChangeEvent<T> {
    /// Build an event, substituting `T::default()` when decoding fails
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        Self::decode_message(message.into()).0
    }

    /// Build an event and report the decode failure, if any
    pub(crate) fn decode_message(message: String) -> (Self, Option<ListenerError>) {
        let (data, failure) = if message.is_empty() {
            (T::default(), None)
        } else {
            match T::decode(&message) {
                Ok(data) => (data, None),
                Err(e) => {
                    debug!(error = %e, message_len = message.len(), "Falling back to default payload");
                    (T::default(), Some(e))
                }
            }
        };

        let event = Self {
            message,
            data,
            received_at: Utc::now(),
        };
        (event, failure)
    }
}

/// Message body produced by the notification trigger
///
/// `inserted` holds post-images and `deleted` pre-images; an update carries
/// both. `R` is the row shape, for example a struct matching the table's
/// columns or [`serde_json::Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData<R> {
    #[serde(default)]
    pub event_type: String,
    pub inserted: Option<Vec<R>>,
    pub deleted: Option<Vec<R>>,
}

impl<R> Default for EventData<R> {
    fn default() -> Self {
        Self {
            event_type: String::new(),
            inserted: None,
            deleted: None,
        }
    }
}

impl<R> EventData<R> {
    /// Kind of change, or `None` for an empty or unknown `event_type`
    pub fn kind(&self) -> Option<ChangeKind> {
        self.event_type.parse().ok()
    }

    pub fn inserted_rows(&self) -> &[R] {
        self.inserted.as_deref().unwrap_or_default()
    }

    pub fn deleted_rows(&self) -> &[R] {
        self.deleted.as_deref().unwrap_or_default()
    }
}
