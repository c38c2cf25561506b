//! # Change Events
//!
//! Decoding of queue messages into the events subscribers receive.
//!
//! A listener is generic over its [`Payload`] type. Raw text (`String`) is
//! passed through untouched; every other payload is decoded from JSON, and a
//! message that is empty or does not decode yields `Payload::default()` while
//! the original text stays available on [`ChangeEvent::message`].

pub mod change_event;
pub mod payload;

pub use crate::config::ChangeKind;
pub use change_event::{ChangeEvent, EventData};
pub use payload::{Json, Payload};
