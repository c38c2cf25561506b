//! Payload types a listener can decode received messages into

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::change_event::EventData;
use crate::error::Result;

/// A type received messages are decoded into
///
/// `Default` supplies the value handed to subscribers when a message is
/// empty or fails to decode.
pub trait Payload: Default + Send + Sync + 'static {
    fn decode(message: &str) -> Result<Self>;
}

/// Raw text, passed through unchanged
impl Payload for String {
    fn decode(message: &str) -> Result<Self> {
        Ok(message.to_string())
    }
}

impl Payload for serde_json::Value {
    fn decode(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }
}

impl<R> Payload for Vec<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    fn decode(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }
}

impl<R> Payload for EventData<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    fn decode(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }
}

/// Decode into any serde type with a `Default`
///
/// ```rust
/// use mssql_notify::events::{Json, Payload};
/// use serde::Deserialize;
///
/// #[derive(Debug, Default, Deserialize, PartialEq)]
/// struct Envelope {
///     event_type: String,
/// }
///
/// let decoded = Json::<Envelope>::decode(r#"{"event_type":"insert"}"#).unwrap();
/// assert_eq!(decoded.into_inner().event_type, "insert");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Payload for Json<T>
where
    T: DeserializeOwned + Default + Send + Sync + 'static,
{
    fn decode(message: &str) -> Result<Self> {
        Ok(Json(serde_json::from_str(message)?))
    }
}
