use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Payload of the keep-alive message published on the ping channel.
pub const PING_MESSAGE: &str = "ping";

/// Message wrapper exchanged on every topic.
///
/// The only field every payload carries is `message`; any other fields are kept verbatim in
/// [`Envelope::extra`] and flattened back into the same JSON object when serialized.
///
/// ```
/// use wamp_topic_client::types::Envelope;
///
/// let envelope = Envelope::new("created").with("id", 42);
/// assert_eq!(
///     serde_json::to_string(&envelope).unwrap(),
///     r#"{"message":"created","id":42}"#
/// );
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            extra: Map::new(),
        }
    }

    /// The heartbeat payload, `{"message":"ping"}`.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING_MESSAGE)
    }

    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.message == PING_MESSAGE && self.extra.is_empty()
    }

    /// Attach an extra field. Values that fail to serialize are stored as `null`.
    #[must_use]
    pub fn with<K: Into<String>, V: Serialize>(mut self, key: K, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Deserialize the whole envelope, `message` included, into a caller-defined type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }
}
