//! The publish/subscribe subset of WAMP v1 messages.
//!
//! Every WAMP v1 message is a JSON array whose first element is the [`MessageType`]. Only the
//! messages needed for pub/sub are modelled; RPC and prefix messages are recognised but not
//! decoded.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::error::WsError;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    Welcome = 0,
    Prefix = 1,
    Call = 2,
    CallResult = 3,
    CallError = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Publish = 7,
    Event = 8,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `[0, sessionId, protocolVersion, serverIdent]`, sent by the server once per connection
    Welcome {
        session_id: String,
        protocol_version: u64,
        server_ident: String,
    },
    /// `[5, topic]`
    Subscribe { topic: String },
    /// `[6, topic]`
    Unsubscribe { topic: String },
    /// `[7, topic, event]`
    Publish { topic: String, event: Value },
    /// `[8, topic, event]`
    Event { topic: String, event: Value },
    /// Any other valid message type
    Other(MessageType),
}

impl Frame {
    pub fn encode(&self) -> Result<String, WsError> {
        let value = match self {
            Self::Welcome {
                session_id,
                protocol_version,
                server_ident,
            } => json!([MessageType::Welcome, session_id, protocol_version, server_ident]),
            Self::Subscribe { topic } => json!([MessageType::Subscribe, topic]),
            Self::Unsubscribe { topic } => json!([MessageType::Unsubscribe, topic]),
            Self::Publish { topic, event } => json!([MessageType::Publish, topic, event]),
            Self::Event { topic, event } => json!([MessageType::Event, topic, event]),
            Self::Other(kind) => {
                return Err(WsError::InvalidMessage(format!(
                    "{kind:?} messages cannot be encoded"
                )));
            }
        };

        serde_json::to_string(&value).map_err(WsError::MessageParse)
    }

    pub fn parse(text: &str) -> Result<Self, WsError> {
        let items: Vec<Value> = serde_json::from_str(text).map_err(WsError::MessageParse)?;
        let mut items = items.into_iter();

        let kind: MessageType = take(&mut items, "message type")?;

        let frame = match kind {
            MessageType::Welcome => Self::Welcome {
                session_id: take(&mut items, "session id")?,
                protocol_version: take(&mut items, "protocol version")?,
                server_ident: take(&mut items, "server ident")?,
            },
            MessageType::Subscribe => Self::Subscribe {
                topic: take(&mut items, "topic")?,
            },
            MessageType::Unsubscribe => Self::Unsubscribe {
                topic: take(&mut items, "topic")?,
            },
            MessageType::Publish => Self::Publish {
                topic: take(&mut items, "topic")?,
                event: take(&mut items, "event")?,
            },
            MessageType::Event => Self::Event {
                topic: take(&mut items, "topic")?,
                event: take(&mut items, "event")?,
            },
            other => Self::Other(other),
        };

        Ok(frame)
    }
}

fn take<T: DeserializeOwned>(
    items: &mut impl Iterator<Item = Value>,
    what: &str,
) -> Result<T, WsError> {
    let value = items
        .next()
        .ok_or_else(|| WsError::InvalidMessage(format!("missing {what}")))?;

    serde_json::from_value(value).map_err(WsError::MessageParse)
}
