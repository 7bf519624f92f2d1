use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::WsError;
use super::frame::Frame;
use crate::Result;
use crate::transport::{Handler, Session};
use crate::types::Envelope;

/// Session over a single WebSocket connection.
///
/// Handlers are per connection: a reconnection yields a new session with none registered.
pub struct WsSession {
    session_id: String,
    /// Sender channel for outgoing frames, closed once the connection is gone
    sender_tx: mpsc::UnboundedSender<String>,
    handlers: DashMap<String, Handler>,
}

impl WsSession {
    pub(crate) fn new(session_id: String, sender_tx: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            sender_tx,
            handlers: DashMap::new(),
        })
    }

    /// Session id assigned by the server in its WELCOME message.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        let text = frame.encode()?;
        self.sender_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Hand an EVENT payload to the handler registered for `topic`.
    pub(crate) fn dispatch(&self, topic: &str, event: Value) {
        // Clone out of the map so a handler may (un)subscribe without deadlocking
        let Some(handler) = self.handlers.get(topic).map(|entry| entry.value().clone()) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(%topic, "Dropping event for topic without handler");
            return;
        };

        match serde_json::from_value::<Envelope>(event) {
            Ok(payload) => handler(topic, &payload),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%topic, error = %e, "Failed to parse event payload");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

impl Session for WsSession {
    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        self.handlers.insert(topic.to_owned(), handler);
        self.send(&Frame::Subscribe {
            topic: topic.to_owned(),
        })
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        if self.handlers.remove(topic).is_none() {
            return Err(WsError::NotSubscribed(topic.to_owned()).into());
        }

        self.send(&Frame::Unsubscribe {
            topic: topic.to_owned(),
        })
    }

    fn publish(&self, topic: &str, payload: &Envelope) -> Result<()> {
        self.send(&Frame::Publish {
            topic: topic.to_owned(),
            event: serde_json::to_value(payload)?,
        })
    }
}

impl fmt::Debug for WsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<String> = self.handlers.iter().map(|entry| entry.key().clone()).collect();

        f.debug_struct("WsSession")
            .field("session_id", &self.session_id)
            .field("topics", &topics)
            .finish_non_exhaustive()
    }
}
