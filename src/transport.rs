//! Contract between the connection manager and the pub/sub transport it wraps.
//!
//! A [`Transport`] opens a connection to an endpoint and reports its lifecycle as a stream of
//! [`TransportEvent`]s. Each successful (re)connection hands out a fresh [`Session`]; sessions do
//! not carry subscriptions over from a previous connection, which is why the
//! [`Client`](crate::Client) replays them.

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use url::Url;

use crate::Result;
use crate::types::Envelope;

/// Callback invoked with `(topic, payload)` for every message delivered on a subscribed topic.
pub type Handler = Arc<dyn Fn(&str, &Envelope) + Send + Sync>;

/// Lifecycle events of a single endpoint connection.
pub type EventStream = BoxStream<'static, TransportEvent>;

pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`.
    ///
    /// Retrying and backoff are the transport's concern: after a
    /// [`TransportEvent::Disconnected`] it keeps trying and emits [`TransportEvent::Connected`]
    /// again once it succeeds. The stream ends when the transport gives up for good.
    fn connect(&self, url: &Url) -> Result<EventStream>;
}

/// Handle to an established connection.
pub trait Session: Send + Sync + 'static {
    /// Register `handler` for every message published to `topic`.
    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()>;

    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Fire-and-forget publish.
    fn publish(&self, topic: &str, payload: &Envelope) -> Result<()>;
}

#[non_exhaustive]
#[derive(Clone)]
pub enum TransportEvent {
    Connected(Arc<dyn Session>),
    Disconnected {
        /// Human readable reason reported by the transport
        reason: String,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(_) => f.write_str("Connected"),
            Self::Disconnected { reason } => f
                .debug_struct("Disconnected")
                .field("reason", reason)
                .finish(),
        }
    }
}
