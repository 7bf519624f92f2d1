use std::sync::Arc;

use strum_macros::Display;

use crate::transport::{Session, TransportEvent};

/// Connection status of a [`Client`](crate::Client).
#[non_exhaustive]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "camelCase")]
pub enum ConnectionStatus {
    /// No live session
    #[default]
    NotConnected,
    /// Waiting for the first connection to be established
    Connecting,
    /// A session is available
    Connected,
}

impl ConnectionStatus {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Status after the transport reports `event`.
    ///
    /// There is no edge back to [`ConnectionStatus::Connecting`]: the transport retries on its
    /// own and reports the next success as a new connect event.
    #[must_use]
    pub fn on_event(self, event: &TransportEvent) -> Self {
        match event {
            TransportEvent::Connected(_) => Self::Connected,
            TransportEvent::Disconnected { .. } => Self::NotConnected,
        }
    }
}

/// Internal view of a client's link. The session lives inside `Connected` so that it cannot
/// outlive the connected status.
#[derive(Clone)]
pub(crate) enum Phase {
    NotConnected,
    Connecting,
    Connected(Arc<dyn Session>),
    Closed,
}

impl Phase {
    pub(crate) fn status(&self) -> ConnectionStatus {
        match self {
            Self::NotConnected | Self::Closed => ConnectionStatus::NotConnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
        }
    }

    pub(crate) fn session(&self) -> Option<Arc<dyn Session>> {
        match self {
            Self::Connected(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Apply a transport event. A closed link ignores further events.
    pub(crate) fn apply(&self, event: &TransportEvent) -> Self {
        if matches!(self, Self::Closed) {
            return Self::Closed;
        }

        match (self.status().on_event(event), event) {
            (ConnectionStatus::Connected, TransportEvent::Connected(session)) => {
                Self::Connected(Arc::clone(session))
            }
            _ => Self::NotConnected,
        }
    }
}
