use std::sync::Arc;

use async_stream::stream;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::frame::Frame;
use super::session::WsSession;
use crate::Result;
use crate::error::Error;
use crate::transport::{EventStream, Session, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over `tokio-tungstenite` speaking the pub/sub subset of WAMP v1.
///
/// Each call to [`Transport::connect`] spawns a background task that:
/// - establishes the WebSocket connection and waits for the server's WELCOME
/// - reports [`TransportEvent::Connected`] with a fresh [`WsSession`]
/// - routes EVENT frames to the session's handlers
/// - reports [`TransportEvent::Disconnected`] when the connection drops, then reconnects with
///   exponential backoff
///
/// The task stops once the returned event stream is dropped or the configured maximum number of
/// reconnection attempts is exhausted, in which case the stream ends.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    config: Config,
}

/// How a single connection ended.
enum Outcome {
    /// The consumer dropped the event stream
    Stopped,
    Closed { welcomed: bool, reason: String },
}

impl WsTransport {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Main connection loop with automatic reconnection.
    async fn connection_loop(
        endpoint: Url,
        config: Config,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let mut attempt = 0_u32;
        let mut backoff: backoff::ExponentialBackoff = config.reconnect.clone().into();

        loop {
            let connected = tokio::select! {
                () = events_tx.closed() => break,
                result = timeout(config.connect_timeout, Self::open(&endpoint, &config)) => {
                    result.unwrap_or_else(|_elapsed| Err(WsError::Timeout.into()))
                }
            };

            match connected {
                Ok(ws_stream) => match Self::handle_connection(ws_stream, &events_tx, &config).await {
                    Outcome::Stopped => break,
                    Outcome::Closed { welcomed, reason } => {
                        if welcomed {
                            attempt = 0;
                            backoff.reset();

                            if events_tx
                                .send(TransportEvent::Disconnected { reason })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(%endpoint, %reason, "Connection closed before WELCOME");
                            attempt = attempt.saturating_add(1);
                        }
                    }
                },
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%endpoint, "Unable to connect: {e:?}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    attempt = attempt.saturating_add(1);
                }
            }

            // Check if we should stop reconnecting
            if let Some(max) = config.reconnect.max_attempts
                && attempt >= max
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(%endpoint, attempt, "Giving up reconnecting");
                break;
            }

            if let Some(duration) = backoff.next_backoff() {
                tokio::select! {
                    () = events_tx.closed() => break,
                    () = sleep(duration) => {}
                }
            }
        }
    }

    async fn open(endpoint: &Url, config: &Config) -> Result<WsStream> {
        let mut request = endpoint.as_str().into_client_request()?;
        if let Some(subprotocol) = &config.subprotocol {
            let value = HeaderValue::from_str(subprotocol)
                .map_err(|e| WsError::InvalidMessage(e.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (ws_stream, _) = connect_async(request).await?;
        Ok(ws_stream)
    }

    /// Handle an active WebSocket connection.
    async fn handle_connection(
        ws_stream: WsStream,
        events_tx: &mpsc::UnboundedSender<TransportEvent>,
        config: &Config,
    ) -> Outcome {
        let (mut write, mut read) = ws_stream.split();
        let (sender_tx, mut sender_rx) = mpsc::unbounded_channel::<String>();
        let mut session: Option<Arc<WsSession>> = None;

        let welcome_deadline = sleep(config.welcome_timeout);
        tokio::pin!(welcome_deadline);

        let closed = |welcomed: bool, reason: String| Outcome::Closed { welcomed, reason };

        loop {
            tokio::select! {
                () = events_tx.closed() => {
                    _ = write.send(Message::Close(None)).await;
                    return Outcome::Stopped;
                }

                () = &mut welcome_deadline, if session.is_none() => {
                    return closed(false, WsError::Timeout.to_string());
                }

                // Handle incoming messages
                msg = read.next() => {
                    let welcomed = session.is_some();
                    match msg {
                        Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                            Ok(Frame::Welcome { session_id, .. }) if !welcomed => {
                                #[cfg(feature = "tracing")]
                                tracing::debug!(%session_id, "Received WELCOME");

                                let new_session = WsSession::new(session_id, sender_tx.clone());
                                let connected = TransportEvent::Connected(
                                    Arc::clone(&new_session) as Arc<dyn Session>,
                                );
                                if events_tx.send(connected).is_err() {
                                    return Outcome::Stopped;
                                }
                                session = Some(new_session);
                            }
                            Ok(Frame::Event { topic, event }) => {
                                if let Some(session) = &session {
                                    session.dispatch(&topic, event);
                                }
                            }
                            Ok(frame) => {
                                #[cfg(feature = "tracing")]
                                tracing::debug!(?frame, "Ignoring WAMP message");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &frame;
                            }
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                                #[cfg(not(feature = "tracing"))]
                                let _ = (&text, &e);
                            }
                        },
                        Some(Ok(Message::Close(_))) => {
                            return closed(welcomed, WsError::ConnectionClosed.to_string());
                        }
                        Some(Ok(_)) => {
                            // Ignore binary frames and control frames handled by tungstenite.
                        }
                        Some(Err(e)) => return closed(welcomed, WsError::Connection(e).to_string()),
                        None => return closed(welcomed, WsError::ConnectionClosed.to_string()),
                    }
                }

                // Handle outgoing frames from the session
                Some(text) = sender_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return closed(session.is_some(), WsError::Connection(e).to_string());
                    }
                }
            }
        }
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: &Url) -> Result<EventStream> {
        let runtime = Handle::try_current().map_err(|_e| {
            Error::configuration("a tokio runtime is required to start the WebSocket transport")
        })?;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        runtime.spawn(Self::connection_loop(
            url.clone(),
            self.config.clone(),
            events_tx,
        ));

        Ok(Box::pin(stream! {
            while let Some(event) = events_rx.recv().await {
                yield event;
            }
        }))
    }
}
