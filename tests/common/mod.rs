#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc;
use tokio::time::{sleep, timeout};
use url::Url;
use wamp_topic_client::transport::EventStream;
use wamp_topic_client::{Config, Envelope, Handler, Result, Session, Transport, TransportEvent};
use wamp_topic_client::error::Error;

pub const URL: &str = "ws://push.example.test/";
pub const OTHER_URL: &str = "ws://other.example.test/";
pub const PING_CHANNEL: &str = "app/ping";

#[must_use]
pub fn config() -> Config {
    Config::builder().url(URL).ping_channel(PING_CHANNEL).build()
}

/// Let spawned tasks run without advancing a paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

/// Transport whose connections are driven by the test.
#[derive(Default)]
pub struct MockTransport {
    connections: Mutex<HashMap<String, mpsc::UnboundedSender<TransportEvent>>>,
    connects: AtomicUsize,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times a connection was started.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Report a successful (re)connection to `url` with a fresh session.
    pub fn connect_session(&self, url: &str) -> Arc<MockSession> {
        self.connect_with(url, MockSession::default())
    }

    /// Report a successful (re)connection to `url` with the given session.
    pub fn connect_with(&self, url: &str, session: MockSession) -> Arc<MockSession> {
        let session = Arc::new(session);
        self.emit(url, TransportEvent::Connected(Arc::clone(&session) as Arc<dyn Session>));
        session
    }

    pub fn disconnect(&self, url: &str) {
        self.emit(
            url,
            TransportEvent::Disconnected {
                reason: "connection reset".to_owned(),
            },
        );
    }

    /// End the event stream of `url`, as a transport that stopped retrying does.
    pub fn give_up(&self, url: &str) {
        self.connections.lock().unwrap().remove(url);
    }

    fn emit(&self, url: &str, event: TransportEvent) {
        let connections = self.connections.lock().unwrap();
        let tx = connections.get(url).expect("no connection for url");
        // A closed client no longer listens
        drop(tx.unbounded_send(event));
    }
}

impl Transport for MockTransport {
    fn connect(&self, url: &Url) -> Result<EventStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded();
        self.connections.lock().unwrap().insert(url.to_string(), tx);

        Ok(Box::pin(rx))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Envelope),
}

/// Session that records every call made on it.
#[derive(Default)]
pub struct MockSession {
    calls: Mutex<Vec<Call>>,
    handlers: Mutex<HashMap<String, Handler>>,
    fail_unsubscribe: AtomicBool,
    subscribe_delay: Option<Duration>,
}

impl MockSession {
    /// Session whose `subscribe` blocks the calling thread for `delay` before registering.
    #[must_use]
    pub fn slow(delay: Duration) -> Self {
        Self {
            subscribe_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Subscribe(t) if t == topic))
            .count()
    }

    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish(t, message) if t == topic => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn handler(&self, topic: &str) -> Option<Handler> {
        self.handlers.lock().unwrap().get(topic).cloned()
    }

    /// Deliver `message` to the handler registered for `topic`. Returns whether one was.
    pub fn deliver(&self, topic: &str, message: &Envelope) -> bool {
        let Some(handler) = self.handler(topic) else {
            return false;
        };
        handler(topic, message);
        true
    }

    pub fn fail_unsubscribe(&self) {
        self.fail_unsubscribe.store(true, Ordering::SeqCst);
    }
}

impl Session for MockSession {
    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        if let Some(delay) = self.subscribe_delay {
            std::thread::sleep(delay);
        }
        self.calls
            .lock()
            .unwrap()
            .push(Call::Subscribe(topic.to_owned()));
        self.handlers
            .lock()
            .unwrap()
            .insert(topic.to_owned(), handler);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Unsubscribe(topic.to_owned()));
        self.handlers.lock().unwrap().remove(topic);

        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(Error::transport("unsubscribe rejected"));
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &Envelope) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Publish(topic.to_owned(), payload.clone()));
        Ok(())
    }
}
