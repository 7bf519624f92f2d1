use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use futures::StreamExt as _;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};
use url::Url;

use crate::Result;
use crate::config::Config;
use crate::error::Error;
use crate::heartbeat::Heartbeat;
use crate::state::{ConnectionStatus, Phase};
use crate::subscription::{SubscriptionInfo, SubscriptionRegistry};
use crate::transport::{EventStream, Handler, Session, Transport, TransportEvent};
use crate::types::Envelope;

/// Live clients keyed by endpoint URL.
pub(crate) type Instances = DashMap<String, Client>;

/// One logical connection to a WAMP pub/sub endpoint.
///
/// A client starts connecting as soon as it is created and follows the transport through
/// `connecting → connected → notConnected → connected → ...`. Topics subscribed through it are
/// remembered and registered again every time the transport reconnects, and, unless disabled, a
/// `{"message":"ping"}` keep-alive is published on the configured ping channel while connected.
///
/// Clients are usually obtained from a [`Registry`](crate::Registry), which hands out one
/// instance per URL. Cloning a client is cheap and every clone refers to the same connection.
///
/// # Example
///
/// ```rust, no_run
/// use wamp_topic_client::{Config, Registry};
/// use wamp_topic_client::types::Envelope;
/// # use std::sync::Arc;
/// # fn transport() -> Arc<dyn wamp_topic_client::transport::Transport> { unimplemented!() }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let registry = Registry::new(transport()).with_default_url("ws://localhost:8080");
///     let client = registry.get_or_create(Config::builder().ping_channel("app/ping").build())?;
///
///     let first = client.subscribe("app/chat", |topic, payload| {
///         println!("{topic}: {}", payload.message);
///     });
///     client.publish("app/chat", Envelope::new("hello"));
///
///     assert!(first.await);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// State shared between the public handle and the background task.
struct Shared {
    url: Url,
    phase_tx: watch::Sender<Phase>,
    subscriptions: SubscriptionRegistry,
}

impl Shared {
    fn session(&self) -> Option<Arc<dyn Session>> {
        self.phase_tx.borrow().session()
    }
}

struct ClientInner {
    config: Config,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    /// Cancels the background task and, through child tokens, the heartbeat
    token: CancellationToken,
    destroyed: AtomicBool,
    /// Registry this client was created by, if any
    instances: Weak<Instances>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Requests from the public API to the background task, which performs every interaction with
/// the session in the order the requests were made.
enum Command {
    /// Register the handler recorded for `topic` under `generation` with the transport.
    Register { topic: String, generation: u64 },
    /// Unregister `topic` from the current session if it was registered there.
    Unsubscribe { topic: String },
    Publish { topic: String, message: Envelope },
}

impl Client {
    /// Create a client for `url` that is not tracked by any registry.
    ///
    /// Must be called from within a tokio runtime; otherwise a
    /// [`Kind::Configuration`](crate::error::Kind::Configuration) error is returned.
    pub fn connect(url: Url, config: Config, transport: &dyn Transport) -> Result<Self> {
        Self::start(url, config, transport, Weak::new())
    }

    pub(crate) fn start(
        url: Url,
        config: Config,
        transport: &dyn Transport,
        instances: Weak<Instances>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_e| Error::configuration("a tokio runtime is required to start a client"))?;

        let events = transport.connect(&url)?;
        let (phase_tx, _) = watch::channel(Phase::Connecting);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let shared = Arc::new(Shared {
            url,
            phase_tx,
            subscriptions: SubscriptionRegistry::default(),
        });

        let driver = Driver {
            shared: Arc::clone(&shared),
            config: config.clone(),
            token: token.clone(),
            session: None,
            heartbeat: Heartbeat::default(),
            first_connect: true,
            registered: HashMap::new(),
            pending: Vec::new(),
            outbox: VecDeque::new(),
        };

        runtime.spawn(driver.run(events, command_rx));

        #[cfg(feature = "tracing")]
        debug!(url = %shared.url, "Connecting");

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                shared,
                commands,
                token,
                destroyed: AtomicBool::new(false),
                instances,
            }),
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.shared.url
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.shared.phase_tx.borrow().status()
    }

    /// Whether this client was destroyed or its transport gave up reconnecting.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.shared.phase_tx.borrow(), Phase::Closed)
    }

    /// Wait for the session of the current (or next) connection.
    ///
    /// Resolves right away when connected. Otherwise waits until the transport connects, bounded
    /// by [`Config::session_timeout`] when one is set.
    pub fn session(&self) -> impl Future<Output = Result<Arc<dyn Session>>> + Send + 'static {
        let mut phase_rx = self.inner.shared.phase_tx.subscribe();
        let timeout = self.inner.config.session_timeout();
        let url = self.inner.shared.url.to_string();

        async move {
            let wait = async {
                let session = phase_rx
                    .wait_for(|phase| matches!(phase, Phase::Connected(_) | Phase::Closed))
                    .await
                    .map(|phase| phase.session())
                    .map_err(|_e| Error::closed(&url))?;

                session.ok_or_else(|| Error::closed(&url))
            };

            match timeout {
                Some(after) => time::timeout(after, wait)
                    .await
                    .map_err(|_e| Error::timeout(after))?,
                None => wait.await,
            }
        }
    }

    /// Wait until the client reaches `status`.
    ///
    /// Fails with [`Kind::Closed`](crate::error::Kind::Closed) when the client closes before
    /// reaching a status other than [`ConnectionStatus::NotConnected`].
    pub async fn wait_for_status(&self, status: ConnectionStatus) -> Result<()> {
        let mut phase_rx = self.inner.shared.phase_tx.subscribe();
        let reached = phase_rx
            .wait_for(|phase| phase.status() == status || matches!(phase, Phase::Closed))
            .await
            .map(|phase| phase.status() == status)
            .map_err(|_e| Error::closed(self.inner.shared.url.as_str()))?;

        if reached {
            Ok(())
        } else {
            Err(Error::closed(self.inner.shared.url.as_str()))
        }
    }

    /// Subscribe `handler` to `topic`, replacing any handler already set for it.
    ///
    /// The topic is recorded immediately and registered with the transport as soon as a session
    /// is available, then again after every reconnection. `handler` receives `(topic, payload)`
    /// for each message.
    ///
    /// The returned future resolves to `true` once the *first message* arrives on the topic. It
    /// is not an acknowledgement of the subscription itself. It resolves to `false` when the
    /// subscription is replaced, unsubscribed or destroyed before any message was delivered.
    pub fn subscribe<T, F>(&self, topic: T, handler: F) -> impl Future<Output = bool> + Send + 'static
    where
        T: Into<String>,
        F: Fn(&str, &Envelope) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let (first_tx, first_rx) = oneshot::channel();

        if self.inner.destroyed.load(Ordering::Acquire) {
            #[cfg(feature = "tracing")]
            warn!(%topic, url = %self.inner.shared.url, "Ignoring subscribe on destroyed client");
        } else {
            let handler = notify_first(Arc::new(handler), first_tx);
            let generation = self.inner.shared.subscriptions.insert(&topic, handler);

            #[cfg(feature = "tracing")]
            debug!(%topic, generation, "Subscribing");

            if self
                .inner
                .commands
                .send(Command::Register { topic, generation })
                .is_err()
            {
                #[cfg(feature = "tracing")]
                warn!(url = %self.inner.shared.url, "Connection task has stopped, subscription will not be registered");
            }
        }

        async move { first_rx.await.unwrap_or(false) }
    }

    /// Stop tracking `topic` and, if it is registered with the current session, ask the
    /// transport to unsubscribe.
    ///
    /// The topic is removed locally right away. The transport call happens on the background task
    /// after any registration requested earlier; its errors are logged and never returned.
    pub fn unsubscribe(&self, topic: &str) {
        if self.inner.shared.subscriptions.remove(topic).is_none() {
            return;
        }

        #[cfg(feature = "tracing")]
        debug!(%topic, "Unsubscribing");

        if self
            .inner
            .commands
            .send(Command::Unsubscribe {
                topic: topic.to_owned(),
            })
            .is_err()
        {
            #[cfg(feature = "tracing")]
            debug!(%topic, "Connection task has stopped, nothing to unsubscribe");
        }
    }

    /// Publish `message` on `topic` once a session is available.
    ///
    /// Messages are sent in call order. There is no delivery confirmation.
    pub fn publish<T: Into<String>>(&self, topic: T, message: Envelope) {
        let topic = topic.into();

        if self.inner.destroyed.load(Ordering::Acquire)
            || self
                .inner
                .commands
                .send(Command::Publish { topic, message })
                .is_err()
        {
            #[cfg(feature = "tracing")]
            warn!(url = %self.inner.shared.url, "Dropping publish on closed client");
        }
    }

    #[must_use]
    pub fn has_subscription(&self, topic: &str) -> bool {
        self.inner.shared.subscriptions.contains(topic)
    }

    /// Topics currently tracked for replay.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.shared.subscriptions.info()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.shared.subscriptions.len()
    }

    /// Tear the client down: stop the heartbeat, forget every tracked topic, drop the session and
    /// remove the client from its registry.
    ///
    /// The background task then unsubscribes, best-effort, every topic it registered with the
    /// session, once any registration in progress has returned. Calling this more than once is a
    /// no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        debug!(url = %self.inner.shared.url, "Destroying client");

        self.inner.shared.phase_tx.send_replace(Phase::Closed);
        self.inner.shared.subscriptions.drain();
        self.inner.token.cancel();

        if let Some(instances) = self.inner.instances.upgrade() {
            instances.remove_if(self.inner.shared.url.as_str(), |_, client| {
                Arc::ptr_eq(&client.inner, &self.inner)
            });
        }
    }

    /// Whether both handles refer to the same client instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.shared.url.as_str())
            .field("status", &self.status())
            .field("subscriptions", &self.inner.shared.subscriptions)
            .finish_non_exhaustive()
    }
}

/// Wrap `handler` so that `first` is notified on the first delivered message.
fn notify_first(handler: Handler, first: oneshot::Sender<bool>) -> Handler {
    let first = Mutex::new(Some(first));

    Arc::new(move |topic, payload| {
        handler(topic, payload);

        if let Some(tx) = first.lock().unwrap_or_else(PoisonError::into_inner).take() {
            _ = tx.send(true);
        }
    })
}

fn unsubscribe_quietly(session: &dyn Session, topic: &str) {
    if let Err(e) = session.unsubscribe(topic) {
        #[cfg(feature = "tracing")]
        warn!(%topic, error = %e, "Unable to unsubscribe");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}

/// Background task owning every interaction with the session.
struct Driver {
    shared: Arc<Shared>,
    config: Config,
    token: CancellationToken,
    /// Session of the current connection, kept until shutdown so teardown can reach it
    session: Option<Arc<dyn Session>>,
    heartbeat: Heartbeat,
    first_connect: bool,
    /// Generation registered with the current session, per topic
    registered: HashMap<String, u64>,
    /// Registrations requested while no session was available
    pending: Vec<(String, u64)>,
    /// Publishes requested while no session was available
    outbox: VecDeque<(String, Envelope)>,
}

impl Driver {
    async fn run(mut self, mut events: EventStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => break,

                event = events.next() => match event {
                    Some(event) => self.on_event(&event),
                    None => {
                        #[cfg(feature = "tracing")]
                        debug!(url = %self.shared.url, "Transport stopped reconnecting, closing client");
                        self.shared.phase_tx.send_replace(Phase::Closed);
                        break;
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }

        self.heartbeat.stop();
        self.unsubscribe_all();
    }

    /// Best-effort unsubscribe of everything registered with the current session.
    fn unsubscribe_all(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        for (topic, _) in self.registered.drain() {
            unsubscribe_quietly(session.as_ref(), &topic);
        }
    }

    fn on_event(&mut self, event: &TransportEvent) {
        self.shared
            .phase_tx
            .send_modify(|phase| *phase = phase.apply(event));
        self.registered.clear();

        if matches!(*self.shared.phase_tx.borrow(), Phase::Closed) {
            return;
        }

        match event {
            TransportEvent::Connected(session) => {
                #[cfg(feature = "tracing")]
                debug!(url = %self.shared.url, first = self.first_connect, "Connected");

                self.session = Some(Arc::clone(session));

                if self.first_connect {
                    for (topic, generation) in std::mem::take(&mut self.pending) {
                        self.register(session.as_ref(), &topic, generation);
                    }
                } else {
                    // Replay covers every topic still tracked, pending ones included
                    self.pending.clear();
                    self.replay(session.as_ref());
                }
                self.first_connect = false;

                while let Some((topic, message)) = self.outbox.pop_front() {
                    publish_quietly(session.as_ref(), &topic, &message);
                }

                if !self.config.disable_ping() {
                    self.heartbeat.start(
                        &self.token,
                        Arc::clone(session),
                        self.config.ping_channel().to_owned(),
                        self.config.ping_interval(),
                    );
                }
            }
            TransportEvent::Disconnected { reason } => {
                #[cfg(feature = "tracing")]
                debug!(url = %self.shared.url, %reason, "Disconnected");
                #[cfg(not(feature = "tracing"))]
                let _ = reason;

                self.session = None;
                self.heartbeat.stop();
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        let session = self.shared.session();

        match (command, session) {
            (Command::Register { topic, generation }, Some(session)) => {
                self.register(session.as_ref(), &topic, generation);
            }
            (Command::Register { topic, generation }, None) => {
                self.pending.push((topic, generation));
            }
            (Command::Unsubscribe { topic }, Some(session)) => {
                if self.registered.remove(&topic).is_some() {
                    unsubscribe_quietly(session.as_ref(), &topic);
                }
            }
            (Command::Unsubscribe { topic }, None) => {
                self.pending.retain(|(pending, _)| *pending != topic);
            }
            (Command::Publish { topic, message }, Some(session)) => {
                publish_quietly(session.as_ref(), &topic, &message);
            }
            (Command::Publish { topic, message }, None) => {
                self.outbox.push_back((topic, message));
            }
        }
    }

    /// Register every tracked topic with a fresh session. Reads the subscription mapping only.
    fn replay(&mut self, session: &dyn Session) {
        let entries = self.shared.subscriptions.snapshot();

        #[cfg(feature = "tracing")]
        debug!(count = entries.len(), "Re-subscribing after reconnect");

        for (topic, entry) in entries {
            self.subscribe_with(session, topic, entry.generation, entry.handler);
        }
    }

    /// Register `topic` if `generation` is still current and not yet registered on this session.
    fn register(&mut self, session: &dyn Session, topic: &str, generation: u64) {
        if self.registered.get(topic) == Some(&generation) {
            return;
        }

        // Superseded or unsubscribed before a session was available
        let Some(handler) = self.shared.subscriptions.current(topic, generation) else {
            return;
        };

        self.subscribe_with(session, topic.to_owned(), generation, handler);
    }

    fn subscribe_with(&mut self, session: &dyn Session, topic: String, generation: u64, handler: Handler) {
        match session.subscribe(&topic, handler) {
            Ok(()) => {
                self.registered.insert(topic, generation);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                warn!(%topic, error = %e, "Unable to subscribe");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

fn publish_quietly(session: &dyn Session, topic: &str, message: &Envelope) {
    if let Err(e) = session.publish(topic, message) {
        #[cfg(feature = "tracing")]
        warn!(%topic, error = %e, "Unable to publish");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}
