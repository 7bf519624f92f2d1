use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::Entry;

use crate::Result;
use crate::client::{Client, Instances};
use crate::config::Config;
use crate::transport::Transport;

/// Hands out one [`Client`] per endpoint URL.
///
/// The registry is owned by the application and passed to whatever needs a client; there is no
/// hidden global. Cloning it is cheap and every clone shares the same instances.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    /// Used when a [`Config`] carries no URL of its own
    default_url: RwLock<Option<String>>,
    instances: Arc<Instances>,
}

impl Registry {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                default_url: RwLock::new(None),
                instances: Arc::new(Instances::new()),
            }),
        }
    }

    /// Set the URL used for configurations without one.
    #[must_use]
    pub fn with_default_url<S: Into<String>>(self, url: S) -> Self {
        self.set_default_url(Some(url.into()));
        self
    }

    pub fn set_default_url(&self, url: Option<String>) {
        // Option<String> has no inconsistent intermediate state, so a poisoned lock is usable.
        *self
            .inner
            .default_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = url;
    }

    #[must_use]
    pub fn default_url(&self) -> Option<String> {
        self.inner
            .default_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the client for the URL `config` resolves to, creating and connecting one if none
    /// exists yet.
    ///
    /// Fails with [`Kind::Configuration`](crate::error::Kind::Configuration) before any network
    /// activity when no URL can be resolved, the configuration is unusable or there is no tokio
    /// runtime to run the client on. A client whose transport gave up reconnecting is replaced by a
    /// fresh one.
    pub fn get_or_create(&self, config: Config) -> Result<Client> {
        let url = config.resolve_url(self.default_url().as_deref())?;
        config.validate()?;

        let instances = Arc::downgrade(&self.inner.instances);
        match self.inner.instances.entry(url.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Ok(entry.get().clone());
                }

                #[cfg(feature = "tracing")]
                tracing::debug!(%url, "Replacing closed client");

                let client = Client::start(url, config, self.inner.transport.as_ref(), instances)?;
                entry.insert(client.clone());
                Ok(client)
            }
            Entry::Vacant(entry) => {
                let client = Client::start(url, config, self.inner.transport.as_ref(), instances)?;
                entry.insert(client.clone());
                Ok(client)
            }
        }
    }

    /// Return the client for the URL `config` resolves to, if one exists.
    pub fn get(&self, config: &Config) -> Result<Option<Client>> {
        let url = config.resolve_url(self.default_url().as_deref())?;

        Ok(self
            .inner
            .instances
            .get(url.as_str())
            .map(|entry| entry.value().clone()))
    }

    /// Destroy the client for the URL `config` resolves to. Does nothing if there is none.
    pub fn destroy(&self, config: &Config) -> Result<()> {
        let url = config.resolve_url(self.default_url().as_deref())?;

        // The entry guard is released before destroying: the client removes itself otherwise.
        let removed = self.inner.instances.remove(url.as_str());
        if let Some((_, client)) = removed {
            client.destroy();
        }

        Ok(())
    }

    pub fn destroy_all(&self) {
        let clients: Vec<Client> = self
            .inner
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.instances.clear();

        for client in clients {
            client.destroy();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.instances.is_empty()
    }
}

#[cfg(feature = "ws")]
impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(crate::ws::WsTransport::default()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self
            .inner
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        f.debug_struct("Registry")
            .field("default_url", &self.default_url())
            .field("instances", &urls)
            .finish_non_exhaustive()
    }
}
