use std::time::Duration;

use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Default period between two keep-alive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Configuration for a [`Client`](crate::Client).
///
/// ```
/// use wamp_topic_client::Config;
///
/// let config = Config::builder()
///     .url("ws://localhost:8080")
///     .ping_channel("app/ping")
///     .build();
/// ```
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Endpoint to connect to. When absent the [`Registry`](crate::Registry) default URL is used.
    #[builder(into)]
    url: Option<String>,
    /// Turn off the keep-alive ping. Pings are sent unless this is set.
    #[builder(default)]
    disable_ping: bool,
    /// Topic the keep-alive ping is published on.
    #[builder(into)]
    ping_channel: String,
    #[builder(default = DEFAULT_PING_INTERVAL)]
    /// How often the keep-alive ping is published. The default is fifteen (15) seconds.
    ping_interval: Duration,
    /// Upper bound for waiting on a session. `None` waits for as long as it takes.
    session_timeout: Option<Duration>,
}

impl Config {
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    #[must_use]
    pub const fn disable_ping(&self) -> bool {
        self.disable_ping
    }

    #[must_use]
    pub fn ping_channel(&self) -> &str {
        &self.ping_channel
    }

    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    #[must_use]
    pub const fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout
    }

    /// Pick the endpoint for this configuration: its own URL first, then `default_url`.
    pub fn resolve_url(&self, default_url: Option<&str>) -> Result<Url> {
        let raw = self.url().or(default_url).ok_or_else(|| {
            Error::configuration(
                "url is not set; pass a url in the config or set a default url on the registry",
            )
        })?;

        Ok(Url::parse(raw)?)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.ping_channel.is_empty() {
            return Err(Error::configuration("ping channel cannot be empty"));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::configuration("ping interval must be greater than zero"));
        }

        Ok(())
    }
}
