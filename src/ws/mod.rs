//! WebSocket transport speaking the publish/subscribe subset of WAMP v1.
//!
//! # Architecture
//!
//! - [`WsTransport`]: [`Transport`](crate::transport::Transport) with reconnection and backoff
//! - [`WsSession`]: [`Session`](crate::transport::Session) bound to one WebSocket connection
//! - [`frame`]: WAMP v1 message codec
//!
//! # Example
//!
//! ```rust, no_run
//! use std::sync::Arc;
//!
//! use wamp_topic_client::{Config, Registry};
//! use wamp_topic_client::ws::WsTransport;
//!
//! # fn main() -> wamp_topic_client::Result<()> {
//! let registry = Registry::new(Arc::new(WsTransport::default()));
//! let config = Config::builder()
//!     .url("wss://push.example.com")
//!     .ping_channel("app/ping")
//!     .build();
//! let client = registry.get_or_create(config)?;
//! # drop(client);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod session;

pub use connection::WsTransport;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use session::WsSession;
