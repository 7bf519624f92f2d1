#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod config;
pub mod error;
pub(crate) mod heartbeat;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod transport;
pub mod types;
#[cfg(feature = "ws")]
pub mod ws;

pub use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use client::Client;
pub use config::Config;
pub use registry::Registry;
pub use state::ConnectionStatus;
pub use subscription::SubscriptionInfo;
pub use transport::{Handler, Session, Transport, TransportEvent};
pub use types::Envelope;
