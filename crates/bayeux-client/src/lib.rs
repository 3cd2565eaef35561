//! # bayeux-client
//!
//! A Bayeux publish/subscribe client.
//!
//! The client keeps one logical connection to a Bayeux server over the best
//! transport both sides support, and recovers from transport failures on
//! its own: requests are retried, transports are renegotiated and
//! subscriptions are restored after a new handshake.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bayeux_client::Client;
//! use serde_json::json;
//!
//! let client = Client::new("http://localhost:8000/bayeux")?;
//!
//! let subscription = client.subscribe("/chat/*", |channel, data| {
//!     println!("{channel}: {data}");
//! })?;
//! subscription.wait().await?;
//!
//! client.publish("/chat/lobby", json!({"text": "hello"}))?.wait().await?;
//! client.disconnect().wait().await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  Client ──commands──▶ client task ──▶ Dispatcher ──▶ Transport
//!                          ▲                              │
//!                          └──────── TransportSink ◀──────┘
//! ```
//!
//! All protocol state lives in one task; handles only send it commands.

mod actor;
mod client;
pub mod config;
mod dispatcher;
pub mod error;
pub mod metrics;
mod state;
mod subscription;
mod timer;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use dispatcher::PublishOptions;
pub use error::ClientError;
pub use state::{ClientEvent, ConnectionState};
pub use subscription::{Publication, Subscription};

pub use bayeux_core::{
    BackoffScheduler, DeferredStatus, Extension, RetryScheduler, SchedulerFactory,
};
pub use bayeux_protocol::{Advice, ConnectionType, Message, Reconnect};
