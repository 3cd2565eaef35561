//! # bayeux-transport
//!
//! Transport layer for the Bayeux client.
//!
//! This crate provides interchangeable wire mechanisms behind one interface:
//!
//! - **WebSocket** - JSON arrays over a single full-duplex socket
//! - **EventSource** - Server-Sent Events for replies, HTTP POST for requests
//! - **Cross-origin long-polling** - HTTP POST to an endpoint on another origin
//! - **Long-polling** - Same-origin HTTP POST
//! - **Callback-polling** - JSONP-style HTTP GET
//!
//! ## Transport Abstraction
//!
//! A [`TransportFactory`] probes whether its mechanism is usable for an
//! endpoint and creates [`Transport`] instances. Transports never return
//! replies directly: everything they learn is reported through the
//! [`TransportSink`] they were created with, so a single consumer can
//! process all events in order.
//!
//! ```rust,ignore
//! use bayeux_transport::{negotiate, default_factories, TransportContext};
//!
//! let factories = default_factories();
//! let selected = negotiate(&factories, &endpoint, &allowed, &[], &ctx).await?;
//! let transport = selected.factory.create(selected.endpoint, ctx, sink);
//! let handle = transport.request(vec![message]);
//! ```

pub mod negotiation;
pub mod traits;

#[cfg(feature = "http")]
pub mod callback_polling;
#[cfg(feature = "http")]
pub mod event_source;
#[cfg(feature = "http")]
pub mod long_polling;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use negotiation::{default_factories, negotiate, Selected};
pub use traits::{
    RequestHandle, Transport, TransportContext, TransportError, TransportEvent, TransportFactory,
    TransportId, TransportSink,
};

#[cfg(feature = "http")]
pub use callback_polling::CallbackPollingFactory;
#[cfg(feature = "http")]
pub use event_source::EventSourceFactory;
#[cfg(feature = "http")]
pub use long_polling::LongPollingFactory;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketFactory;
