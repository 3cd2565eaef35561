//! Protocol version and connection type identifiers.
//!
//! The handshake advertises the protocol version together with the set of
//! connection types the client can speak; the server answers with the
//! subset it supports.

use std::fmt;
use std::str::FromStr;

/// Bayeux protocol version sent in every handshake.
pub const BAYEUX_VERSION: &str = "1.0";

/// Connection types every client must advertise during the handshake.
pub const MANDATORY_CONNECTION_TYPES: [&str; 3] = ["long-polling", "callback-polling", "in-process"];

/// A transport mechanism known to the client.
///
/// The declaration order is the negotiation priority: earlier variants are
/// preferred over later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionType {
    /// Full-duplex WebSocket carrying JSON arrays per frame.
    WebSocket,
    /// Server-Sent Events stream for replies, HTTP POST for requests.
    EventSource,
    /// Long-polling against an endpoint on a different origin.
    CrossOriginLongPolling,
    /// Same-origin HTTP long-polling.
    LongPolling,
    /// JSONP-style GET requests with a generated callback name.
    CallbackPolling,
}

impl ConnectionType {
    /// All connection types in priority order.
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::WebSocket,
        ConnectionType::EventSource,
        ConnectionType::CrossOriginLongPolling,
        ConnectionType::LongPolling,
        ConnectionType::CallbackPolling,
    ];

    /// Get the wire name of this connection type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::WebSocket => "websocket",
            ConnectionType::EventSource => "eventsource",
            ConnectionType::CrossOriginLongPolling => "cross-origin-long-polling",
            ConnectionType::LongPolling => "long-polling",
            ConnectionType::CallbackPolling => "callback-polling",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionType::ALL
            .into_iter()
            .find(|ct| ct.as_str() == s)
            .ok_or_else(|| format!("Unknown connection type: {s}"))
    }
}
