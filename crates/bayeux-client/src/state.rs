//! Connection state and server advice.

use bayeux_protocol::{Advice, ConnectionType, Reconnect};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No client ID; a handshake is needed.
    #[default]
    Unconnected,
    /// A handshake is in flight.
    Connecting,
    /// Handshake done; the client holds a client ID.
    Connected,
    /// The client disconnected and will not reconnect.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Something observers of a client may want to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// A reply arrived after the transport was down or unknown.
    TransportUp,
    /// A request failed while the transport was up or unknown.
    TransportDown,
    /// The connection state changed.
    StateChanged(ConnectionState),
}

/// Current values published by the client task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Status {
    pub state: ConnectionState,
    pub client_id: Option<String>,
    pub connection_type: Option<ConnectionType>,
}

/// Advice merged from every response seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AdviceState {
    pub reconnect: Reconnect,
    pub interval: Duration,
    pub timeout: Duration,
}

impl AdviceState {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            reconnect: Reconnect::Retry,
            interval,
            timeout,
        }
    }

    /// Overwrite the fields present in `advice`, keeping the others.
    pub fn merge(&mut self, advice: &Advice) {
        if let Some(reconnect) = advice.reconnect {
            self.reconnect = reconnect;
        }
        if let Some(interval) = advice.interval {
            self.interval = Duration::from_millis(interval);
        }
        if let Some(timeout) = advice.timeout {
            self.timeout = Duration::from_millis(timeout);
        }
    }

    pub fn forbids_reconnect(&self) -> bool {
        self.reconnect == Reconnect::None
    }
}
