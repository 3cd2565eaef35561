//! Client errors.

use bayeux_core::Abandoned;
use bayeux_protocol::BayeuxError;
use thiserror::Error;

/// Errors reported by client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The channel name is malformed or not allowed for the operation.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// The server rejected the request.
    #[error("Server error: {0}")]
    Protocol(BayeuxError),

    /// The message ran out of attempts or passed its deadline.
    #[error("Delivery aborted for message {0}")]
    DeliveryAborted(String),

    /// An extension dropped the message.
    #[error("Message on {0} dropped by an extension")]
    Vetoed(String),

    /// The client has disconnected.
    #[error("Client is disconnected")]
    Disconnected,

    /// The server advised against reconnecting.
    #[error("Server advised not to reconnect")]
    ReconnectForbidden,

    /// The client task is no longer running.
    #[error("Client has shut down")]
    Shutdown,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<Abandoned> for ClientError {
    fn from(_: Abandoned) -> Self {
        ClientError::Shutdown
    }
}

impl From<BayeuxError> for ClientError {
    fn from(error: BayeuxError) -> Self {
        ClientError::Protocol(error)
    }
}
