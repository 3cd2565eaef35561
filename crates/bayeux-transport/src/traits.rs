//! Transport abstraction traits for the Bayeux client.
//!
//! These traits define the interface that every wire mechanism provides,
//! allowing the dispatcher to stay transport-agnostic.

use async_trait::async_trait;
use bayeux_protocol::{CodecError, ConnectionType, Message};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use url::Url;

/// Default time allowed for a usability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier of one transport instance.
///
/// Events from a transport that is no longer active can be told apart by
/// their ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport_{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection or probe timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// An HTTP request failed.
    #[error("Request failed: {0}")]
    Request(String),

    /// A WebSocket operation failed.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The endpoint cannot be served by this transport.
    #[error("Unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),

    /// No candidate transport was usable.
    #[error("Could not find a usable connection type for {0}")]
    NoUsableTransport(String),

    /// Encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something a transport learned about its requests.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Messages received from the server.
    Replies(Vec<Message>),
    /// These messages could not be delivered.
    ///
    /// `immediate` asks for a retry without waiting for the retry interval,
    /// used when a working connection dropped underneath the request.
    Failed {
        /// Messages of the failed request.
        messages: Vec<Message>,
        /// Retry without delay.
        immediate: bool,
    },
    /// The transport can no longer carry requests.
    Closed {
        /// Whether the transport had been connected before closing.
        was_connected: bool,
    },
}

/// Channel through which a transport reports events.
#[derive(Debug, Clone)]
pub struct TransportSink {
    id: TransportId,
    tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
}

impl TransportSink {
    /// Create a sink tagging every event with `id`.
    #[must_use]
    pub fn new(id: TransportId, tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>) -> Self {
        Self { id, tx }
    }

    /// Get the ID of the transport owning this sink.
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Report received messages.
    pub fn replies(&self, messages: Vec<Message>) {
        if !messages.is_empty() {
            self.emit(TransportEvent::Replies(messages));
        }
    }

    /// Report messages that could not be delivered.
    pub fn failed(&self, messages: Vec<Message>, immediate: bool) {
        if !messages.is_empty() {
            self.emit(TransportEvent::Failed {
                messages,
                immediate,
            });
        }
    }

    /// Report that the transport closed.
    pub fn closed(&self, was_connected: bool) {
        self.emit(TransportEvent::Closed { was_connected });
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver only goes away when the client shuts down.
        let _ = self.tx.send((self.id, event));
    }
}

/// Handle to an in-flight request.
pub enum RequestHandle {
    /// The request runs in its own task.
    Task(AbortHandle),
    /// Aborting runs a transport-specific action.
    Callback(Box<dyn FnOnce() + Send>),
    /// Nothing to abort.
    Detached,
}

impl RequestHandle {
    /// Abort the request. Its reply, if any arrives later, is ignored by the
    /// transport.
    pub fn abort(self) {
        match self {
            RequestHandle::Task(handle) => handle.abort(),
            RequestHandle::Callback(cancel) => cancel(),
            RequestHandle::Detached => {}
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestHandle::Task(_) => f.write_str("RequestHandle::Task"),
            RequestHandle::Callback(_) => f.write_str("RequestHandle::Callback"),
            RequestHandle::Detached => f.write_str("RequestHandle::Detached"),
        }
    }
}

/// Settings shared by every transport of a client.
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Extra headers sent with HTTP requests and WebSocket upgrades.
    pub headers: BTreeMap<String, String>,
    /// Origin the client considers its own, for cross-origin classification.
    pub origin: Option<Url>,
    /// Client ID, once the handshake has assigned one.
    pub client_id: Option<String>,
    /// Alternate endpoints per connection type.
    pub endpoints: HashMap<ConnectionType, Url>,
    /// Upper bound for a single HTTP request, in bytes.
    pub max_request_size: usize,
    /// Keep-alive interval for persistent connections.
    pub ping_interval: Option<Duration>,
    /// Time allowed for a usability probe.
    pub probe_timeout: Duration,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            origin: None,
            client_id: None,
            endpoints: HashMap::new(),
            max_request_size: bayeux_protocol::codec::DEFAULT_MAX_REQUEST_SIZE,
            ping_interval: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl TransportContext {
    /// Get the endpoint to use for a connection type.
    #[must_use]
    pub fn endpoint_for(&self, connection_type: ConnectionType, default: &Url) -> Url {
        self.endpoints
            .get(&connection_type)
            .unwrap_or(default)
            .clone()
    }

    /// Check whether `endpoint` lies on a different origin than the client.
    ///
    /// Without a configured origin every endpoint counts as same-origin.
    #[must_use]
    pub fn is_cross_origin(&self, endpoint: &Url) -> bool {
        self.origin
            .as_ref()
            .is_some_and(|origin| origin.origin() != endpoint.origin())
    }
}

/// An active transport carrying message batches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport's unique identifier.
    fn id(&self) -> TransportId;

    /// Get the connection type this transport implements.
    fn connection_type(&self) -> ConnectionType;

    /// Get the endpoint this transport talks to.
    fn endpoint(&self) -> &Url;

    /// Send a batch of messages.
    ///
    /// Returns immediately; replies and failures are reported through the
    /// transport's sink.
    fn request(&self, messages: Vec<Message>) -> RequestHandle;

    /// Encode a batch into this transport's wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be serialized.
    fn encode(&self, messages: &[Message]) -> Result<String, TransportError>;

    /// Release the transport's connections.
    async fn close(&self);
}

/// Creates transports of one connection type.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Get the connection type this factory creates.
    fn connection_type(&self) -> ConnectionType;

    /// Check whether the transport can be used for `endpoint`.
    ///
    /// May perform a network round-trip, such as opening and closing a
    /// socket.
    async fn is_usable(&self, endpoint: &Url, ctx: &TransportContext) -> bool;

    /// Create a transport reporting through `sink`.
    fn create(&self, endpoint: Url, ctx: TransportContext, sink: TransportSink)
        -> Arc<dyn Transport>;
}

/// Check that an endpoint speaks HTTP(S).
pub(crate) fn is_http(endpoint: &Url) -> bool {
    matches!(endpoint.scheme(), "http" | "https")
}
