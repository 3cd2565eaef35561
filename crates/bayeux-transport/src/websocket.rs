//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! One socket carries every batch as a JSON text frame. Replies are matched
//! to outstanding messages by ID so that a dropped socket can hand the
//! unanswered ones back for an immediate retry.

use async_trait::async_trait;
use bayeux_protocol::{codec, ConnectionType, Message};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue, Request},
        Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};
use url::Url;

use crate::traits::{
    RequestHandle, Transport, TransportContext, TransportError, TransportFactory, TransportId,
    TransportSink,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Payload sent as a keep-alive.
const PING_PAYLOAD: &str = "[]";

const IDLE_PING_PERIOD: Duration = Duration::from_secs(3600);

/// Map an HTTP endpoint to its WebSocket equivalent.
#[must_use]
pub fn socket_url(endpoint: &Url) -> Option<Url> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return None,
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme).ok()?;
    Some(url)
}

fn build_request(url: &Url, ctx: &TransportContext) -> Result<Request<()>, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

    for (name, value) in &ctx.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Other(format!("Invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Other(format!("Invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

async fn open(url: &Url, ctx: &TransportContext) -> Result<Socket, TransportError> {
    let request = build_request(url, ctx)?;
    let (socket, _) = connect_async(request)
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    Ok(socket)
}

/// Factory for WebSocket transports.
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Create a factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::WebSocket
    }

    async fn is_usable(&self, endpoint: &Url, ctx: &TransportContext) -> bool {
        let Some(url) = socket_url(endpoint) else {
            return false;
        };

        match tokio::time::timeout(ctx.probe_timeout, open(&url, ctx)).await {
            Ok(Ok(mut socket)) => {
                let _ = socket.close(None).await;
                true
            }
            Ok(Err(e)) => {
                debug!(endpoint = %url, error = %e, "WebSocket probe failed");
                false
            }
            Err(_) => {
                debug!(endpoint = %url, "WebSocket probe timed out");
                false
            }
        }
    }

    fn create(
        &self,
        endpoint: Url,
        ctx: TransportContext,
        sink: TransportSink,
    ) -> Arc<dyn Transport> {
        let url = socket_url(&endpoint).unwrap_or(endpoint);
        let (tx, rx) = mpsc::unbounded_channel();

        let connection = Connection {
            url: url.clone(),
            ctx,
            sink: sink.clone(),
            commands: rx,
            pending: HashMap::new(),
        };
        tokio::spawn(connection.run());

        Arc::new(WebSocketTransport {
            endpoint: url,
            sink,
            commands: tx,
        })
    }
}

enum Command {
    Send(Vec<Message>),
    Abort(Vec<String>),
    Close,
}

/// A WebSocket transport.
///
/// The socket is owned by a background task; this handle only queues
/// commands for it.
#[derive(Debug)]
pub struct WebSocketTransport {
    endpoint: Url,
    sink: TransportSink,
    commands: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn id(&self) -> TransportId {
        self.sink.id()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::WebSocket
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, messages: Vec<Message>) -> RequestHandle {
        let ids: Vec<String> = messages.iter().filter_map(|m| m.id.clone()).collect();

        if let Err(mpsc::error::SendError(Command::Send(messages))) =
            self.commands.send(Command::Send(messages))
        {
            self.sink.failed(messages, false);
            return RequestHandle::Detached;
        }

        let commands = self.commands.clone();
        RequestHandle::Callback(Box::new(move || {
            let _ = commands.send(Command::Abort(ids));
        }))
    }

    fn encode(&self, messages: &[Message]) -> Result<String, TransportError> {
        Ok(codec::encode(messages)?)
    }

    async fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send(messages) => write!(f, "Send({})", messages.len()),
            Command::Abort(ids) => write!(f, "Abort({})", ids.len()),
            Command::Close => f.write_str("Close"),
        }
    }
}

/// How the connection loop ended.
enum Exit {
    Closed,
    Dropped,
}

struct Connection {
    url: Url,
    ctx: TransportContext,
    sink: TransportSink,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: HashMap<String, Message>,
}

impl Connection {
    async fn run(mut self) {
        let mut socket = match open(&self.url, &self.ctx).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(endpoint = %self.url, error = %e, "WebSocket connection failed");
                self.fail_queued();
                self.sink.closed(false);
                return;
            }
        };

        debug!(endpoint = %self.url, transport = %self.sink.id(), "WebSocket connected");

        match self.serve(&mut socket).await {
            Exit::Closed => {
                let _ = socket.close(None).await;
                debug!(endpoint = %self.url, "WebSocket closed");
            }
            Exit::Dropped => {
                debug!(
                    endpoint = %self.url,
                    pending = self.pending.len(),
                    "WebSocket dropped"
                );
                self.sink.closed(true);
                let pending: Vec<Message> = self.pending.drain().map(|(_, m)| m).collect();
                self.sink.failed(pending, true);
            }
        }
    }

    async fn serve(&mut self, socket: &mut Socket) -> Exit {
        // Without a ping interval the timer exists but its branch is disabled.
        let period = self
            .ctx
            .ping_interval
            .unwrap_or(IDLE_PING_PERIOD)
            .max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(messages)) => {
                        let text = match codec::encode(&messages) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode batch");
                                self.sink.failed(messages, false);
                                continue;
                            }
                        };
                        for message in messages {
                            if let Some(id) = message.id.clone() {
                                self.pending.insert(id, message);
                            }
                        }
                        if let Err(e) = socket.send(WsMessage::Text(text)).await {
                            debug!(error = %e, "WebSocket send failed");
                            return Exit::Dropped;
                        }
                    }
                    Some(Command::Abort(ids)) => {
                        for id in ids {
                            self.pending.remove(&id);
                        }
                    }
                    Some(Command::Close) | None => return Exit::Closed,
                },

                frame = socket.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.receive(&text),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.receive(text),
                        Err(_) => warn!("Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => return Exit::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        return Exit::Dropped;
                    }
                },

                _ = ping.tick(), if self.ctx.ping_interval.is_some() => {
                    trace!(endpoint = %self.url, "Sending keep-alive");
                    if socket.send(WsMessage::Text(PING_PAYLOAD.to_string())).await.is_err() {
                        return Exit::Dropped;
                    }
                }
            }
        }
    }

    fn receive(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(replies) => {
                for reply in &replies {
                    if let Some(id) = &reply.id {
                        self.pending.remove(id);
                    }
                }
                self.sink.replies(replies);
            }
            Err(e) => warn!(error = %e, "Failed to decode WebSocket frame"),
        }
    }

    fn fail_queued(&mut self) {
        let mut messages = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Send(batch) = command {
                messages.extend(batch);
            }
        }
        self.sink.failed(messages, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url() {
        let url = socket_url(&Url::parse("http://example.com/bayeux").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://example.com/bayeux");

        let url = socket_url(&Url::parse("https://example.com:8443/b?x=1").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://example.com:8443/b?x=1");

        assert!(socket_url(&Url::parse("ftp://example.com").unwrap()).is_none());
    }

    #[test]
    fn test_request_carries_headers() {
        let mut ctx = TransportContext::default();
        ctx.headers
            .insert("Authorization".to_string(), "Bearer abc".to_string());

        let url = Url::parse("ws://example.com/bayeux").unwrap();
        let request = build_request(&url, &ctx).unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }

    #[tokio::test]
    async fn test_probe_fails_for_non_http_endpoint() {
        let factory = WebSocketFactory::new();
        let endpoint = Url::parse("ftp://example.com").unwrap();
        assert!(!factory.is_usable(&endpoint, &TransportContext::default()).await);
    }
}
