//! Scripted in-memory transports for client tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bayeux_client::{Client, ClientConfig, ConnectionType, Message};
use bayeux_transport::{
    RequestHandle, Transport, TransportContext, TransportError, TransportFactory, TransportId,
    TransportSink,
};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// What the scripted server does with a request.
pub enum Reply {
    /// Answer with these messages.
    Respond(Vec<Message>),
    /// Report the request as failed.
    Fail,
    /// Never answer; the request stays open until the connection drops.
    Hold,
}

pub type Responder = Arc<dyn Fn(ConnectionType, &Message) -> Reply + Send + Sync>;

struct Connection {
    connection_type: ConnectionType,
    sink: TransportSink,
    held: Arc<Mutex<Vec<Message>>>,
}

/// A fake Bayeux server shared by every mock transport of a test.
pub struct MockServer {
    log: Mutex<Vec<(ConnectionType, Message)>>,
    usable: Mutex<HashSet<ConnectionType>>,
    responder: Mutex<Responder>,
    connections: Mutex<Vec<Connection>>,
    closed: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            usable: Mutex::new(ConnectionType::ALL.into_iter().collect()),
            responder: Mutex::new(Arc::new(|_, message| default_reply(message))),
            connections: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(ConnectionType, &Message) -> Reply + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn set_usable(&self, connection_type: ConnectionType, usable: bool) {
        let mut set = self.usable.lock().unwrap();
        if usable {
            set.insert(connection_type);
        } else {
            set.remove(&connection_type);
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<(ConnectionType, Message)> {
        self.log.lock().unwrap().clone()
    }

    /// Requests received on a channel.
    pub fn on_channel(&self, channel: &str) -> Vec<(ConnectionType, Message)> {
        self.requests()
            .into_iter()
            .filter(|(_, m)| m.channel == channel)
            .collect()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.on_channel(channel).len()
    }

    /// How many transports the client has closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push messages to the client over the newest connection.
    pub fn push(&self, messages: Vec<Message>) {
        let connections = self.connections.lock().unwrap();
        if let Some(connection) = connections.last() {
            connection.sink.replies(messages);
        }
    }

    /// Drop the newest connection of a type, failing its open requests.
    pub fn drop_connection(&self, connection_type: ConnectionType) {
        let connections = self.connections.lock().unwrap();
        let Some(connection) = connections
            .iter()
            .rev()
            .find(|c| c.connection_type == connection_type)
        else {
            return;
        };

        let held: Vec<Message> = connection.held.lock().unwrap().drain(..).collect();
        connection.sink.closed(true);
        connection.sink.failed(held, true);
    }

    fn handle(&self, connection: &Connection, message: Message) {
        self.log
            .lock()
            .unwrap()
            .push((connection.connection_type, message.clone()));

        let responder = self.responder.lock().unwrap().clone();
        match responder(connection.connection_type, &message) {
            Reply::Respond(replies) => connection.sink.replies(replies),
            Reply::Fail => connection.sink.failed(vec![message], false),
            Reply::Hold => connection.held.lock().unwrap().push(message),
        }
    }
}

/// A successful response to `message`.
pub fn ack(message: &Message) -> Message {
    Message {
        channel: message.channel.clone(),
        id: message.id.clone(),
        client_id: message.client_id.clone(),
        subscription: message.subscription.clone(),
        successful: Some(true),
        ..Default::default()
    }
}

/// An unsuccessful response to `message`.
pub fn nack(message: &Message, error: &str) -> Message {
    Message {
        successful: Some(false),
        error: Some(error.to_string()),
        ..ack(message)
    }
}

/// Behaviour of a well-behaved server: handshakes assign `c1`, connects
/// are held open and everything else is acknowledged.
pub fn default_reply(message: &Message) -> Reply {
    match message.channel.as_str() {
        "/meta/handshake" => Reply::Respond(vec![handshake_reply(message, "c1")]),
        "/meta/connect" => Reply::Hold,
        _ => Reply::Respond(vec![ack(message)]),
    }
}

pub fn handshake_reply(message: &Message, client_id: &str) -> Message {
    Message {
        client_id: Some(client_id.to_string()),
        supported_connection_types: Some(vec!["websocket".into(), "long-polling".into()]),
        version: Some("1.0".into()),
        ..ack(message)
    }
}

/// A data message as the server would push it.
pub fn data(channel: &str, value: serde_json::Value) -> Message {
    Message::publish(channel, value)
}

struct MockTransport {
    id: TransportId,
    connection_type: ConnectionType,
    endpoint: Url,
    server: Arc<MockServer>,
    connection: Connection,
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, messages: Vec<Message>) -> RequestHandle {
        for message in messages {
            self.server.handle(&self.connection, message);
        }
        RequestHandle::Detached
    }

    fn encode(&self, messages: &[Message]) -> Result<String, TransportError> {
        Ok(bayeux_protocol::encode(messages)?)
    }

    async fn close(&self) {
        self.server.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    connection_type: ConnectionType,
    server: Arc<MockServer>,
}

#[async_trait]
impl TransportFactory for MockFactory {
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    async fn is_usable(&self, _endpoint: &Url, _ctx: &TransportContext) -> bool {
        self.server
            .usable
            .lock()
            .unwrap()
            .contains(&self.connection_type)
    }

    fn create(
        &self,
        endpoint: Url,
        _ctx: TransportContext,
        sink: TransportSink,
    ) -> Arc<dyn Transport> {
        let held = Arc::new(Mutex::new(Vec::new()));
        self.server.connections.lock().unwrap().push(Connection {
            connection_type: self.connection_type,
            sink: sink.clone(),
            held: held.clone(),
        });

        Arc::new(MockTransport {
            id: sink.id(),
            connection_type: self.connection_type,
            endpoint,
            server: self.server.clone(),
            connection: Connection {
                connection_type: self.connection_type,
                sink,
                held,
            },
        })
    }
}

pub fn factories(
    server: &Arc<MockServer>,
    types: &[ConnectionType],
) -> Vec<Arc<dyn TransportFactory>> {
    types
        .iter()
        .map(|&connection_type| {
            Arc::new(MockFactory {
                connection_type,
                server: server.clone(),
            }) as Arc<dyn TransportFactory>
        })
        .collect()
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::new("http://example.com/bayeux");
    config.retry_secs = 1;
    config
}

/// A client talking to `server` over mock transports of `types`.
pub fn client(server: &Arc<MockServer>, types: &[ConnectionType]) -> Client {
    Client::builder(config())
        .transports(factories(server, types))
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future`, panicking after five seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

pub fn payload() -> serde_json::Value {
    json!({"x": 1})
}
