//! The public client handle.

use bayeux_core::{
    deferred, Extension, ExtensionPipeline, MessageHandler, RetryScheduler, SchedulerFactory,
    SubscriptionEntry, SubscriptionId,
};
use bayeux_protocol::channel::{is_meta, is_pattern, is_subscribable, is_valid_name};
use bayeux_protocol::{ChannelList, ConnectionType};
use bayeux_transport::{default_factories, TransportFactory};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::actor::{Actor, Command, Inbox};
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, DispatcherSettings, PublishOptions};
use crate::error::ClientError;
use crate::state::{AdviceState, ClientEvent, ConnectionState, Status};
use crate::subscription::{Publication, Subscription};
use crate::timer::TimerSet;

/// Capacity of the client event channel.
const EVENT_CAPACITY: usize = 64;

/// Builder for a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    factories: Option<Vec<Arc<dyn TransportFactory>>>,
    scheduler: Option<SchedulerFactory>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl ClientBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factories: None,
            scheduler: None,
            extensions: Vec::new(),
        }
    }

    /// Replace the transport factories. Their order is irrelevant;
    /// negotiation always follows connection type priority.
    #[must_use]
    pub fn transports(mut self, factories: Vec<Arc<dyn TransportFactory>>) -> Self {
        self.factories = Some(factories);
        self
    }

    /// Use a different retry policy for outgoing messages.
    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerFactory) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Register an extension.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Start the client task.
    ///
    /// Must be called within a Tokio runtime. No network activity happens
    /// until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Client, ClientError> {
        let endpoint = self.config.endpoint_url()?;
        let ctx = self.config.transport_context()?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (dispatcher_tx, dispatcher_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(Status::default());

        let dispatcher = Dispatcher::new(
            DispatcherSettings {
                endpoint,
                ctx,
                factories: self.factories.unwrap_or_else(default_factories),
                disabled: self.config.disabled.clone(),
                retry: self.config.retry(),
                timeout,
                scheduler: self.scheduler.unwrap_or_else(RetryScheduler::factory),
                ping_configured: self.config.websocket_ping.is_some(),
            },
            transport_tx,
            dispatcher_tx,
            events.clone(),
        );

        let mut extensions = ExtensionPipeline::new();
        for extension in self.extensions {
            extensions.add(extension);
        }

        let actor = Actor::new(
            dispatcher,
            extensions,
            AdviceState::new(Duration::from_millis(self.config.interval_ms), timeout),
            TimerSet::new(timer_tx),
            status_tx,
            events.clone(),
        );
        tokio::spawn(actor.run(Inbox {
            commands: command_rx,
            transport: transport_rx,
            dispatcher: dispatcher_rx,
            timers: timer_rx,
        }));

        debug!(endpoint = %self.config.endpoint, "Client created");

        Ok(Client {
            commands: command_tx,
            status: status_rx,
            events,
            next_subscription: Arc::new(AtomicU64::new(1)),
        })
    }
}

/// Handle to a Bayeux client.
///
/// Clones share the same connection. The client keeps running while any
/// clone or [`Subscription`] is alive.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    events: broadcast::Sender<ClientEvent>,
    next_subscription: Arc<AtomicU64>,
}

impl Client {
    /// Create a client for an endpoint with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        ClientBuilder::new(ClientConfig::new(endpoint)).build()
    }

    /// Start building a client from a configuration.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Shutdown)
    }

    /// Perform the handshake if it has not happened yet.
    ///
    /// # Errors
    ///
    /// Fails if the client is disconnected or the server forbids
    /// reconnecting. Failed handshakes are otherwise retried.
    pub async fn handshake(&self) -> Result<(), ClientError> {
        let (resolver, status) = deferred();
        self.command(Command::Handshake(resolver))?;
        status.wait().await
    }

    /// Connect, handshaking first if needed.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`Client::handshake`].
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (resolver, status) = deferred();
        self.command(Command::Connect(resolver))?;
        status.wait().await
    }

    /// Subscribe to one or more channels.
    ///
    /// `handler` receives the channel and data of every matching message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] if a name is malformed or
    /// names a meta or service channel.
    pub fn subscribe<F>(
        &self,
        channels: impl Into<ChannelList>,
        handler: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.subscribe_with(channels, false, handler)
    }

    /// Subscribe, sending a subscribe request even for channels that
    /// already have a subscription when `force` is set.
    ///
    /// # Errors
    ///
    /// See [`Client::subscribe`].
    pub fn subscribe_with<F>(
        &self,
        channels: impl Into<ChannelList>,
        force: bool,
        handler: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut names: Vec<String> = Vec::new();
        for name in channels.into().to_vec() {
            if !is_subscribable(&name) {
                return Err(ClientError::InvalidChannel(name));
            }
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Err(ClientError::InvalidChannel(String::new()));
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let cancelled = Arc::new(AtomicBool::new(false));
        let handler: MessageHandler = Arc::new(handler);
        let entry = SubscriptionEntry::new(id, handler, cancelled.clone());
        let (resolver, status) = deferred();

        self.command(Command::Subscribe {
            channels: names.clone(),
            force,
            entry,
            resolver,
        })?;

        Ok(Subscription::new(
            id,
            names,
            cancelled,
            self.commands.clone(),
            status,
        ))
    }

    /// Remove a subscription from some of its channels.
    ///
    /// A channel left without subscriptions is unsubscribed on the server.
    pub fn unsubscribe(&self, channels: impl Into<ChannelList>, subscription: &Subscription) {
        let _ = self.command(Command::Unsubscribe {
            channels: channels.into().to_vec(),
            id: subscription.id(),
        });
    }

    /// Publish data on a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for patterns, meta channels
    /// and malformed names.
    pub fn publish(&self, channel: &str, data: Value) -> Result<Publication, ClientError> {
        self.publish_with(channel, data, PublishOptions::default())
    }

    /// Publish with delivery limits.
    ///
    /// # Errors
    ///
    /// See [`Client::publish`].
    pub fn publish_with(
        &self,
        channel: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<Publication, ClientError> {
        if !is_valid_name(channel) || is_pattern(channel) || is_meta(channel) {
            return Err(ClientError::InvalidChannel(channel.to_string()));
        }

        let (resolver, status) = deferred();
        self.command(Command::Publish {
            channel: channel.to_string(),
            data,
            options,
            resolver,
        })?;
        Ok(Publication::new(status))
    }

    /// Disconnect from the server and drop every subscription.
    pub fn disconnect(&self) -> Publication {
        let (resolver, status) = deferred();
        let _ = self.command(Command::Disconnect(resolver));
        Publication::new(status)
    }

    /// Add an extension after the ones already registered.
    pub fn add_extension(&self, extension: Arc<dyn Extension>) {
        let _ = self.command(Command::AddExtension(extension));
    }

    /// Remove a previously added extension.
    pub fn remove_extension(&self, extension: Arc<dyn Extension>) {
        let _ = self.command(Command::RemoveExtension(extension));
    }

    /// Exclude a connection type from future negotiations.
    pub fn disable(&self, connection_type: ConnectionType) {
        let _ = self.command(Command::Disable(connection_type.as_str().to_string()));
    }

    /// Send an extra header with every HTTP request and WebSocket upgrade.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let _ = self.command(Command::SetHeader(name.into(), value.into()));
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Get the client ID assigned by the last successful handshake.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.status.borrow().client_id.clone()
    }

    /// Get the connection type of the current transport.
    #[must_use]
    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.status.borrow().connection_type
    }

    /// Subscribe to client events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("Client")
            .field("state", &status.state)
            .field("client_id", &status.client_id)
            .finish_non_exhaustive()
    }
}
