//! The client task.
//!
//! A single task owns every piece of protocol state: the connection state,
//! the channel registry, pending operations and the dispatcher. Handles talk
//! to it through a command channel; transports and timers report through
//! their own channels. Each event is processed to completion before the
//! next one is read.

use bayeux_core::{
    ChannelSet, Extension, ExtensionPipeline, Resolver, SubscriptionEntry, SubscriptionId,
};
use bayeux_protocol::{
    Advice, BayeuxError, Message, Reconnect, MANDATORY_CONNECTION_TYPES,
};
use bayeux_transport::{TransportEvent, TransportId};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{Dispatcher, DispatcherEvent, PublishOptions};
use crate::error::ClientError;
use crate::metrics;
use crate::state::{AdviceState, ClientEvent, ConnectionState, Status};
use crate::timer::{Timer, TimerSet};

/// Connection type named in connect requests before any transport was
/// attached.
const FALLBACK_CONNECTION_TYPE: &str = "long-polling";

/// Requests sent by client handles.
pub(crate) enum Command {
    /// Resolve once the client holds a client ID.
    Handshake(Resolver<ClientError>),
    /// Resolve once the client is connected, starting the connect cycle.
    Connect(Resolver<ClientError>),
    Subscribe {
        channels: Vec<String>,
        force: bool,
        entry: SubscriptionEntry,
        resolver: Resolver<ClientError>,
    },
    Unsubscribe {
        channels: Vec<String>,
        id: SubscriptionId,
    },
    Publish {
        channel: String,
        data: Value,
        options: PublishOptions,
        resolver: Resolver<ClientError>,
    },
    Disconnect(Resolver<ClientError>),
    AddExtension(Arc<dyn Extension>),
    RemoveExtension(Arc<dyn Extension>),
    Disable(String),
    SetHeader(String, String),
}

/// Timers owned by the client task.
#[derive(Debug)]
pub(crate) enum ClientTimer {
    Handshake { token: u64 },
    Connect { token: u64 },
    /// Stop waiting for the server to acknowledge a disconnect.
    Disconnect { token: u64 },
}

/// Work waiting for the client to be connected.
enum PendingAction {
    Notify(Resolver<ClientError>),
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Publish {
        channel: String,
        data: Value,
        options: PublishOptions,
        resolver: Resolver<ClientError>,
    },
}

/// What to do with the response to a sent message.
enum ResponseAction {
    Handshake,
    /// Connect requests belong to the session that sent them.
    Connect { epoch: u64 },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish { resolver: Resolver<ClientError> },
    Disconnect { resolver: Resolver<ClientError> },
}

/// One subscribe call waiting for its channels to be acknowledged.
struct SubscribeGroup {
    id: SubscriptionId,
    remaining: usize,
    resolver: Resolver<ClientError>,
}

pub(crate) struct Actor {
    state: ConnectionState,
    client_id: Option<String>,
    advice: AdviceState,
    message_id: u32,

    dispatcher: Dispatcher,
    extensions: ExtensionPipeline,
    channels: ChannelSet,

    pending: VecDeque<PendingAction>,
    responses: HashMap<String, ResponseAction>,
    groups: HashMap<u64, SubscribeGroup>,
    next_group: u64,
    /// Channels with a subscribe request on its way, and the groups
    /// waiting for it. Resubscriptions have no waiters.
    in_flight: HashMap<String, Vec<u64>>,

    /// Bumped whenever the session a client ID belongs to ends.
    epoch: u64,
    connect_request: bool,
    handshake_timer: Option<Timer>,
    connect_timer: Option<Timer>,
    /// The disconnect request still awaiting its reply.
    disconnect_timer: Option<(String, Timer)>,
    timers: TimerSet<ClientTimer>,

    status: watch::Sender<Status>,
    events: broadcast::Sender<ClientEvent>,
}

/// Receiving ends of the channels feeding the client task.
pub(crate) struct Inbox {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub transport: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    pub dispatcher: mpsc::UnboundedReceiver<DispatcherEvent>,
    pub timers: mpsc::UnboundedReceiver<ClientTimer>,
}

impl Actor {
    pub fn new(
        dispatcher: Dispatcher,
        extensions: ExtensionPipeline,
        advice: AdviceState,
        timers: TimerSet<ClientTimer>,
        status: watch::Sender<Status>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            state: ConnectionState::Unconnected,
            client_id: None,
            advice,
            message_id: 0,
            dispatcher,
            extensions,
            channels: ChannelSet::new(),
            pending: VecDeque::new(),
            responses: HashMap::new(),
            groups: HashMap::new(),
            next_group: 0,
            in_flight: HashMap::new(),
            epoch: 0,
            connect_request: false,
            handshake_timer: None,
            connect_timer: None,
            disconnect_timer: None,
            timers,
            status,
            events,
        }
    }

    /// Run until every client handle is dropped.
    pub async fn run(mut self, mut inbox: Inbox) {
        debug!(endpoint = %self.dispatcher.endpoint(), "Client task started");

        loop {
            tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some((id, event)) = inbox.transport.recv() => {
                    self.handle_transport_event(id, event).await;
                }
                Some(event) = inbox.dispatcher.recv() => {
                    self.dispatcher.handle_event(event);
                }
                Some(timer) = inbox.timers.recv() => {
                    self.handle_timer(timer).await;
                }
            }
            self.settle();
        }

        self.teardown();
        self.settle();
        debug!("Client task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Handshake(resolver) => {
                if self.state == ConnectionState::Connected {
                    resolver.succeed();
                } else {
                    self.enqueue(PendingAction::Notify(resolver)).await;
                }
            }
            Command::Connect(resolver) => {
                self.enqueue(PendingAction::Notify(resolver)).await;
            }
            Command::Subscribe {
                channels,
                force,
                entry,
                resolver,
            } => self.subscribe(channels, force, entry, resolver).await,
            Command::Unsubscribe { channels, id } => {
                for channel in channels {
                    if self.channels.unsubscribe(&channel, id) {
                        self.enqueue(PendingAction::Unsubscribe { channel }).await;
                    }
                }
            }
            Command::Publish {
                channel,
                data,
                options,
                resolver,
            } => {
                self.enqueue(PendingAction::Publish {
                    channel,
                    data,
                    options,
                    resolver,
                })
                .await;
            }
            Command::Disconnect(resolver) => self.disconnect(resolver).await,
            Command::AddExtension(extension) => self.extensions.add(extension),
            Command::RemoveExtension(extension) => {
                self.extensions.remove(&extension);
            }
            Command::Disable(connection_type) => self.dispatcher.disable(&connection_type),
            Command::SetHeader(name, value) => self.dispatcher.set_header(name, value),
        }
    }

    async fn handle_transport_event(&mut self, id: TransportId, event: TransportEvent) {
        match event {
            TransportEvent::Replies(messages) => {
                for message in messages {
                    self.receive(message).await;
                }
            }
            TransportEvent::Failed {
                messages,
                immediate,
            } => self.dispatcher.handle_failure(id, messages, immediate),
            TransportEvent::Closed { was_connected } => {
                self.dispatcher.handle_closed(id, was_connected);
            }
        }
    }

    async fn handle_timer(&mut self, timer: ClientTimer) {
        match timer {
            ClientTimer::Handshake { token } => {
                if self.handshake_timer.as_ref().map(Timer::token) == Some(token) {
                    self.handshake_timer = None;
                    self.handshake().await;
                }
            }
            ClientTimer::Connect { token } => {
                if self.connect_timer.as_ref().map(Timer::token) == Some(token) {
                    self.connect_timer = None;
                    self.connect().await;
                }
            }
            ClientTimer::Disconnect { token } => {
                if self.disconnect_timer.as_ref().map(|(_, timer)| timer.token()) != Some(token) {
                    return;
                }
                let Some((id, _)) = self.disconnect_timer.take() else {
                    return;
                };
                if let Some(ResponseAction::Disconnect { resolver }) = self.responses.remove(&id) {
                    debug!(id = %id, "Disconnect not acknowledged");
                    resolver.succeed();
                }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        let _ = self.events.send(ClientEvent::StateChanged(state));
    }

    fn next_message_id(&mut self) -> String {
        self.message_id = self.message_id.wrapping_add(1);
        to_base36(self.message_id)
    }

    // Connection lifecycle

    async fn handshake(&mut self) {
        if self.advice.forbids_reconnect() || self.state != ConnectionState::Unconnected {
            return;
        }

        self.set_state(ConnectionState::Connecting);
        self.dispatcher.set_client_id(None);
        self.dispatcher.select_transport(
            MANDATORY_CONNECTION_TYPES
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
        );

        let message = Message::handshake(self.dispatcher.connection_types());
        debug!(endpoint = %self.dispatcher.endpoint(), "Initiating handshake");
        self.send(message, ResponseAction::Handshake, PublishOptions::default())
            .await;
    }

    async fn handshake_succeeded(&mut self, message: Message) {
        let Some(client_id) = message.client_id.clone() else {
            self.handshake_failed(ClientError::Protocol(BayeuxError::new(
                None,
                Vec::new(),
                "Handshake response without client ID",
            )));
            return;
        };

        metrics::record_handshake(true);
        info!(client_id = %client_id, "Handshake successful");

        self.client_id = Some(client_id.clone());
        self.dispatcher.set_client_id(Some(client_id));
        self.set_state(ConnectionState::Connected);

        if let Some(types) = message.supported_connection_types {
            self.dispatcher.select_transport(types);
        }

        self.resubscribe();
        self.connect().await;
    }

    fn handshake_failed(&mut self, error: ClientError) {
        metrics::record_handshake(false);
        if self.state == ConnectionState::Disconnected {
            return;
        }

        warn!(error = %error, "Handshake unsuccessful");
        self.set_state(ConnectionState::Unconnected);

        if self.advice.forbids_reconnect() {
            self.fail_pending(&ClientError::ReconnectForbidden);
            return;
        }

        let retry = self.dispatcher.retry();
        self.handshake_timer = Some(
            self.timers
                .start(retry, |token| ClientTimer::Handshake { token }),
        );
    }

    /// Register every known channel with the server again.
    fn resubscribe(&mut self) {
        let mut channels = self.channels.keys();
        channels.sort();
        for channel in channels {
            if self.in_flight.contains_key(&channel) {
                continue;
            }
            debug!(channel = %channel, "Resubscribing");
            self.in_flight.insert(channel.clone(), Vec::new());
            self.pending.push_back(PendingAction::Subscribe { channel });
        }
    }

    async fn connect(&mut self) {
        if self.advice.forbids_reconnect() {
            return;
        }

        match self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => return,
            ConnectionState::Unconnected => {
                self.handshake().await;
                return;
            }
            ConnectionState::Connected => {}
        }

        self.flush_pending().await;

        if self.connect_request {
            return;
        }
        let Some(client_id) = self.client_id.clone() else {
            return;
        };

        self.connect_request = true;
        let connection_type = self
            .dispatcher
            .connection_type()
            .map_or(FALLBACK_CONNECTION_TYPE, |ct| ct.as_str());

        trace!(client_id = %client_id, connection_type = %connection_type, "Sending connect");
        let message = Message::connect(client_id, connection_type);
        let action = ResponseAction::Connect { epoch: self.epoch };
        self.send(message, action, PublishOptions::default()).await;
    }

    /// Schedule the next connect request.
    fn cycle_connection(&mut self, delay: Duration) {
        self.connect_request = false;
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.connect_timer = Some(
            self.timers
                .start(delay, |token| ClientTimer::Connect { token }),
        );
    }

    async fn disconnect(&mut self, resolver: Resolver<ClientError>) {
        match self.state {
            ConnectionState::Disconnected => {
                resolver.succeed();
            }
            ConnectionState::Connected => {
                info!("Disconnecting");
                self.set_state(ConnectionState::Disconnected);
                self.drop_subscriptions(&ClientError::Disconnected);

                let Some(client_id) = self.client_id.clone() else {
                    self.teardown();
                    resolver.succeed();
                    return;
                };

                let options = PublishOptions {
                    attempts: Some(1),
                    deadline: None,
                };
                let timeout = self.request_timeout();
                let sent = self
                    .send(
                        Message::disconnect(client_id),
                        ResponseAction::Disconnect { resolver },
                        options,
                    )
                    .await;

                // The session ends now; only the reply is still awaited.
                let on_wire = sent
                    .as_deref()
                    .is_some_and(|id| self.dispatcher.release(id));
                self.teardown();

                match sent {
                    Some(id) if on_wire => {
                        let timer = self
                            .timers
                            .start(timeout, |token| ClientTimer::Disconnect { token });
                        self.disconnect_timer = Some((id, timer));
                    }
                    Some(id) => {
                        debug!("No transport to carry the disconnect");
                        if let Some(ResponseAction::Disconnect { resolver }) =
                            self.responses.remove(&id)
                        {
                            resolver.succeed();
                        }
                    }
                    None => {}
                }
            }
            ConnectionState::Unconnected | ConnectionState::Connecting => {
                info!("Disconnecting before handshake completed");
                self.set_state(ConnectionState::Disconnected);
                self.drop_subscriptions(&ClientError::Disconnected);
                self.teardown();
                resolver.succeed();
            }
        }
    }

    /// Drop the transport, timers and client ID.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.handshake_timer = None;
        self.connect_timer = None;
        self.connect_request = false;
        self.dispatcher.close();
        self.client_id = None;
        self.dispatcher.set_client_id(None);
    }

    // Pending operations

    async fn enqueue(&mut self, action: PendingAction) {
        if self.state == ConnectionState::Disconnected {
            self.fail_pending_action(action, &ClientError::Disconnected);
            return;
        }
        if self.advice.forbids_reconnect() {
            self.fail_pending_action(action, &ClientError::ReconnectForbidden);
            return;
        }

        self.pending.push_back(action);
        self.connect().await;
    }

    async fn flush_pending(&mut self) {
        while let Some(action) = self.pending.pop_front() {
            let Some(client_id) = self.client_id.clone() else {
                self.pending.push_front(action);
                return;
            };

            match action {
                PendingAction::Notify(resolver) => {
                    resolver.succeed();
                }
                PendingAction::Subscribe { channel } => {
                    let message = Message::subscribe(client_id, channel.clone());
                    self.send(
                        message,
                        ResponseAction::Subscribe { channel },
                        PublishOptions::default(),
                    )
                    .await;
                }
                PendingAction::Unsubscribe { channel } => {
                    let message = Message::unsubscribe(client_id, channel.clone());
                    self.send(
                        message,
                        ResponseAction::Unsubscribe { channel },
                        PublishOptions::default(),
                    )
                    .await;
                }
                PendingAction::Publish {
                    channel,
                    data,
                    options,
                    resolver,
                } => {
                    let message = Message::publish(channel, data).with_client_id(client_id);
                    self.send(message, ResponseAction::Publish { resolver }, options)
                        .await;
                }
            }
        }
    }

    fn fail_pending(&mut self, error: &ClientError) {
        while let Some(action) = self.pending.pop_front() {
            self.fail_pending_action(action, error);
        }
    }

    fn fail_pending_action(&mut self, action: PendingAction, error: &ClientError) {
        match action {
            PendingAction::Notify(resolver) | PendingAction::Publish { resolver, .. } => {
                resolver.fail(error.clone());
            }
            PendingAction::Subscribe { channel } => self.subscribe_failed(&channel, error),
            PendingAction::Unsubscribe { channel } => {
                debug!(channel = %channel, error = %error, "Unsubscribe not sent");
            }
        }
    }

    // Subscriptions

    async fn subscribe(
        &mut self,
        channels: Vec<String>,
        force: bool,
        entry: SubscriptionEntry,
        resolver: Resolver<ClientError>,
    ) {
        let group = self.next_group;
        self.next_group += 1;

        let mut requests = Vec::new();
        let mut remaining = 0;
        for channel in &channels {
            if let Some(waiters) = self.in_flight.get_mut(channel) {
                waiters.push(group);
                remaining += 1;
                if force {
                    requests.push(channel.clone());
                }
            } else if self.channels.has_subscription(channel) && !force {
                trace!(channel = %channel, "Already subscribed");
            } else {
                self.in_flight.insert(channel.clone(), vec![group]);
                requests.push(channel.clone());
                remaining += 1;
            }
        }

        self.channels.subscribe(&channels, &entry);

        if remaining == 0 {
            resolver.succeed();
            return;
        }

        self.groups.insert(
            group,
            SubscribeGroup {
                id: entry.id(),
                remaining,
                resolver,
            },
        );
        for channel in requests {
            self.enqueue(PendingAction::Subscribe { channel }).await;
        }
    }

    fn subscribe_succeeded(&mut self, channel: &str) {
        info!(client_id = ?self.client_id, channel = %channel, "Subscription acknowledged");

        let Some(waiters) = self.in_flight.remove(channel) else {
            return;
        };
        for group in waiters {
            let Some(entry) = self.groups.get_mut(&group) else {
                continue;
            };
            entry.remaining = entry.remaining.saturating_sub(1);
            if entry.remaining == 0 {
                if let Some(entry) = self.groups.remove(&group) {
                    entry.resolver.succeed();
                }
            }
        }
    }

    fn subscribe_failed(&mut self, channel: &str, error: &ClientError) {
        let waiters = self.in_flight.remove(channel).unwrap_or_default();
        if waiters.is_empty() {
            warn!(channel = %channel, error = %error, "Resubscription failed");
            return;
        }

        warn!(channel = %channel, error = %error, "Subscription failed");
        for group in waiters {
            if let Some(entry) = self.groups.remove(&group) {
                self.channels.unsubscribe(channel, entry.id);
                entry.resolver.fail(error.clone());
            }
        }
    }

    fn drop_subscriptions(&mut self, error: &ClientError) {
        self.fail_pending(error);
        for (_, group) in self.groups.drain() {
            group.resolver.fail(error.clone());
        }
        self.in_flight.clear();
        self.channels.clear();
        debug!("Channel listeners cleared");
    }

    /// Drop the handshake and connect requests still outstanding so none
    /// of them is retried or answered.
    fn abort_connection_requests(&mut self) {
        let ids: Vec<String> = self
            .responses
            .iter()
            .filter(|(_, action)| {
                matches!(action, ResponseAction::Handshake | ResponseAction::Connect { .. })
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            self.responses.remove(&id);
            self.dispatcher.abort(&id);
        }
        self.connect_request = false;
    }

    // Message flow

    /// Time to wait for the reply to a request.
    fn request_timeout(&self) -> Duration {
        if self.advice.timeout.is_zero() {
            self.dispatcher.retry()
        } else {
            self.advice.timeout
        }
    }

    /// Hand a message to the dispatcher, returning its ID unless an
    /// extension dropped it.
    async fn send(
        &mut self,
        mut message: Message,
        action: ResponseAction,
        options: PublishOptions,
    ) -> Option<String> {
        let id = self.next_message_id();
        message.id = Some(id.clone());
        let timeout = self.request_timeout();

        let channel = message.channel.clone();
        let extensions = self.extensions.clone();
        let Some(mut message) = extensions.outgoing(message).await else {
            debug!(id = %id, channel = %channel, "Outgoing message dropped by extension");
            self.fail_action(action, ClientError::Vetoed(channel));
            return None;
        };

        // Replies are correlated by the ID assigned here.
        message.id = Some(id.clone());
        self.responses.insert(id.clone(), action);
        self.dispatcher.send_message(message, timeout, options);
        Some(id)
    }

    async fn receive(&mut self, message: Message) {
        metrics::record_received(&message.channel);
        trace!(channel = %message.channel, id = ?message.id, "Message received");

        self.dispatcher.handle_response(&message);

        let action = match (&message.id, message.is_response()) {
            (Some(id), true) => self.responses.remove(id),
            _ => None,
        };

        let channel = message.channel.clone();
        let extensions = self.extensions.clone();
        let Some(message) = extensions.incoming(message).await else {
            debug!(channel = %channel, "Incoming message dropped by extension");
            if let Some(action) = action {
                self.fail_action(action, ClientError::Vetoed(channel));
            }
            return;
        };

        if let Some(advice) = &message.advice {
            self.handle_advice(advice);
        }
        self.channels.distribute(&message);

        if let Some(action) = action {
            self.on_response(action, message).await;
        }
    }

    fn handle_advice(&mut self, advice: &Advice) {
        self.advice.merge(advice);
        self.dispatcher.set_timeout(self.advice.timeout);
        trace!(advice = ?self.advice, "Advice merged");

        if self.advice.forbids_reconnect() {
            self.abort_connection_requests();
            self.handshake_timer = None;
            self.connect_timer = None;
            self.fail_pending(&ClientError::ReconnectForbidden);
        }

        if advice.reconnect == Some(Reconnect::Handshake)
            && self.state != ConnectionState::Disconnected
        {
            info!("Server requested a new handshake");
            self.epoch += 1;
            self.abort_connection_requests();
            self.set_state(ConnectionState::Unconnected);
            self.client_id = None;
            self.dispatcher.set_client_id(None);
            self.cycle_connection(self.advice.interval);
        }
    }

    async fn on_response(&mut self, action: ResponseAction, message: Message) {
        let successful = message.is_successful();
        match action {
            ResponseAction::Handshake => {
                if self.state != ConnectionState::Connecting {
                    debug!(state = %self.state, "Ignoring stale handshake response");
                } else if successful {
                    self.handshake_succeeded(message).await;
                } else {
                    self.handshake_failed(response_error(&message));
                }
            }
            ResponseAction::Connect { epoch } => {
                if epoch != self.epoch {
                    debug!(epoch, "Ignoring connect response from an ended session");
                    return;
                }
                if !successful {
                    debug!(error = ?message.error, "Connect unsuccessful");
                }
                self.cycle_connection(self.advice.interval);
            }
            ResponseAction::Subscribe { channel } => {
                if successful {
                    self.subscribe_succeeded(&channel);
                } else {
                    self.subscribe_failed(&channel, &response_error(&message));
                }
            }
            ResponseAction::Unsubscribe { channel } => {
                if successful {
                    info!(client_id = ?self.client_id, channel = %channel, "Unsubscribed");
                } else {
                    warn!(channel = %channel, error = ?message.error, "Unsubscribe failed");
                }
            }
            ResponseAction::Publish { resolver } => {
                if successful {
                    resolver.succeed();
                } else {
                    resolver.fail(response_error(&message));
                }
            }
            ResponseAction::Disconnect { resolver } => {
                self.disconnect_timer = None;
                if successful {
                    resolver.succeed();
                } else {
                    resolver.fail(response_error(&message));
                }
            }
        }
    }

    /// Resolve an operation whose message never got a response.
    fn fail_action(&mut self, action: ResponseAction, error: ClientError) {
        match action {
            ResponseAction::Handshake => self.handshake_failed(error),
            ResponseAction::Connect { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                debug!(error = %error, "Connect not delivered");
                let retry = self.dispatcher.retry();
                self.cycle_connection(retry);
            }
            ResponseAction::Subscribe { channel } => self.subscribe_failed(&channel, &error),
            ResponseAction::Unsubscribe { channel } => {
                warn!(channel = %channel, error = %error, "Unsubscribe not delivered");
            }
            ResponseAction::Publish { resolver } => {
                resolver.fail(error);
            }
            ResponseAction::Disconnect { resolver } => {
                self.disconnect_timer = None;
                resolver.fail(error);
            }
        }
    }

    /// Resolve operations whose messages were dropped and publish the
    /// current status.
    fn settle(&mut self) {
        loop {
            let aborted = self.dispatcher.take_aborted();
            if aborted.is_empty() {
                break;
            }
            for message in aborted {
                let Some(id) = message.id else {
                    continue;
                };
                let Some(action) = self.responses.remove(&id) else {
                    continue;
                };
                let error = if self.state == ConnectionState::Disconnected {
                    ClientError::Disconnected
                } else {
                    ClientError::DeliveryAborted(id)
                };
                self.fail_action(action, error);
            }
        }

        metrics::set_active_channels(self.channels.len());

        let status = Status {
            state: self.state,
            client_id: self.client_id.clone(),
            connection_type: self.dispatcher.connection_type(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

fn response_error(message: &Message) -> ClientError {
    message
        .parsed_error()
        .unwrap_or_else(|| BayeuxError::new(None, Vec::new(), "Request unsuccessful"))
        .into()
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
