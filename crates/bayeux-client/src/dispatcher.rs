//! Message dispatcher.
//!
//! The dispatcher owns the active transport and one envelope per
//! outstanding message. An envelope tracks the message's scheduler, the
//! request carrying it and the timer guarding that request. It is created
//! on first send and removed when a response arrives or the scheduler gives
//! up; removed messages are collected so the client can fail the operation
//! waiting on them.
//!
//! The dispatcher is driven by the client task and never runs concurrently
//! with it. Transport I/O and timers report back through channels the
//! client task reads.

use bayeux_core::{Scheduler, SchedulerFactory, SchedulerOptions};
use bayeux_protocol::{ConnectionType, Message, MANDATORY_CONNECTION_TYPES};
use bayeux_transport::{
    negotiate, RequestHandle, Selected, Transport, TransportContext, TransportError,
    TransportEvent, TransportFactory, TransportId, TransportSink,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::metrics;
use crate::state::ClientEvent;
use crate::timer::{Timer, TimerSet};

/// A request is given this much longer than its declared timeout before it
/// counts as failed, to cover transport overhead.
const TIMEOUT_FACTOR: f64 = 1.2;

/// Lower bound for the WebSocket keep-alive derived from advice.
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Delivery limits for a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Maximum number of send attempts.
    pub attempts: Option<u32>,
    /// Give up once this much time has passed since publishing.
    pub deadline: Option<Duration>,
}

/// Events produced by the dispatcher's own timers and tasks.
#[derive(Debug)]
pub(crate) enum DispatcherEvent {
    /// A request went unanswered for too long.
    Timeout { id: String, token: u64 },
    /// The wait before retrying a message is over.
    Retry { id: String, token: u64 },
    /// A negotiation finished.
    Negotiated {
        generation: u64,
        result: Result<Selected, TransportError>,
    },
    /// Time to negotiate again after a failed attempt.
    Renegotiate { token: u64 },
}

#[derive(Debug)]
struct Envelope {
    message: Message,
    scheduler: Box<dyn Scheduler>,
    request: Option<(TransportId, RequestHandle)>,
    timer: Option<Timer>,
}

/// Static settings of a dispatcher.
pub(crate) struct DispatcherSettings {
    pub endpoint: Url,
    pub ctx: TransportContext,
    pub factories: Vec<Arc<dyn TransportFactory>>,
    pub disabled: Vec<String>,
    pub retry: Duration,
    pub timeout: Duration,
    pub scheduler: SchedulerFactory,
    /// Whether the WebSocket keep-alive was configured explicitly.
    pub ping_configured: bool,
}

pub(crate) struct Dispatcher {
    endpoint: Url,
    ctx: TransportContext,
    factories: Vec<Arc<dyn TransportFactory>>,
    disabled: Vec<String>,
    allowed: Vec<String>,
    retry: Duration,
    timeout: Duration,
    ping_configured: bool,
    scheduler: SchedulerFactory,

    transport: Option<Arc<dyn Transport>>,
    connection_type: Option<ConnectionType>,
    next_transport_id: u64,
    generation: u64,
    renegotiate: Option<Timer>,

    envelopes: HashMap<String, Envelope>,
    aborted: Vec<Message>,
    up: Option<bool>,

    transport_tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
    events_tx: mpsc::UnboundedSender<DispatcherEvent>,
    timers: TimerSet<DispatcherEvent>,
    notify: broadcast::Sender<ClientEvent>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatcherSettings,
        transport_tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
        events_tx: mpsc::UnboundedSender<DispatcherEvent>,
        notify: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            endpoint: settings.endpoint,
            ctx: settings.ctx,
            factories: settings.factories,
            disabled: settings.disabled,
            allowed: Vec::new(),
            retry: settings.retry,
            timeout: settings.timeout,
            ping_configured: settings.ping_configured,
            scheduler: settings.scheduler,
            transport: None,
            connection_type: None,
            next_transport_id: 0,
            generation: 0,
            renegotiate: None,
            envelopes: HashMap::new(),
            aborted: Vec::new(),
            up: None,
            transport_tx,
            timers: TimerSet::new(events_tx.clone()),
            events_tx,
            notify,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry(&self) -> Duration {
        self.retry
    }

    /// Connection type of the most recently attached transport.
    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.connection_type
    }

    pub fn set_client_id(&mut self, client_id: Option<String>) {
        self.ctx.client_id = client_id;
    }

    /// Apply a reply timeout received as advice.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if !self.ping_configured && !timeout.is_zero() {
            self.ctx.ping_interval = Some((timeout / 2).max(MIN_PING_INTERVAL));
        }
    }

    pub fn disable(&mut self, connection_type: &str) {
        if !self.disabled.iter().any(|d| d == connection_type) {
            debug!(connection_type = %connection_type, "Transport disabled");
            self.disabled.push(connection_type.to_string());
        }
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.ctx.headers.insert(name, value);
    }

    /// Connection types to advertise in a handshake.
    ///
    /// Every registered, enabled type in priority order, followed by any
    /// mandatory type not already listed.
    pub fn connection_types(&self) -> Vec<String> {
        let mut registered: Vec<ConnectionType> = self
            .factories
            .iter()
            .map(|f| f.connection_type())
            .filter(|ct| !self.disabled.iter().any(|d| d == ct.as_str()))
            .collect();
        registered.sort();
        registered.dedup();

        let mut types: Vec<String> = registered.iter().map(|ct| ct.as_str().to_string()).collect();
        for mandatory in MANDATORY_CONNECTION_TYPES {
            if !types.iter().any(|t| t == mandatory) {
                types.push(mandatory.to_string());
            }
        }
        types
    }

    /// Negotiate a transport among `allowed` connection types.
    ///
    /// The current transport keeps carrying requests until the outcome is
    /// known.
    pub fn select_transport(&mut self, allowed: Vec<String>) {
        self.allowed = allowed;
        self.start_negotiation();
    }

    fn start_negotiation(&mut self) {
        self.generation += 1;
        self.renegotiate = None;

        let generation = self.generation;
        let factories = self.factories.clone();
        let endpoint = self.endpoint.clone();
        let allowed = self.allowed.clone();
        let disabled = self.disabled.clone();
        let ctx = self.ctx.clone();
        let tx = self.events_tx.clone();

        debug!(generation, allowed = ?allowed, "Negotiating transport");
        tokio::spawn(async move {
            let result = negotiate(&factories, &endpoint, &allowed, &disabled, &ctx).await;
            let _ = tx.send(DispatcherEvent::Negotiated { generation, result });
        });
    }

    fn attach(&mut self, selected: Selected) {
        let connection_type = selected.connection_type();
        if let Some(current) = &self.transport {
            if current.connection_type() == connection_type {
                trace!(connection_type = %connection_type, "Keeping current transport");
                return;
            }
        }

        self.next_transport_id += 1;
        let id = TransportId(self.next_transport_id);
        let sink = TransportSink::new(id, self.transport_tx.clone());
        let transport = selected
            .factory
            .create(selected.endpoint, self.ctx.clone(), sink);

        info!(
            connection_type = %connection_type,
            endpoint = %transport.endpoint(),
            transport = %id,
            "Transport attached"
        );

        if let Some(old) = self.transport.replace(transport) {
            tokio::spawn(async move { old.close().await });
        }
        self.connection_type = Some(connection_type);
        self.flush();
    }

    /// Send every envelope that has neither a request nor a timer.
    fn flush(&mut self) {
        let idle: Vec<String> = self
            .envelopes
            .iter()
            .filter(|(_, e)| e.request.is_none() && e.timer.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        for id in idle {
            self.send_envelope(&id);
        }
    }

    /// Send a message, creating its envelope if needed.
    ///
    /// `timeout` is the declared time to wait for a reply.
    pub fn send_message(&mut self, message: Message, timeout: Duration, options: PublishOptions) {
        let Some(id) = message.id.clone() else {
            warn!(channel = %message.channel, "Refusing to send a message without an id");
            return;
        };

        if !self.envelopes.contains_key(&id) {
            let scheduler = (self.scheduler)(
                &message,
                SchedulerOptions {
                    timeout,
                    interval: self.retry,
                    attempts: options.attempts,
                    deadline: options.deadline.map(|d| Instant::now() + d),
                },
            );
            self.envelopes.insert(
                id.clone(),
                Envelope {
                    message,
                    scheduler,
                    request: None,
                    timer: None,
                },
            );
        }

        self.send_envelope(&id);
    }

    fn send_envelope(&mut self, id: &str) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let Some(envelope) = self.envelopes.get_mut(id) else {
            return;
        };
        if envelope.request.is_some() || envelope.timer.is_some() {
            return;
        }

        if !envelope.scheduler.is_deliverable() {
            envelope.scheduler.abort();
            if let Some(envelope) = self.envelopes.remove(id) {
                warn!(
                    id = %id,
                    channel = %envelope.message.channel,
                    attempts = envelope.scheduler.attempts(),
                    "Giving up on message"
                );
                metrics::record_aborted();
                self.aborted.push(envelope.message);
            }
            return;
        }

        let timeout = envelope.scheduler.timeout().mul_f64(TIMEOUT_FACTOR);
        let timer_id = id.to_string();
        envelope.timer = Some(self.timers.start(timeout, |token| DispatcherEvent::Timeout {
            id: timer_id,
            token,
        }));
        envelope.scheduler.send();

        trace!(
            id = %id,
            channel = %envelope.message.channel,
            attempt = envelope.scheduler.attempts(),
            transport = %transport.id(),
            "Sending message"
        );
        metrics::record_sent(&envelope.message.channel);

        let request = transport.request(vec![envelope.message.clone()]);
        envelope.request = Some((transport.id(), request));
    }

    /// Settle the envelope a reply answers.
    pub fn handle_response(&mut self, message: &Message) {
        if message.is_response() {
            if let Some(id) = &message.id {
                if let Some(mut envelope) = self.envelopes.remove(id) {
                    envelope.scheduler.succeed();
                }
            }
        }
        self.set_up(true);
    }

    /// Drop a message for good. Its request is aborted, its timer cleared
    /// and nothing is reported through [`Dispatcher::take_aborted`].
    pub fn abort(&mut self, id: &str) -> bool {
        let Some(mut envelope) = self.envelopes.remove(id) else {
            return false;
        };
        envelope.scheduler.abort();
        if let Some((_, request)) = envelope.request.take() {
            request.abort();
        }
        debug!(id = %id, channel = %envelope.message.channel, "Message aborted");
        true
    }

    /// Stop tracking a message but let its request run to completion.
    ///
    /// Returns whether the message was on the wire.
    pub fn release(&mut self, id: &str) -> bool {
        self.envelopes
            .remove(id)
            .is_some_and(|envelope| envelope.request.is_some())
    }

    /// Handle messages a transport could not deliver.
    pub fn handle_failure(&mut self, from: TransportId, messages: Vec<Message>, immediate: bool) {
        for message in messages {
            if let Some(id) = message.id {
                self.handle_error(&id, Some(from), immediate);
            }
        }
    }

    fn handle_error(&mut self, id: &str, from: Option<TransportId>, immediate: bool) {
        let Some(envelope) = self.envelopes.get_mut(id) else {
            return;
        };
        let Some((request_transport, _)) = &envelope.request else {
            return;
        };
        if from.is_some_and(|from| from != *request_transport) {
            return;
        }

        if let Some((_, request)) = envelope.request.take() {
            request.abort();
        }
        envelope.timer = None;
        envelope.scheduler.fail();
        metrics::record_retry();

        debug!(
            id = %id,
            channel = %envelope.message.channel,
            immediate,
            "Request failed"
        );

        if immediate {
            self.send_envelope(id);
        } else {
            let interval = envelope.scheduler.interval();
            let retry_id = id.to_string();
            envelope.timer = Some(self.timers.start(interval, |token| DispatcherEvent::Retry {
                id: retry_id,
                token,
            }));
        }

        self.set_up(false);
    }

    /// Handle a transport reporting that it can no longer carry requests.
    pub fn handle_closed(&mut self, from: TransportId, was_connected: bool) {
        if self.transport.as_ref().map(|t| t.id()) != Some(from) {
            trace!(transport = %from, "Ignoring close of inactive transport");
            return;
        }

        info!(transport = %from, was_connected, "Transport closed");
        self.transport = None;
        self.set_up(false);

        if was_connected {
            self.start_negotiation();
        } else {
            self.schedule_negotiation();
        }
    }

    fn schedule_negotiation(&mut self) {
        let retry = self.retry;
        self.renegotiate = Some(
            self.timers
                .start(retry, |token| DispatcherEvent::Renegotiate { token }),
        );
    }

    pub fn handle_event(&mut self, event: DispatcherEvent) {
        match event {
            DispatcherEvent::Timeout { id, token } => {
                let Some(envelope) = self.envelopes.get_mut(&id) else {
                    return;
                };
                if envelope.timer.as_ref().map(Timer::token) != Some(token) {
                    return;
                }
                envelope.timer = None;
                debug!(id = %id, "Request timed out");
                self.handle_error(&id, None, false);
            }
            DispatcherEvent::Retry { id, token } => {
                let Some(envelope) = self.envelopes.get_mut(&id) else {
                    return;
                };
                if envelope.timer.as_ref().map(Timer::token) != Some(token) {
                    return;
                }
                envelope.timer = None;
                self.send_envelope(&id);
            }
            DispatcherEvent::Negotiated { generation, result } => {
                if generation != self.generation {
                    trace!(generation, "Ignoring stale negotiation");
                    return;
                }
                match result {
                    Ok(selected) => self.attach(selected),
                    Err(e) => {
                        error!(endpoint = %self.endpoint, error = %e, "Transport negotiation failed");
                        if self.transport.is_none() {
                            self.schedule_negotiation();
                        }
                    }
                }
            }
            DispatcherEvent::Renegotiate { token } => {
                if self.renegotiate.as_ref().map(Timer::token) == Some(token) {
                    self.start_negotiation();
                }
            }
        }
    }

    fn set_up(&mut self, up: bool) {
        if self.up == Some(up) {
            return;
        }
        self.up = Some(up);
        metrics::set_transport_up(up);

        let event = if up {
            info!("Transport up");
            ClientEvent::TransportUp
        } else {
            warn!("Transport down");
            ClientEvent::TransportDown
        };
        let _ = self.notify.send(event);
    }

    /// Take the messages dropped since the last call.
    pub fn take_aborted(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.aborted)
    }

    /// Drop the transport and every outstanding message.
    pub fn close(&mut self) {
        self.generation += 1;
        self.renegotiate = None;
        self.connection_type = None;

        if let Some(transport) = self.transport.take() {
            debug!(transport = %transport.id(), "Closing transport");
            tokio::spawn(async move { transport.close().await });
        }

        for (_, envelope) in self.envelopes.drain() {
            if let Some((_, request)) = envelope.request {
                request.abort();
            }
            self.aborted.push(envelope.message);
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.envelopes.len()
    }

    #[cfg(test)]
    pub fn attempts(&self, id: &str) -> Option<u32> {
        self.envelopes.get(id).map(|e| e.scheduler.attempts())
    }
}
