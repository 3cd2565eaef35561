//! Handles returned by subscribe and publish.

use bayeux_core::{Deferred, DeferredStatus, SubscriptionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::actor::Command;
use crate::error::ClientError;

/// A set of channels listened to with one handler.
///
/// Clones share the same subscription. Dropping a handle does not
/// unsubscribe; call [`Subscription::cancel`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    channels: Vec<String>,
    cancelled: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
    status: Deferred<ClientError>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        channels: Vec<String>,
        cancelled: Arc<AtomicBool>,
        commands: mpsc::UnboundedSender<Command>,
        status: Deferred<ClientError>,
    ) -> Self {
        Self {
            id,
            channels,
            cancelled,
            commands,
            status,
        }
    }

    /// Get the subscription ID.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Get the channels this subscription listens on.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Get the subscribe outcome without waiting.
    #[must_use]
    pub fn status(&self) -> DeferredStatus<ClientError> {
        self.status.status()
    }

    /// Wait until the server acknowledged every channel.
    ///
    /// # Errors
    ///
    /// Returns the error of the first channel that could not be subscribed.
    pub async fn wait(&self) -> Result<(), ClientError> {
        self.status.wait().await
    }

    /// Check if the subscription was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop delivering messages and unsubscribe every channel this was the
    /// last subscription of.
    ///
    /// Delivery stops immediately; cancelling twice has no further effect.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(subscription = %self.id, channels = ?self.channels, "Subscription cancelled");
        let _ = self.commands.send(Command::Unsubscribe {
            channels: self.channels.clone(),
            id: self.id,
        });
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channels", &self.channels)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Outcome of a publish or disconnect.
#[derive(Debug, Clone)]
pub struct Publication {
    status: Deferred<ClientError>,
}

impl Publication {
    pub(crate) fn new(status: Deferred<ClientError>) -> Self {
        Self { status }
    }

    /// Get the outcome without waiting.
    #[must_use]
    pub fn status(&self) -> DeferredStatus<ClientError> {
        self.status.status()
    }

    /// Wait for the server's verdict.
    ///
    /// # Errors
    ///
    /// Returns the server's error, or the reason the message was never
    /// answered.
    pub async fn wait(&self) -> Result<(), ClientError> {
        self.status.wait().await
    }
}
