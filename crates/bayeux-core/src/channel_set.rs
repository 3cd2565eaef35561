//! Client-side channel registry.
//!
//! Maps channel names (and patterns) to the local subscriptions listening on
//! them, and fans received messages out to every matching subscription.

use bayeux_protocol::{channel, Message};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Callback invoked with the channel and data of each delivered message.
pub type MessageHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Identifier of a local subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// A subscription as stored in the registry.
#[derive(Clone)]
pub struct SubscriptionEntry {
    id: SubscriptionId,
    handler: MessageHandler,
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionEntry {
    /// Create a registry entry.
    ///
    /// The `cancelled` flag is shared with the caller's handle so delivery
    /// stops as soon as the handle is cancelled.
    #[must_use]
    pub fn new(id: SubscriptionId, handler: MessageHandler, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            id,
            handler,
            cancelled,
        }
    }

    /// Get the subscription ID.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Check if the subscription was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn deliver(&self, channel: &str, data: &Value) -> bool {
        if self.is_cancelled() {
            return false;
        }
        (self.handler)(channel, data);
        true
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Registry of channels and their subscriptions.
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: HashMap<String, Vec<SubscriptionEntry>>,
}

impl ChannelSet {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get every registered channel name.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Get the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Check if a channel has at least one subscription.
    #[must_use]
    pub fn has_subscription(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Get the number of subscriptions on a channel.
    #[must_use]
    pub fn subscription_count(&self, name: &str) -> usize {
        self.channels.get(name).map_or(0, Vec::len)
    }

    /// Register a subscription on each of `names`.
    pub fn subscribe<S: AsRef<str>>(&mut self, names: &[S], entry: &SubscriptionEntry) {
        for name in names {
            let name = name.as_ref();
            let subs = self.channels.entry(name.to_string()).or_default();
            if !subs.iter().any(|s| s.id == entry.id) {
                subs.push(entry.clone());
                debug!(channel = %name, subscription = %entry.id, "Subscription registered");
            }
        }
    }

    /// Remove a subscription from a channel.
    ///
    /// Returns `true` if the channel has no subscriptions left and was
    /// removed from the registry.
    pub fn unsubscribe(&mut self, name: &str, id: SubscriptionId) -> bool {
        let Some(subs) = self.channels.get_mut(name) else {
            return false;
        };

        subs.retain(|s| s.id != id);
        if subs.is_empty() {
            self.channels.remove(name);
            debug!(channel = %name, "Last subscription removed");
            return true;
        }
        false
    }

    /// Remove every channel and subscription.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Deliver a data message to every matching subscription.
    ///
    /// Returns the number of handlers invoked. Messages without data are
    /// not delivered.
    pub fn distribute(&self, message: &Message) -> usize {
        let Some(data) = message.data.as_ref() else {
            return 0;
        };

        let mut delivered = 0;
        for name in channel::expand(&message.channel) {
            if let Some(subs) = self.channels.get(&name) {
                for sub in subs {
                    if sub.deliver(&message.channel, data) {
                        delivered += 1;
                    }
                }
            }
        }

        trace!(channel = %message.channel, delivered, "Message distributed");
        delivered
    }
}
