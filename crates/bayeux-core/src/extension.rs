//! Message extensions.
//!
//! Extensions observe and rewrite every message in both directions. Each
//! hook may return a transformed message or `None` to drop it; a dropped
//! message is not shown to any later extension.

use async_trait::async_trait;
use bayeux_protocol::Message;
use std::sync::Arc;
use tracing::trace;

/// Middleware applied to incoming and outgoing messages.
///
/// Both hooks default to passing the message through unchanged.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "extension"
    }

    /// Process a message received from the server.
    async fn incoming(&self, message: Message) -> Option<Message> {
        Some(message)
    }

    /// Process a message about to be sent to the server.
    async fn outgoing(&self, message: Message) -> Option<Message> {
        Some(message)
    }
}

/// Ordered list of extensions.
///
/// Both directions run in registration order.
#[derive(Clone, Default)]
pub struct ExtensionPipeline {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extension.
    pub fn add(&mut self, extension: Arc<dyn Extension>) {
        trace!(extension = extension.name(), "Extension added");
        self.extensions.push(extension);
    }

    /// Remove a previously added extension.
    ///
    /// Returns `true` if it was registered.
    pub fn remove(&mut self, extension: &Arc<dyn Extension>) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| !Arc::ptr_eq(e, extension));
        before != self.extensions.len()
    }

    /// Get the number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if no extension is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run a received message through every `incoming` hook.
    pub async fn incoming(&self, mut message: Message) -> Option<Message> {
        for extension in &self.extensions {
            match extension.incoming(message).await {
                Some(next) => message = next,
                None => {
                    trace!(extension = extension.name(), "Incoming message dropped");
                    return None;
                }
            }
        }
        Some(message)
    }

    /// Run an outgoing message through every `outgoing` hook.
    pub async fn outgoing(&self, mut message: Message) -> Option<Message> {
        for extension in &self.extensions {
            match extension.outgoing(message).await {
                Some(next) => message = next,
                None => {
                    trace!(extension = extension.name(), "Outgoing message dropped");
                    return None;
                }
            }
        }
        Some(message)
    }
}

impl std::fmt::Debug for ExtensionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its tag to `ext.trail` in both directions.
    struct Tag(&'static str);

    fn push_tag(mut message: Message, tag: &str) -> Message {
        let mut trail = message
            .ext
            .as_ref()
            .and_then(|ext| ext.get("trail").cloned())
            .and_then(|t| t.as_array().cloned())
            .unwrap_or_default();
        trail.push(json!(tag));
        message.ext = Some(json!({ "trail": trail }));
        message
    }

    #[async_trait]
    impl Extension for Tag {
        async fn incoming(&self, message: Message) -> Option<Message> {
            Some(push_tag(message, self.0))
        }

        async fn outgoing(&self, message: Message) -> Option<Message> {
            Some(push_tag(message, self.0))
        }
    }

    struct Veto;

    #[async_trait]
    impl Extension for Veto {
        async fn outgoing(&self, _message: Message) -> Option<Message> {
            None
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Extension for Counter {
        async fn outgoing(&self, message: Message) -> Option<Message> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(message)
        }
    }

    #[tokio::test]
    async fn test_registration_order_both_directions() {
        let mut pipeline = ExtensionPipeline::new();
        pipeline.add(Arc::new(Tag("a")));
        pipeline.add(Arc::new(Tag("b")));

        let out = pipeline.outgoing(Message::new("/foo")).await.unwrap();
        assert_eq!(out.ext, Some(json!({"trail": ["a", "b"]})));

        let inc = pipeline.incoming(Message::new("/foo")).await.unwrap();
        assert_eq!(inc.ext, Some(json!({"trail": ["a", "b"]})));
    }

    #[tokio::test]
    async fn test_veto_short_circuits() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        let mut pipeline = ExtensionPipeline::new();
        pipeline.add(Arc::new(Veto));
        pipeline.add(counter.clone());

        assert!(pipeline.outgoing(Message::new("/foo")).await.is_none());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        // Default incoming hook passes through.
        assert!(pipeline.incoming(Message::new("/foo")).await.is_some());
    }

    #[test]
    fn test_remove() {
        let veto: Arc<dyn Extension> = Arc::new(Veto);
        let mut pipeline = ExtensionPipeline::new();
        pipeline.add(veto.clone());
        assert_eq!(pipeline.len(), 1);

        assert!(pipeline.remove(&veto));
        assert!(!pipeline.remove(&veto));
        assert!(pipeline.is_empty());
    }
}
