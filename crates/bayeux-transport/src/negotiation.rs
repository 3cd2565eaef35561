//! Transport negotiation.
//!
//! Selects the first usable transport from an ordered list of factories,
//! restricted to the connection types the server accepts and not disabled
//! by the caller.

use bayeux_protocol::ConnectionType;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::traits::{TransportContext, TransportError, TransportFactory};

/// The outcome of a negotiation.
#[derive(Clone)]
pub struct Selected {
    /// Factory of the chosen connection type.
    pub factory: Arc<dyn TransportFactory>,
    /// Endpoint the transport should talk to.
    pub endpoint: Url,
}

impl Selected {
    /// Get the selected connection type.
    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.factory.connection_type()
    }
}

impl std::fmt::Debug for Selected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selected")
            .field("connection_type", &self.connection_type())
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Build the default factory list in priority order.
///
/// Which transports are present depends on the enabled cargo features.
#[must_use]
pub fn default_factories() -> Vec<Arc<dyn TransportFactory>> {
    #[allow(unused_mut)]
    let mut factories: Vec<Arc<dyn TransportFactory>> = Vec::new();

    #[cfg(feature = "websocket")]
    factories.push(Arc::new(crate::websocket::WebSocketFactory::new()));

    #[cfg(feature = "http")]
    {
        let http = reqwest::Client::new();
        factories.push(Arc::new(crate::event_source::EventSourceFactory::new(
            http.clone(),
        )));
        factories.push(Arc::new(crate::long_polling::LongPollingFactory::cross_origin(
            http.clone(),
        )));
        factories.push(Arc::new(crate::long_polling::LongPollingFactory::same_origin(
            http.clone(),
        )));
        factories.push(Arc::new(
            crate::callback_polling::CallbackPollingFactory::new(http),
        ));
    }

    factories
}

/// Order the factories eligible for negotiation.
///
/// A factory is eligible when its connection type is in `allowed` and not
/// in `disabled`. Candidates are sorted by connection type priority; the
/// sort is stable, so equal types keep their registration order.
#[must_use]
pub fn candidates(
    factories: &[Arc<dyn TransportFactory>],
    allowed: &[String],
    disabled: &[String],
) -> Vec<Arc<dyn TransportFactory>> {
    let mut eligible: Vec<Arc<dyn TransportFactory>> = factories
        .iter()
        .filter(|f| {
            let name = f.connection_type().as_str();
            allowed.iter().any(|a| a == name) && !disabled.iter().any(|d| d == name)
        })
        .cloned()
        .collect();

    eligible.sort_by_key(|f| f.connection_type());
    eligible
}

/// Select the first usable transport.
///
/// Candidates are probed one after another, strictly in priority order; a
/// probe is only started after the previous one reported unusable.
///
/// # Errors
///
/// Returns [`TransportError::NoUsableTransport`] if no candidate is usable.
pub async fn negotiate(
    factories: &[Arc<dyn TransportFactory>],
    endpoint: &Url,
    allowed: &[String],
    disabled: &[String],
    ctx: &TransportContext,
) -> Result<Selected, TransportError> {
    for factory in candidates(factories, allowed, disabled) {
        let connection_type = factory.connection_type();
        let target = ctx.endpoint_for(connection_type, endpoint);

        if factory.is_usable(&target, ctx).await {
            info!(
                connection_type = %connection_type,
                endpoint = %target,
                "Selected transport"
            );
            return Ok(Selected {
                factory,
                endpoint: target,
            });
        }

        debug!(connection_type = %connection_type, endpoint = %target, "Transport not usable");
    }

    Err(TransportError::NoUsableTransport(endpoint.to_string()))
}
