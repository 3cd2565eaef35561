//! Callback-polling (JSONP) transport.
//!
//! Each batch is sent as a GET with `message=<JSON>&jsonp=<callback>` in the
//! query string. The router answers with a script invoking the callback,
//! `<callback>([...]);`, whose argument is the reply batch. Callback names
//! are generated per request and never reused.

use async_trait::async_trait;
use bayeux_protocol::{codec, ConnectionType, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::traits::{
    is_http, RequestHandle, Transport, TransportContext, TransportError, TransportFactory,
    TransportId, TransportSink,
};

/// Factory for callback-polling transports.
#[derive(Debug, Clone, Default)]
pub struct CallbackPollingFactory {
    http: reqwest::Client,
}

impl CallbackPollingFactory {
    /// Create a factory using the given HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransportFactory for CallbackPollingFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::CallbackPolling
    }

    async fn is_usable(&self, endpoint: &Url, _ctx: &TransportContext) -> bool {
        is_http(endpoint)
    }

    fn create(
        &self,
        endpoint: Url,
        ctx: TransportContext,
        sink: TransportSink,
    ) -> Arc<dyn Transport> {
        Arc::new(CallbackPollingTransport {
            http: self.http.clone(),
            endpoint,
            ctx,
            sink,
            callbacks: AtomicU64::new(0),
        })
    }
}

/// A callback-polling transport bound to one endpoint.
#[derive(Debug)]
pub struct CallbackPollingTransport {
    http: reqwest::Client,
    endpoint: Url,
    ctx: TransportContext,
    sink: TransportSink,
    callbacks: AtomicU64,
}

impl CallbackPollingTransport {
    fn next_callback(&self) -> String {
        let n = self.callbacks.fetch_add(1, Ordering::Relaxed) + 1;
        format!("__jsonp{n}__")
    }

    fn request_url(&self, query: &str) -> Url {
        let mut url = self.endpoint.clone();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
            _ => query.to_string(),
        };
        url.set_query(Some(&query));
        url
    }
}

async fn fetch_jsonp(
    request: reqwest::RequestBuilder,
    callback: &str,
) -> Result<Vec<Message>, TransportError> {
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    Ok(codec::decode_jsonp(&body, callback)?)
}

#[async_trait]
impl Transport for CallbackPollingTransport {
    fn id(&self) -> TransportId {
        self.sink.id()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::CallbackPolling
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, messages: Vec<Message>) -> RequestHandle {
        let callback = self.next_callback();
        let query = match codec::encode_jsonp_query(&messages, &callback) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "Failed to encode batch");
                self.sink.failed(messages, false);
                return RequestHandle::Detached;
            }
        };

        let url = self.request_url(&query);
        if url.as_str().len() > self.ctx.max_request_size {
            trace!(
                size = url.as_str().len(),
                max = self.ctx.max_request_size,
                "Request URL exceeds advised size"
            );
        }

        let mut request = self.http.get(url);
        for (name, value) in &self.ctx.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            match fetch_jsonp(request, &callback).await {
                Ok(replies) => sink.replies(replies),
                Err(e) => {
                    debug!(callback = %callback, error = %e, "Callback-poll request failed");
                    sink.failed(messages, false);
                }
            }
        });

        RequestHandle::Task(task.abort_handle())
    }

    fn encode(&self, messages: &[Message]) -> Result<String, TransportError> {
        Ok(codec::encode(messages)?)
    }

    async fn close(&self) {}
}
