//! HTTP long-polling transports.
//!
//! Each batch is POSTed as `message=<urlencoded JSON>` and the reply body
//! carries the JSON array of responses. The router holds `/meta/connect`
//! requests open until it has something to deliver.
//!
//! The same mechanism serves two connection types: `long-polling` for
//! endpoints on the client's own origin, and `cross-origin-long-polling`
//! for endpoints elsewhere, which sends a `text/plain` body and an `Origin`
//! header.

use async_trait::async_trait;
use bayeux_protocol::{codec, ConnectionType, Message};
use reqwest::header::{CONTENT_TYPE, ORIGIN};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::traits::{
    is_http, RequestHandle, Transport, TransportContext, TransportError, TransportFactory,
    TransportId, TransportSink,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const CROSS_ORIGIN_CONTENT_TYPE: &str = "text/plain";

/// Factory for long-polling transports.
#[derive(Debug, Clone)]
pub struct LongPollingFactory {
    http: reqwest::Client,
    cross_origin: bool,
}

impl LongPollingFactory {
    /// Create a same-origin (`long-polling`) factory.
    #[must_use]
    pub fn same_origin(http: reqwest::Client) -> Self {
        Self {
            http,
            cross_origin: false,
        }
    }

    /// Create a `cross-origin-long-polling` factory.
    #[must_use]
    pub fn cross_origin(http: reqwest::Client) -> Self {
        Self {
            http,
            cross_origin: true,
        }
    }
}

#[async_trait]
impl TransportFactory for LongPollingFactory {
    fn connection_type(&self) -> ConnectionType {
        if self.cross_origin {
            ConnectionType::CrossOriginLongPolling
        } else {
            ConnectionType::LongPolling
        }
    }

    async fn is_usable(&self, endpoint: &Url, ctx: &TransportContext) -> bool {
        is_http(endpoint) && ctx.is_cross_origin(endpoint) == self.cross_origin
    }

    fn create(
        &self,
        endpoint: Url,
        ctx: TransportContext,
        sink: TransportSink,
    ) -> Arc<dyn Transport> {
        Arc::new(LongPollingTransport::new(
            self.http.clone(),
            endpoint,
            ctx,
            sink,
            self.cross_origin,
        ))
    }
}

/// A long-polling transport bound to one endpoint.
#[derive(Debug)]
pub struct LongPollingTransport {
    http: reqwest::Client,
    endpoint: Url,
    ctx: TransportContext,
    sink: TransportSink,
    cross_origin: bool,
}

impl LongPollingTransport {
    /// Create a transport.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        ctx: TransportContext,
        sink: TransportSink,
        cross_origin: bool,
    ) -> Self {
        Self {
            http,
            endpoint,
            ctx,
            sink,
            cross_origin,
        }
    }

    fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut request = self.http.post(self.endpoint.clone());

        for (name, value) in &self.ctx.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if self.cross_origin {
            request = request.header(CONTENT_TYPE, CROSS_ORIGIN_CONTENT_TYPE);
            if let Some(origin) = &self.ctx.origin {
                request = request.header(ORIGIN, origin.origin().ascii_serialization());
            }
        } else {
            request = request.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
        }

        request.body(body)
    }
}

/// POST a prepared request and decode the reply batch.
pub(crate) async fn post_batch(
    request: reqwest::RequestBuilder,
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

    Ok(codec::decode(&body)?)
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn id(&self) -> TransportId {
        self.sink.id()
    }

    fn connection_type(&self) -> ConnectionType {
        if self.cross_origin {
            ConnectionType::CrossOriginLongPolling
        } else {
            ConnectionType::LongPolling
        }
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, messages: Vec<Message>) -> RequestHandle {
        let body = match self.encode(&messages) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to encode batch");
                self.sink.failed(messages, false);
                return RequestHandle::Detached;
            }
        };

        if body.len() > self.ctx.max_request_size {
            trace!(
                size = body.len(),
                max = self.ctx.max_request_size,
                "Request body exceeds advised size"
            );
        }

        let request = self.build_request(body);
        let sink = self.sink.clone();
        let endpoint = self.endpoint.clone();

        let task = tokio::spawn(async move {
            match post_batch(request).await {
                Ok(replies) => {
                    trace!(endpoint = %endpoint, replies = replies.len(), "Long-poll replied");
                    sink.replies(replies);
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "Long-poll request failed");
                    sink.failed(messages, false);
                }
            }
        });

        RequestHandle::Task(task.abort_handle())
    }

    fn encode(&self, messages: &[Message]) -> Result<String, TransportError> {
        Ok(codec::encode_form(messages)?)
    }

    async fn close(&self) {}
}
