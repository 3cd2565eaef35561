//! EventSource transport.
//!
//! Replies arrive on a Server-Sent Events stream opened at
//! `<endpoint>/<client_id>`; requests still go out as long-polling POSTs.
//! The stream only exists once the handshake has assigned a client ID, so
//! this transport is never usable for the handshake itself.

use async_trait::async_trait;
use bayeux_protocol::{codec, ConnectionType, Message};
use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::long_polling::LongPollingTransport;
use crate::traits::{
    is_http, RequestHandle, Transport, TransportContext, TransportError, TransportFactory,
    TransportId, TransportSink,
};

const EVENT_STREAM: &str = "text/event-stream";

/// Build the stream URL for a client.
fn stream_url(endpoint: &Url, client_id: &str) -> Url {
    let mut url = endpoint.clone();
    let path = format!("{}/{}", url.path().trim_end_matches('/'), client_id);
    url.set_path(&path);
    url
}

fn open_request(
    http: &reqwest::Client,
    url: Url,
    ctx: &TransportContext,
) -> reqwest::RequestBuilder {
    let mut request = http.get(url).header(ACCEPT, EVENT_STREAM);
    for (name, value) in &ctx.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(EVENT_STREAM))
}

/// Factory for EventSource transports.
#[derive(Debug, Clone, Default)]
pub struct EventSourceFactory {
    http: reqwest::Client,
}

impl EventSourceFactory {
    /// Create a factory using the given HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransportFactory for EventSourceFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::EventSource
    }

    async fn is_usable(&self, endpoint: &Url, ctx: &TransportContext) -> bool {
        let Some(client_id) = ctx.client_id.as_deref() else {
            return false;
        };
        if !is_http(endpoint) {
            return false;
        }

        let request = open_request(&self.http, stream_url(endpoint, client_id), ctx);
        match tokio::time::timeout(ctx.probe_timeout, request.send()).await {
            Ok(Ok(response)) => response.status().is_success() && is_event_stream(&response),
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint, error = %e, "EventSource probe failed");
                false
            }
            Err(_) => {
                debug!(endpoint = %endpoint, "EventSource probe timed out");
                false
            }
        }
    }

    fn create(
        &self,
        endpoint: Url,
        ctx: TransportContext,
        sink: TransportSink,
    ) -> Arc<dyn Transport> {
        let stream = match ctx.client_id.as_deref() {
            Some(client_id) => {
                let request = open_request(&self.http, stream_url(&endpoint, client_id), &ctx);
                Some(tokio::spawn(read_stream(request, sink.clone())))
            }
            None => {
                warn!("EventSource transport created without a client ID");
                sink.closed(false);
                None
            }
        };

        let cross_origin = ctx.is_cross_origin(&endpoint);
        let poster = LongPollingTransport::new(
            self.http.clone(),
            endpoint.clone(),
            ctx,
            sink.clone(),
            cross_origin,
        );

        Arc::new(EventSourceTransport {
            endpoint,
            sink,
            poster,
            stream,
        })
    }
}

async fn read_stream(request: reqwest::RequestBuilder, sink: TransportSink) {
    let response = match request.send().await {
        Ok(response) if response.status().is_success() && is_event_stream(&response) => response,
        Ok(response) => {
            debug!(status = %response.status(), "EventSource stream refused");
            sink.closed(false);
            return;
        }
        Err(e) => {
            debug!(error = %e, "EventSource stream failed to open");
            sink.closed(false);
            return;
        }
    };

    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "EventSource stream error");
                break;
            }
        };

        parser.feed(&chunk);
        while let Some(data) = parser.next_event() {
            match codec::decode(&data) {
                Ok(replies) => sink.replies(replies),
                Err(e) => warn!(error = %e, "Failed to decode EventSource event"),
            }
        }
    }

    sink.closed(true);
}

/// An EventSource transport.
#[derive(Debug)]
pub struct EventSourceTransport {
    endpoint: Url,
    sink: TransportSink,
    poster: LongPollingTransport,
    stream: Option<JoinHandle<()>>,
}

#[async_trait]
impl Transport for EventSourceTransport {
    fn id(&self) -> TransportId {
        self.sink.id()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::EventSource
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, messages: Vec<Message>) -> RequestHandle {
        self.poster.request(messages)
    }

    fn encode(&self, messages: &[Message]) -> Result<String, TransportError> {
        self.poster.encode(messages)
    }

    async fn close(&self) {
        if let Some(stream) = &self.stream {
            stream.abort();
        }
    }
}

impl Drop for EventSourceTransport {
    fn drop(&mut self) {
        if let Some(stream) = &self.stream {
            stream.abort();
        }
    }
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Only `data:` fields are kept; multiple data lines of one event are
/// joined with `\n`. Comments and other fields are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the data of the next complete event, if any.
    pub fn next_event(&mut self) -> Option<String> {
        loop {
            let (end, separator) = find_event_end(&self.buffer)?;
            let raw = self.buffer.split_to(end);
            self.buffer.advance(separator);

            let text = String::from_utf8_lossy(&raw);
            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect();

            if !data.is_empty() {
                return Some(data.join("\n"));
            }
        }
    }
}

/// Find the blank line ending the first event: its offset and length.
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buffer.len() {
        for separator in [&b"\r\n\r\n"[..], b"\n\n", b"\r\r"] {
            if buffer[i..].starts_with(separator) {
                return Some((i, separator.len()));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let endpoint = Url::parse("http://example.com/bayeux/").unwrap();
        assert_eq!(
            stream_url(&endpoint, "abc123").as_str(),
            "http://example.com/bayeux/abc123"
        );
    }

    #[test]
    fn test_parser_splits_events() {
        let mut parser = SseParser::default();
        parser.feed(b": comment\n\ndata: [{\"channel\":\"/a\"}]\n\nda");
        assert_eq!(parser.next_event().as_deref(), Some("[{\"channel\":\"/a\"}]"));
        assert_eq!(parser.next_event(), None);

        parser.feed(b"ta: [1]\r\n\r\n");
        assert_eq!(parser.next_event().as_deref(), Some("[1]"));
    }

    #[test]
    fn test_parser_joins_data_lines() {
        let mut parser = SseParser::default();
        parser.feed(b"event: message\ndata: [\ndata: 2]\nid: 9\n\n");
        assert_eq!(parser.next_event().as_deref(), Some("[\n2]"));
    }

    #[tokio::test]
    async fn test_unusable_without_client_id() {
        let factory = EventSourceFactory::new(reqwest::Client::new());
        let endpoint = Url::parse("http://example.com/bayeux").unwrap();
        assert!(!factory.is_usable(&endpoint, &TransportContext::default()).await);
    }
}
