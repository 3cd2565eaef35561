//! Client metrics.
//!
//! Uses the `metrics` crate for instrumentation. No exporter is installed
//! here; applications install the recorder of their choice.

use metrics::{counter, gauge};
use tracing::debug;

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT: &str = "bayeux_messages_sent_total";
    pub const MESSAGES_RECEIVED: &str = "bayeux_messages_received_total";
    pub const RETRIES: &str = "bayeux_retries_total";
    pub const ABORTED: &str = "bayeux_aborted_total";
    pub const TRANSPORT_UP: &str = "bayeux_transport_up";
    pub const HANDSHAKES: &str = "bayeux_handshakes_total";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "bayeux_channels_active";
}

/// Describe the client metrics.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_SENT, "Total number of messages sent");
    metrics::describe_counter!(names::MESSAGES_RECEIVED, "Total number of messages received");
    metrics::describe_counter!(names::RETRIES, "Total number of failed attempts");
    metrics::describe_counter!(
        names::ABORTED,
        "Total number of messages dropped after their last attempt"
    );
    metrics::describe_gauge!(names::TRANSPORT_UP, "1 while the transport is up, 0 when down");
    metrics::describe_counter!(names::HANDSHAKES, "Total number of handshakes by outcome");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channels with local subscriptions"
    );

    debug!("Metrics initialized");
}

fn class(channel: &str) -> &'static str {
    if bayeux_protocol::channel::is_meta(channel) {
        "meta"
    } else if bayeux_protocol::channel::is_service(channel) {
        "service"
    } else {
        "data"
    }
}

/// Record a message handed to a transport.
pub fn record_sent(channel: &str) {
    counter!(names::MESSAGES_SENT, "class" => class(channel)).increment(1);
}

/// Record a message received from a transport.
pub fn record_received(channel: &str) {
    counter!(names::MESSAGES_RECEIVED, "class" => class(channel)).increment(1);
}

/// Record a failed attempt.
pub fn record_retry() {
    counter!(names::RETRIES).increment(1);
}

/// Record an aborted message.
pub fn record_aborted() {
    counter!(names::ABORTED).increment(1);
}

/// Record the transport going up or down.
pub fn set_transport_up(up: bool) {
    gauge!(names::TRANSPORT_UP).set(if up { 1.0 } else { 0.0 });
}

/// Record a handshake outcome.
pub fn record_handshake(successful: bool) {
    let outcome = if successful { "success" } else { "failure" };
    counter!(names::HANDSHAKES, "outcome" => outcome).increment(1);
}

/// Update the number of subscribed channels.
pub fn set_active_channels(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}
