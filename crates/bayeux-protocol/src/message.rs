//! Bayeux message types.
//!
//! Every exchange with the router is a JSON object carrying at least a
//! `channel`. A message with a `successful` field is a response; one without
//! it is a request or a delivered event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel;
use crate::error::BayeuxError;
use crate::version::BAYEUX_VERSION;

/// Server reconnection policy carried in [`Advice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Re-issue `/meta/connect` after the advised interval.
    #[default]
    Retry,
    /// Drop the client ID and start a new handshake.
    Handshake,
    /// Stop reconnecting altogether.
    None,
}

/// Server-supplied reconnection advice.
///
/// Only the fields the server sends are present; receivers merge them into
/// the state they already hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Reconnection policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    /// Delay before the next connect, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// How long the server may hold a connect request, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// One channel or a list of channels.
///
/// The `subscription` field of subscribe responses may carry either form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelList {
    /// A single channel name.
    One(String),
    /// Several channel names.
    Many(Vec<String>),
}

impl ChannelList {
    /// Get the channel names as a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ChannelList::One(name) => vec![name.clone()],
            ChannelList::Many(names) => names.clone(),
        }
    }

    /// Iterate over the channel names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let names: &[String] = match self {
            ChannelList::One(name) => std::slice::from_ref(name),
            ChannelList::Many(names) => names,
        };
        names.iter().map(String::as_str)
    }

    /// Check whether the list names no channel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, ChannelList::Many(names) if names.is_empty())
    }
}

impl From<&str> for ChannelList {
    fn from(s: &str) -> Self {
        ChannelList::One(s.to_string())
    }
}

impl From<String> for ChannelList {
    fn from(s: String) -> Self {
        ChannelList::One(s)
    }
}

impl From<Vec<String>> for ChannelList {
    fn from(v: Vec<String>) -> Self {
        ChannelList::Many(v)
    }
}

impl From<Vec<&str>> for ChannelList {
    fn from(v: Vec<&str>) -> Self {
        ChannelList::Many(v.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for ChannelList {
    fn from(v: &[&str]) -> Self {
        ChannelList::Many(v.iter().map(|s| (*s).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ChannelList {
    fn from(v: [&str; N]) -> Self {
        ChannelList::Many(v.iter().map(|s| (*s).to_string()).collect())
    }
}

/// A Bayeux protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Channel the message is addressed to.
    pub channel: String,
    /// Request identifier echoed by the matching response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client identifier assigned by the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Channels named by a subscribe or unsubscribe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ChannelList>,
    /// Outcome of a request; present only on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    /// Colon-delimited error string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reconnection advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Connection types offered during the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    /// Connection type used by a connect request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Protocol version sent with the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Extension payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

impl Message {
    /// Create a bare message on a channel.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Create a `/meta/handshake` request.
    #[must_use]
    pub fn handshake(supported_connection_types: Vec<String>) -> Self {
        Self {
            channel: channel::HANDSHAKE.to_string(),
            version: Some(BAYEUX_VERSION.to_string()),
            supported_connection_types: Some(supported_connection_types),
            ..Default::default()
        }
    }

    /// Create a `/meta/connect` request.
    #[must_use]
    pub fn connect(client_id: impl Into<String>, connection_type: impl Into<String>) -> Self {
        Self {
            channel: channel::CONNECT.to_string(),
            client_id: Some(client_id.into()),
            connection_type: Some(connection_type.into()),
            ..Default::default()
        }
    }

    /// Create a `/meta/subscribe` request.
    #[must_use]
    pub fn subscribe(client_id: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            channel: channel::SUBSCRIBE.to_string(),
            client_id: Some(client_id.into()),
            subscription: Some(ChannelList::One(subscription.into())),
            ..Default::default()
        }
    }

    /// Create a `/meta/unsubscribe` request.
    #[must_use]
    pub fn unsubscribe(client_id: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            channel: channel::UNSUBSCRIBE.to_string(),
            client_id: Some(client_id.into()),
            subscription: Some(ChannelList::One(subscription.into())),
            ..Default::default()
        }
    }

    /// Create a `/meta/disconnect` request.
    #[must_use]
    pub fn disconnect(client_id: impl Into<String>) -> Self {
        Self {
            channel: channel::DISCONNECT.to_string(),
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    /// Create a data message for an application channel.
    #[must_use]
    pub fn publish(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Set the client ID.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the message ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the extension payload.
    #[must_use]
    pub fn with_ext(mut self, ext: Value) -> Self {
        self.ext = Some(ext);
        self
    }

    /// Check if this message is a response (carries `successful`).
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.successful.is_some()
    }

    /// Check if this message is a successful response.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// Check if this message travels on a `/meta/` channel.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        channel::is_meta(&self.channel)
    }

    /// Parse the `error` field into a structured error.
    ///
    /// Returns `None` when the message carries no error string.
    #[must_use]
    pub fn parsed_error(&self) -> Option<BayeuxError> {
        self.error.as_deref().map(BayeuxError::parse)
    }
}
