//! # bayeux-protocol
//!
//! Wire protocol definitions for the Bayeux publish/subscribe client.
//!
//! This crate defines the JSON messages exchanged with a Bayeux message
//! router, the channel naming rules, the structured error format and the
//! encodings used by the different transports.
//!
//! ## Meta channels
//!
//! - `/meta/handshake` - Negotiate a client ID and connection types
//! - `/meta/connect` - Long-held request used as the server push vehicle
//! - `/meta/subscribe` / `/meta/unsubscribe` - Channel membership
//! - `/meta/disconnect` - End the session
//!
//! ## Example
//!
//! ```rust
//! use bayeux_protocol::{codec, Message};
//!
//! let message = Message::publish("/chat/lobby", serde_json::json!({"text": "hi"}));
//!
//! let encoded = codec::encode(&[message.clone()]).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded, vec![message]);
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;
pub mod version;

pub use codec::{decode, encode, CodecError};
pub use error::{BayeuxError, ErrorCode};
pub use message::{Advice, ChannelList, Message, Reconnect};
pub use version::{ConnectionType, BAYEUX_VERSION, MANDATORY_CONNECTION_TYPES};
