//! Encodings for message batches.
//!
//! Every transport carries a JSON array of messages. HTTP transports wrap
//! the array differently:
//!
//! - POST bodies are `message=<urlencoded JSON>`
//! - callback-polling GETs add a `jsonp=<callback>` parameter and receive
//!   `<callback>([...]);` back

use thiserror::Error;

use crate::message::Message;

/// Default upper bound for a single HTTP request, in bytes.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 2048;

/// Errors that can occur while encoding or decoding batches.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization or parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSONP response did not invoke the expected callback.
    #[error("Invalid JSONP response: expected callback {0}")]
    InvalidJsonp(String),
}

/// Encode a batch of messages as a JSON array.
///
/// # Errors
///
/// Returns an error if a message cannot be serialized.
pub fn encode(messages: &[Message]) -> Result<String, CodecError> {
    Ok(serde_json::to_string(messages)?)
}

/// Decode a reply body into messages.
///
/// Routers send an array, but a single object is accepted too.
///
/// # Errors
///
/// Returns an error if the text is not a message or an array of messages.
pub fn decode(text: &str) -> Result<Vec<Message>, CodecError> {
    let text = text.trim();
    if text.starts_with('{') {
        return Ok(vec![serde_json::from_str(text)?]);
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a batch as an `application/x-www-form-urlencoded` body.
///
/// # Errors
///
/// Returns an error if a message cannot be serialized.
pub fn encode_form(messages: &[Message]) -> Result<String, CodecError> {
    let json = encode(messages)?;
    Ok(format!("message={}", urlencoding::encode(&json)))
}

/// Encode a batch as the query string of a callback-polling request.
///
/// # Errors
///
/// Returns an error if a message cannot be serialized.
pub fn encode_jsonp_query(messages: &[Message], callback: &str) -> Result<String, CodecError> {
    let json = encode(messages)?;
    Ok(format!(
        "message={}&jsonp={}",
        urlencoding::encode(&json),
        urlencoding::encode(callback)
    ))
}

/// Decode a callback-polling reply of the form `<callback>([...]);`.
///
/// A leading `/**/` guard comment is ignored.
///
/// # Errors
///
/// Returns an error if the body does not invoke `callback` or its argument
/// is not a message batch.
pub fn decode_jsonp(body: &str, callback: &str) -> Result<Vec<Message>, CodecError> {
    let body = body.trim();
    let body = body.strip_prefix("/**/").unwrap_or(body).trim_start();
    let body = body.strip_suffix(';').unwrap_or(body).trim_end();

    let args = body
        .strip_prefix(callback)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| CodecError::InvalidJsonp(callback.to_string()))?;

    decode(args)
}
