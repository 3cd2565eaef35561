//! Structured Bayeux errors.
//!
//! The router reports failures in the `error` field of a response as a
//! colon-delimited string: `<code>:<param>,<param>:<message>`.

use std::fmt;
use thiserror::Error;

/// Error codes defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    VersionMismatch = 300,
    ConnectionTypeMismatch = 301,
    ExtensionMismatch = 302,
    BadRequest = 400,
    ClientUnknown = 401,
    ParameterMissing = 402,
    ChannelForbidden = 403,
    ChannelUnknown = 404,
    ChannelInvalid = 405,
    ExtensionUnknown = 406,
    PublishFailed = 407,
    ServerError = 500,
}

impl ErrorCode {
    /// Look up a code by its numeric value.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        let code = match code {
            300 => ErrorCode::VersionMismatch,
            301 => ErrorCode::ConnectionTypeMismatch,
            302 => ErrorCode::ExtensionMismatch,
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::ClientUnknown,
            402 => ErrorCode::ParameterMissing,
            403 => ErrorCode::ChannelForbidden,
            404 => ErrorCode::ChannelUnknown,
            405 => ErrorCode::ChannelInvalid,
            406 => ErrorCode::ExtensionUnknown,
            407 => ErrorCode::PublishFailed,
            500 => ErrorCode::ServerError,
            _ => return None,
        };
        Some(code)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Get the standard human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            ErrorCode::VersionMismatch => "Version mismatch",
            ErrorCode::ConnectionTypeMismatch => "Connection types not supported",
            ErrorCode::ExtensionMismatch => "Extension mismatch",
            ErrorCode::BadRequest => "Bad request",
            ErrorCode::ClientUnknown => "Unknown client",
            ErrorCode::ParameterMissing => "Missing required parameter",
            ErrorCode::ChannelForbidden => "Forbidden channel",
            ErrorCode::ChannelUnknown => "Unknown channel",
            ErrorCode::ChannelInvalid => "Invalid channel",
            ErrorCode::ExtensionUnknown => "Unknown extension",
            ErrorCode::PublishFailed => "Failed to publish",
            ErrorCode::ServerError => "Internal server error",
        }
    }
}

/// A parsed Bayeux error.
///
/// Strings that do not follow the `code:params:message` grammar are kept
/// whole as the message with no code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct BayeuxError {
    /// Three-digit error code, if the string carried one.
    pub code: Option<u16>,
    /// Comma-separated parameters.
    pub params: Vec<String>,
    /// Human-readable message.
    pub message: String,
}

impl BayeuxError {
    /// Create an error from its parts.
    #[must_use]
    pub fn new(code: Option<u16>, params: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            params,
            message: message.into(),
        }
    }

    /// Create an error for a standard code with its standard message.
    #[must_use]
    pub fn from_code(code: ErrorCode, params: &[&str]) -> Self {
        Self::new(
            Some(code.code()),
            params.iter().map(|p| (*p).to_string()).collect(),
            code.description(),
        )
    }

    /// Parse an `error` field.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, ':');
        let (Some(code), Some(params), Some(message)) = (parts.next(), parts.next(), parts.next())
        else {
            return Self::new(None, Vec::new(), raw);
        };

        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Self::new(None, Vec::new(), raw);
        }

        let params = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').map(str::to_string).collect()
        };

        Self::new(code.parse().ok(), params, message)
    }

    /// Get the standard code, if recognised.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.code.and_then(ErrorCode::from_code)
    }
}

impl fmt::Display for BayeuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}:{}:{}", code, self.params.join(","), self.message),
            None => f.write_str(&self.message),
        }
    }
}
