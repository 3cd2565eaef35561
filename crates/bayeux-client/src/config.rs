//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`BAYEUX_*`)
//! - TOML configuration file
//! - Command line arguments (the `bayeux` binary)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use url::Url;

use bayeux_protocol::ConnectionType;
use bayeux_transport::TransportContext;

use crate::error::ClientError;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Router endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay before retrying a failed request or handshake, in seconds.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Reply timeout used until the server sends advice, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between connect requests used until the server sends advice,
    /// in milliseconds.
    #[serde(default)]
    pub interval_ms: u64,

    /// Upper bound for a single HTTP request, in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Connection types never to negotiate.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Extra headers sent with every HTTP request and WebSocket upgrade.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Alternate endpoints keyed by connection type name.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    /// Origin the client runs on, used to tell cross-origin endpoints apart.
    #[serde(default)]
    pub origin: Option<String>,

    /// WebSocket keep-alive interval in seconds. Defaults to half the reply
    /// timeout.
    #[serde(default)]
    pub websocket_ping: Option<u64>,
}

// Default value functions
fn default_endpoint() -> String {
    std::env::var("BAYEUX_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8000/bayeux".to_string())
}

fn default_retry_secs() -> u64 {
    std::env::var("BAYEUX_RETRY")
        .ok()
        .and_then(|r| r.parse().ok())
        .unwrap_or(5)
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_request_size() -> usize {
    bayeux_protocol::codec::DEFAULT_MAX_REQUEST_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            retry_secs: default_retry_secs(),
            timeout_secs: default_timeout_secs(),
            interval_ms: 0,
            max_request_size: default_max_request_size(),
            disabled: Vec::new(),
            headers: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            origin: None,
            websocket_ping: None,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for an endpoint with default settings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, ClientError> {
        let config_paths = [
            "bayeux.toml",
            "/etc/bayeux/bayeux.toml",
            "~/.config/bayeux/bayeux.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Get the retry interval.
    #[must_use]
    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    /// Parse the router endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL.
    pub fn endpoint_url(&self) -> Result<Url, ClientError> {
        Url::parse(&self.endpoint)
            .map_err(|e| ClientError::Config(format!("Invalid endpoint {}: {e}", self.endpoint)))
    }

    /// Build the settings shared by every transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin, an alternate endpoint or its
    /// connection type cannot be parsed.
    pub fn transport_context(&self) -> Result<TransportContext, ClientError> {
        let origin = self
            .origin
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| ClientError::Config(format!("Invalid origin: {e}")))?;

        let mut endpoints = HashMap::new();
        for (name, endpoint) in &self.endpoints {
            let connection_type: ConnectionType = name.parse().map_err(ClientError::Config)?;
            let url = Url::parse(endpoint)
                .map_err(|e| ClientError::Config(format!("Invalid endpoint for {name}: {e}")))?;
            endpoints.insert(connection_type, url);
        }

        let ping = self
            .websocket_ping
            .unwrap_or(self.timeout_secs / 2)
            .max(1);

        Ok(TransportContext {
            headers: self.headers.clone(),
            origin,
            client_id: None,
            endpoints,
            max_request_size: self.max_request_size,
            ping_interval: Some(Duration::from_secs(ping)),
            ..TransportContext::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::new("http://localhost/bayeux");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.interval_ms, 0);
        assert_eq!(config.max_request_size, 2048);
        assert!(config.disabled.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            endpoint = "https://push.example.com/bayeux"
            retry_secs = 2
            disabled = ["websocket"]
            origin = "https://app.example.com"

            [headers]
            Authorization = "Bearer abc"

            [endpoints]
            websocket = "wss://ws.example.com/bayeux"
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry(), Duration::from_secs(2));
        assert_eq!(config.disabled, vec!["websocket"]);

        let ctx = config.transport_context().unwrap();
        assert_eq!(ctx.headers["Authorization"], "Bearer abc");
        assert_eq!(
            ctx.endpoints[&ConnectionType::WebSocket].as_str(),
            "wss://ws.example.com/bayeux"
        );
        assert_eq!(ctx.ping_interval, Some(Duration::from_secs(30)));
        assert!(ctx.is_cross_origin(&config.endpoint_url().unwrap()));
    }

    #[test]
    fn test_unknown_endpoint_type_rejected() {
        let mut config = ClientConfig::new("http://localhost/bayeux");
        config
            .endpoints
            .insert("pigeon".to_string(), "http://localhost".to_string());
        assert!(matches!(
            config.transport_context(),
            Err(ClientError::Config(_))
        ));
    }
}
