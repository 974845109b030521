//! JSON-RPC 2.0 provider over HTTP
//!
//! Single-shot requests, no retries: replaying `evm_snapshot` or `evm_revert`
//! after an ambiguous failure would change which state the node is in.

use crate::error::ProviderError;
use crate::provider::Provider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// Default node endpoint (local hardhat/anvil style node)
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Environment variable overriding the node endpoint
pub const RPC_URL_ENV: &str = "TOS_FIXTURES_RPC_URL";
/// Environment variable overriding the request timeout (milliseconds)
pub const REQUEST_TIMEOUT_ENV: &str = "TOS_FIXTURES_REQUEST_TIMEOUT_MS";
/// Environment variable overriding the connect timeout (milliseconds)
pub const CONNECT_TIMEOUT_ENV: &str = "TOS_FIXTURES_CONNECT_TIMEOUT_MS";

const JSON_RPC_VERSION: &str = "2.0";

/// Configuration for [`HttpProvider`]
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Node endpoint; `http://` is assumed when the scheme is missing
    pub url: String,
    /// Upper bound for a whole request, response body included
    pub request_timeout: Duration,
    /// Upper bound for establishing the TCP/TLS connection
    pub connect_timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpProviderConfig {
    /// Build a configuration from defaults overridden by environment variables
    ///
    /// Reads `TOS_FIXTURES_RPC_URL`, `TOS_FIXTURES_REQUEST_TIMEOUT_MS` and
    /// `TOS_FIXTURES_CONNECT_TIMEOUT_MS`. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if a timeout variable is not a
    /// number of milliseconds.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(RPC_URL_ENV) {
            config.url = url;
        }
        if let Some(raw) = lookup(REQUEST_TIMEOUT_ENV) {
            config.request_timeout = parse_millis(REQUEST_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(CONNECT_TIMEOUT_ENV) {
            config.connect_timeout = parse_millis(CONNECT_TIMEOUT_ENV, &raw)?;
        }

        Ok(config)
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ProviderError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ProviderError::Config(format!("{}='{}': {}", key, raw, e)))
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Node client speaking JSON-RPC 2.0 over HTTP POST
pub struct HttpProvider {
    client: Client,
    url: Url,
    next_id: AtomicU64,
}

impl HttpProvider {
    /// Create a provider for `address` with default timeouts
    ///
    /// `address` may omit the scheme, in which case `http://` is assumed.
    pub fn new(address: &str) -> Result<Self, ProviderError> {
        Self::with_config(HttpProviderConfig {
            url: address.to_string(),
            ..HttpProviderConfig::default()
        })
    }

    /// Create a provider from environment configuration
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::with_config(HttpProviderConfig::from_env()?)
    }

    /// Create a provider with an explicit configuration
    pub fn with_config(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let url = parse_url(&config.url)?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint this provider posts to
    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn parse_url(address: &str) -> Result<Url, ProviderError> {
    let address = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    Url::parse(&address).map_err(|e| ProviderError::Config(format!("invalid RPC url '{}': {}", address, e)))
}

fn decode_response(method: &str, response: JsonRpcResponse) -> Result<Value, ProviderError> {
    if let Some(error) = response.error {
        return Err(ProviderError::Rpc {
            method: method.to_string(),
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    // A JSON `null` result deserializes to `None`; it is a valid result for
    // methods such as `evm_setNextBlockTimestamp` on some nodes.
    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let request = JsonRpcRequest {
            jsonrpc: JSON_RPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("-> {} {}", self.url, serde_json::to_string(&request)?);
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::transport(method, format!("request timed out: {}", e))
                } else if e.is_connect() {
                    ProviderError::transport(method, format!("connection failed: {}", e))
                } else {
                    ProviderError::transport(method, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::transport(
                method,
                format!(
                    "HTTP error {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
            ));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(method, format!("failed to parse JSON response: {}", e)))?;

        let result = decode_response(method, body);
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("<- {} {:?}", method, result);
        }
        result
    }
}
