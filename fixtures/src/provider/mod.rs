// File: fixtures/src/provider/mod.rs
//
// Provider Abstraction
//
// Request/response access to the execution environment. The snapshot and
// fixture layers only ever see `dyn Provider`, so the same code runs against
// a real node over HTTP or the in-process `TestNode`.

/// JSON-RPC over HTTP
pub mod http;
/// In-process node for tests that do not need a real RPC server
pub mod node;

pub use http::{HttpProvider, HttpProviderConfig};
pub use node::TestNode;

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::Value;

/// Request/response access to an execution environment.
///
/// Implementations are stateless wrappers around one transport: they send a
/// single request and return its result. Errors are reported as
/// [`ProviderError`] and are never retried by the callers in this crate.
///
/// # Example
///
/// ```rust,ignore
/// let provider: Arc<dyn Provider> = Arc::new(HttpProvider::new("http://127.0.0.1:8545")?);
/// let height = provider.request("eth_blockNumber", json!([])).await?;
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send `method` with `params` and return the raw result value.
    ///
    /// `params` is passed through as-is; use `Value::Null` or an empty array
    /// for methods without parameters.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
}

/// Encode an integer as an Ethereum JSON-RPC quantity (`0x`-prefixed, no leading zeros)
pub fn to_rpc_quantity(value: u64) -> String {
    format!("{:#x}", value)
}

/// Decode an Ethereum JSON-RPC quantity returned by `method`
pub fn parse_rpc_quantity(method: &str, value: &Value) -> Result<u64, ProviderError> {
    let raw = value
        .as_str()
        .ok_or_else(|| ProviderError::malformed(method, format!("expected hex quantity, got {}", value)))?;

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ProviderError::malformed(method, format!("quantity '{}' is missing 0x prefix", raw)))?;

    if digits.is_empty() {
        return Err(ProviderError::malformed(method, "empty quantity"));
    }

    u64::from_str_radix(digits, 16)
        .map_err(|e| ProviderError::malformed(method, format!("invalid quantity '{}': {}", raw, e)))
}
