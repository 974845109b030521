//! Block timestamp helpers

use super::{assert_positive, mine};
use crate::error::{HelperError, ProviderError};
use crate::provider::{parse_rpc_quantity, to_rpc_quantity, Provider};
use serde_json::{json, Value};

const GET_BLOCK_METHOD: &str = "eth_getBlockByNumber";

/// Returns the timestamp of the latest block
pub async fn latest<P>(provider: &P) -> Result<u64, ProviderError>
where
    P: Provider + ?Sized,
{
    let block = provider
        .request(GET_BLOCK_METHOD, json!(["latest", false]))
        .await?;

    match block.get("timestamp") {
        Some(timestamp) => parse_rpc_quantity(GET_BLOCK_METHOD, timestamp),
        None if block == Value::Null => Err(ProviderError::malformed(GET_BLOCK_METHOD, "latest block not found")),
        None => Err(ProviderError::malformed(GET_BLOCK_METHOD, "block has no timestamp")),
    }
}

/// Mines a new block whose timestamp is `seconds` after the latest block's
///
/// Returns the timestamp of the mined block.
///
/// # Example
///
/// ```rust,ignore
/// // advance time by one hour and mine a new block
/// let now = time::increase(provider.as_ref(), 3600).await?;
/// ```
///
/// # Errors
///
/// Returns [`HelperError::InvalidInput`] if `seconds` is zero.
pub async fn increase<P>(provider: &P, seconds: u64) -> Result<u64, HelperError>
where
    P: Provider + ?Sized,
{
    assert_positive("seconds", seconds)?;

    let target = latest(provider)
        .await?
        .checked_add(seconds)
        .ok_or_else(|| HelperError::InvalidInput(format!("timestamp overflow adding {}s", seconds)))?;

    increase_to(provider, target).await
}

/// Mines a new block whose timestamp is `timestamp`
///
/// Returns the timestamp of the mined block. The node rejects timestamps that
/// are not after the latest block's; that rejection is returned unchanged.
pub async fn increase_to<P>(provider: &P, timestamp: u64) -> Result<u64, HelperError>
where
    P: Provider + ?Sized,
{
    provider
        .request("evm_setNextBlockTimestamp", json!([to_rpc_quantity(timestamp)]))
        .await?;

    mine(provider, 1).await?;

    Ok(latest(provider).await?)
}
