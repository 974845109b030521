// File: fixtures/src/helpers/mod.rs
//
// Block and Time Helpers
//
// One-shot wrappers around single node RPC calls. They hold no state and
// are independent of the snapshot and fixture layers; fixture routines use
// them to move the node into the state a test needs.

/// Block timestamp helpers
pub mod time;

use crate::error::{HelperError, ProviderError};
use crate::provider::{parse_rpc_quantity, to_rpc_quantity, Provider};
use serde_json::json;

/// Returns the number of the latest block
///
/// # Example
///
/// ```rust,ignore
/// let height = latest_block(provider.as_ref()).await?;
/// ```
pub async fn latest_block<P>(provider: &P) -> Result<u64, ProviderError>
where
    P: Provider + ?Sized,
{
    let height = provider.request("eth_blockNumber", json!([])).await?;
    parse_rpc_quantity("eth_blockNumber", &height)
}

/// Mines `blocks` blocks, one second apart
///
/// # Errors
///
/// Returns [`HelperError::InvalidInput`] if `blocks` is zero.
pub async fn mine<P>(provider: &P, blocks: u64) -> Result<(), HelperError>
where
    P: Provider + ?Sized,
{
    mine_with_interval(provider, blocks, 1).await
}

/// Mines `blocks` blocks whose timestamps are `interval` seconds apart
///
/// # Errors
///
/// Returns [`HelperError::InvalidInput`] if `blocks` or `interval` is zero.
pub async fn mine_with_interval<P>(provider: &P, blocks: u64, interval: u64) -> Result<(), HelperError>
where
    P: Provider + ?Sized,
{
    assert_positive("blocks", blocks)?;
    assert_positive("interval", interval)?;

    provider
        .request(
            "hardhat_mine",
            json!([to_rpc_quantity(blocks), to_rpc_quantity(interval)]),
        )
        .await?;

    if log::log_enabled!(log::Level::Debug) {
        log::debug!("Mined {} blocks (interval {}s)", blocks, interval);
    }

    Ok(())
}

pub(crate) fn assert_positive(what: &str, value: u64) -> Result<(), HelperError> {
    if value == 0 {
        return Err(HelperError::InvalidInput(format!(
            "expected a positive number for {} but 0 was given",
            what
        )));
    }
    Ok(())
}
