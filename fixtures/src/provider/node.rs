//! TestNode - in-process execution environment for tests
//!
//! Implements [`Provider`] on top of a small in-memory chain model (block
//! height, block timestamps, account balances) with the node's snapshot stack
//! semantics: snapshot ids are issued in increasing order, and reverting to a
//! snapshot restores its state and discards it together with every snapshot
//! taken after it. Reverting to an unknown id answers `false`.
//!
//! The node also lets tests inject faults that a real node produces only
//! under duress: an out-of-band reset of the snapshot stack and one-shot
//! transport failures.

use crate::error::ProviderError;
use crate::provider::{parse_rpc_quantity, to_rpc_quantity, Provider};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Genesis timestamp used by [`TestNode::new`]
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_700_000_000;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone)]
struct ChainState {
    /// Timestamp of every block, indexed by height (genesis at 0)
    timestamps: Vec<u64>,
    next_timestamp: Option<u64>,
    balances: HashMap<String, u64>,
}

impl ChainState {
    fn new(genesis_timestamp: u64) -> Self {
        Self {
            timestamps: vec![genesis_timestamp],
            next_timestamp: None,
            balances: HashMap::new(),
        }
    }

    fn height(&self) -> u64 {
        (self.timestamps.len() - 1) as u64
    }

    fn latest_timestamp(&self) -> u64 {
        self.timestamps[self.timestamps.len() - 1]
    }

    /// Append `blocks` blocks; `None` if a timestamp would overflow, in
    /// which case nothing is mined
    fn mine(&mut self, blocks: u64, interval: u64) -> Option<()> {
        let mut mined = Vec::new();
        let mut previous = self.latest_timestamp();
        for i in 0..blocks {
            let timestamp = match self.next_timestamp {
                Some(ts) if i == 0 => ts,
                _ => previous.checked_add(interval)?,
            };
            mined.push(timestamp);
            previous = timestamp;
        }
        self.next_timestamp = None;
        self.timestamps.extend(mined);
        Some(())
    }
}

struct NodeInner {
    genesis_timestamp: u64,
    state: ChainState,
    snapshots: Vec<(u64, ChainState)>,
    next_snapshot_id: u64,
    request_counts: HashMap<String, u64>,
    fail_next: HashSet<String>,
}

/// In-process node answering the RPC methods used by this crate
///
/// # Example
///
/// ```rust,ignore
/// let node = Arc::new(TestNode::new());
/// let mut restorer = take_snapshot(node.clone()).await?;
/// mine(node.as_ref(), 5).await?;
/// restorer.restore().await?;
/// assert_eq!(node.block_number(), 0);
/// ```
pub struct TestNode {
    inner: Mutex<NodeInner>,
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNode {
    /// Create a node at height 0 with [`DEFAULT_GENESIS_TIMESTAMP`]
    pub fn new() -> Self {
        Self::with_genesis_timestamp(DEFAULT_GENESIS_TIMESTAMP)
    }

    /// Create a node at height 0 whose genesis block has `timestamp`
    pub fn with_genesis_timestamp(timestamp: u64) -> Self {
        Self {
            inner: Mutex::new(NodeInner {
                genesis_timestamp: timestamp,
                state: ChainState::new(timestamp),
                snapshots: Vec::new(),
                next_snapshot_id: 1,
                request_counts: HashMap::new(),
                fail_next: HashSet::new(),
            }),
        }
    }

    // ========================================================================
    // Direct state access (for assertions)
    // ========================================================================

    /// Current block height
    pub fn block_number(&self) -> u64 {
        self.inner.lock().state.height()
    }

    /// Timestamp of the latest block
    pub fn latest_timestamp(&self) -> u64 {
        self.inner.lock().state.latest_timestamp()
    }

    /// Balance of `address` (0 if never set)
    pub fn balance(&self, address: &str) -> u64 {
        let inner = self.inner.lock();
        inner
            .state
            .balances
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Number of live snapshots on the node's stack
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    /// How many times `method` has been requested
    pub fn request_count(&self, method: &str) -> u64 {
        self.inner
            .lock()
            .request_counts
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Drop every snapshot without touching chain state
    ///
    /// Simulates the node being reset or restarted outside the test process:
    /// every previously issued snapshot id becomes unknown.
    pub fn invalidate_snapshots(&self) {
        let mut inner = self.inner.lock();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("TestNode: invalidating {} snapshots", inner.snapshots.len());
        }
        inner.snapshots.clear();
    }

    /// Return the node to its genesis state and drop every snapshot
    ///
    /// Snapshot ids keep increasing across resets, as they do on a real node
    /// that is reset via RPC.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = ChainState::new(inner.genesis_timestamp);
        inner.snapshots.clear();
    }

    /// Make the next request for `method` fail with a transport error
    pub fn fail_next(&self, method: &str) {
        self.inner.lock().fail_next.insert(method.to_string());
    }

    fn handle(inner: &mut NodeInner, method: &str, params: &Value) -> Result<Value, ProviderError> {
        match method {
            "evm_snapshot" => {
                let id = inner.next_snapshot_id;
                inner.next_snapshot_id += 1;
                let state = inner.state.clone();
                inner.snapshots.push((id, state));
                Ok(json!(to_rpc_quantity(id)))
            }
            "evm_revert" => {
                let id = snapshot_id_param(method, params)?;
                match inner.snapshots.iter().position(|(sid, _)| *sid == id) {
                    Some(pos) => {
                        inner.state = inner.snapshots[pos].1.clone();
                        inner.snapshots.truncate(pos);
                        Ok(json!(true))
                    }
                    None => Ok(json!(false)),
                }
            }
            "eth_blockNumber" => Ok(json!(to_rpc_quantity(inner.state.height()))),
            "eth_getBlockByNumber" => {
                let tag = param(params, 0).unwrap_or(&Value::Null);
                let height = match tag.as_str() {
                    Some("latest") | Some("pending") | None => inner.state.height(),
                    Some("earliest") => 0,
                    Some(_) => parse_rpc_quantity(method, tag).map_err(|e| invalid_params(method, e))?,
                };
                match inner.state.timestamps.get(height as usize) {
                    Some(timestamp) => Ok(json!({
                        "number": to_rpc_quantity(height),
                        "timestamp": to_rpc_quantity(*timestamp),
                    })),
                    None => Ok(Value::Null),
                }
            }
            "evm_setNextBlockTimestamp" => {
                let timestamp = quantity_param(method, params, 0)?
                    .ok_or_else(|| invalid_params(method, "missing timestamp"))?;
                let latest = inner.state.latest_timestamp();
                if timestamp <= latest {
                    return Err(ProviderError::Rpc {
                        method: method.to_string(),
                        code: INVALID_PARAMS,
                        message: format!(
                            "Timestamp {} is lower than or equal to previous block's timestamp {}",
                            timestamp, latest
                        ),
                        data: None,
                    });
                }
                inner.state.next_timestamp = Some(timestamp);
                Ok(Value::Null)
            }
            "hardhat_mine" => {
                let blocks = quantity_param(method, params, 0)?.unwrap_or(1);
                let interval = quantity_param(method, params, 1)?.unwrap_or(1);
                if interval == 0 {
                    return Err(invalid_params(method, "interval must be positive"));
                }
                inner
                    .state
                    .mine(blocks, interval)
                    .ok_or_else(|| invalid_params(method, "block timestamp overflow"))?;
                Ok(json!(true))
            }
            "eth_getBalance" => {
                let address = address_param(method, params)?;
                let balance = inner.state.balances.get(&address).copied().unwrap_or(0);
                Ok(json!(to_rpc_quantity(balance)))
            }
            "hardhat_setBalance" => {
                let address = address_param(method, params)?;
                let balance = quantity_param(method, params, 1)?
                    .ok_or_else(|| invalid_params(method, "missing balance"))?;
                inner.state.balances.insert(address, balance);
                Ok(json!(true))
            }
            _ => Err(ProviderError::Rpc {
                method: method.to_string(),
                code: METHOD_NOT_FOUND,
                message: format!("Method {} is not supported", method),
                data: None,
            }),
        }
    }
}

fn param(params: &Value, index: usize) -> Option<&Value> {
    params.as_array().and_then(|p| p.get(index)).filter(|v| !v.is_null())
}

fn invalid_params(method: &str, reason: impl ToString) -> ProviderError {
    ProviderError::Rpc {
        method: method.to_string(),
        code: INVALID_PARAMS,
        message: reason.to_string(),
        data: None,
    }
}

fn quantity_param(method: &str, params: &Value, index: usize) -> Result<Option<u64>, ProviderError> {
    match param(params, index) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid_params(method, format!("invalid quantity {}", n))),
        Some(v) => parse_rpc_quantity(method, v)
            .map(Some)
            .map_err(|e| invalid_params(method, e)),
    }
}

fn snapshot_id_param(method: &str, params: &Value) -> Result<u64, ProviderError> {
    quantity_param(method, params, 0)?.ok_or_else(|| invalid_params(method, "missing snapshot id"))
}

fn address_param(method: &str, params: &Value) -> Result<String, ProviderError> {
    param(params, 0)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .ok_or_else(|| invalid_params(method, "missing address"))
}

#[async_trait]
impl Provider for TestNode {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let mut inner = self.inner.lock();
        *inner.request_counts.entry(method.to_string()).or_insert(0) += 1;

        if inner.fail_next.remove(method) {
            return Err(ProviderError::transport(method, "injected failure"));
        }

        Self::handle(&mut inner, method, &params)
    }
}
