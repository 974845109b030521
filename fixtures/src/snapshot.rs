// File: fixtures/src/snapshot.rs
//
// Snapshot Primitive
//
// Wraps the node's `evm_snapshot` / `evm_revert` pair into a reusable
// restorer. A restorer is always either ready (holding a live snapshot id)
// or broken (its id was rejected or consumed without a replacement).

use crate::error::{InvalidSnapshotError, ProviderError, SnapshotError};
use crate::provider::Provider;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// RPC method creating a snapshot of the current state
pub const SNAPSHOT_METHOD: &str = "evm_snapshot";
/// RPC method reverting to a snapshot id
pub const REVERT_METHOD: &str = "evm_revert";

/// Opaque snapshot id issued by the node
///
/// Nodes return either a hex string or a number; the value is passed back
/// verbatim and never interpreted.
#[derive(Debug, Clone, PartialEq)]
struct SnapshotId(Value);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

async fn create_snapshot(provider: &dyn Provider) -> Result<SnapshotId, ProviderError> {
    let id = provider.request(SNAPSHOT_METHOD, Value::Null).await?;
    match id {
        Value::String(_) | Value::Number(_) => Ok(SnapshotId(id)),
        other => Err(ProviderError::malformed(
            SNAPSHOT_METHOD,
            format!("expected snapshot id, got {}", other),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestorerState {
    Ready,
    Broken,
}

/// Handle for returning the node to a previously captured state
///
/// Created by [`take_snapshot`]. Every successful [`restore`](Self::restore)
/// immediately takes a fresh snapshot of the restored state, so the same
/// restorer can be used any number of times.
///
/// # Example
///
/// ```rust,ignore
/// let mut snapshot = take_snapshot(provider.clone()).await?;
///
/// // ... change the node's state ...
///
/// snapshot.restore().await?;
/// ```
pub struct SnapshotRestorer {
    provider: Arc<dyn Provider>,
    snapshot_id: SnapshotId,
    state: RestorerState,
}

impl fmt::Debug for SnapshotRestorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotRestorer")
            .field("snapshot_id", &self.snapshot_id)
            .field("state", &self.state)
            .finish()
    }
}

impl SnapshotRestorer {
    /// Reset the node to the state captured by this restorer
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::InvalidSnapshot`] if the node no longer knows the
    ///   snapshot (it was consumed elsewhere or the node was reset). The
    ///   restorer is broken afterwards and every further call fails the same
    ///   way without contacting the node.
    /// - [`SnapshotError::Provider`] for transport failures and malformed
    ///   responses, unchanged. A failure of the revert request itself leaves
    ///   the restorer usable; a failure of the re-arming snapshot breaks it,
    ///   since its id has already been consumed.
    pub async fn restore(&mut self) -> Result<(), SnapshotError> {
        if self.state == RestorerState::Broken {
            return Err(InvalidSnapshotError.into());
        }

        let reverted = self
            .provider
            .request(REVERT_METHOD, json!([self.snapshot_id.0]))
            .await?;

        let reverted = reverted.as_bool().ok_or_else(|| {
            ProviderError::malformed(REVERT_METHOD, format!("expected boolean, got {}", reverted))
        })?;

        if !reverted {
            log::warn!("Snapshot {} was rejected by the node", self.snapshot_id);
            self.state = RestorerState::Broken;
            return Err(InvalidSnapshotError.into());
        }

        // Re-take the snapshot so that `restore` can be called again
        match create_snapshot(self.provider.as_ref()).await {
            Ok(id) => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("Restored snapshot {}, re-armed as {}", self.snapshot_id, id);
                }
                self.snapshot_id = id;
                Ok(())
            }
            Err(e) => {
                self.state = RestorerState::Broken;
                Err(e.into())
            }
        }
    }

    /// Whether this restorer can still be restored
    pub fn is_valid(&self) -> bool {
        self.state == RestorerState::Ready
    }
}

/// Take a snapshot of the node's current state
///
/// # Errors
///
/// Transport failures and malformed responses from `evm_snapshot` are
/// returned unchanged.
pub async fn take_snapshot(provider: Arc<dyn Provider>) -> Result<SnapshotRestorer, ProviderError> {
    let snapshot_id = create_snapshot(provider.as_ref()).await?;

    if log::log_enabled!(log::Level::Debug) {
        log::debug!("Took snapshot {}", snapshot_id);
    }

    Ok(SnapshotRestorer {
        provider,
        snapshot_id,
        state: RestorerState::Ready,
    })
}
