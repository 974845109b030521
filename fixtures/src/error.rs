// File: fixtures/src/error.rs
//
// Error types shared by the provider, snapshot, fixture and helper modules.

use anyhow::Error as AnyError;
use serde_json::{Error as SerdeError, Value};
use thiserror::Error;

/// Errors raised while talking to the execution environment.
///
/// These are never caught or reinterpreted by the snapshot or fixture
/// layers: whatever the transport reports reaches the caller unchanged.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider could not be built from its configuration
    #[error("Invalid provider configuration: {}", _0)]
    Config(String),
    /// The request did not get a JSON-RPC answer (connection, timeout, HTTP status)
    #[error("Transport error on '{method}': {reason}")]
    Transport {
        /// RPC method being requested
        method: String,
        /// What went wrong
        reason: String,
    },
    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code} on '{method}': {message}")]
    Rpc {
        /// RPC method being requested
        method: String,
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the node
        message: String,
        /// Optional `data` member of the error object
        data: Option<Value>,
    },
    /// The node answered, but not with the expected shape
    #[error("Malformed response to '{method}': {reason}")]
    MalformedResponse {
        /// RPC method being requested
        method: String,
        /// What was wrong with the answer
        reason: String,
    },
    /// A request or response could not be (de)serialized
    #[error(transparent)]
    Serialization(#[from] SerdeError),
}

impl ProviderError {
    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(method: &str, reason: impl Into<String>) -> Self {
        Self::Transport {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// The environment rejected a revert request for a snapshot handle.
///
/// The handle was stale, already consumed, or the environment was reset
/// out-of-band. Not retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Trying to restore an invalid snapshot.")]
pub struct InvalidSnapshotError;

/// Errors from [`SnapshotRestorer::restore`](crate::snapshot::SnapshotRestorer::restore).
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The node rejected the snapshot id
    #[error(transparent)]
    InvalidSnapshot(#[from] InvalidSnapshotError),
    /// Transport or response failure, unchanged
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A cached fixture could not be restored because its snapshot is no longer
/// valid in the environment.
///
/// Either a fixture loaded earlier was restored, which discards every
/// snapshot taken after it on the node (including this fixture's), or the
/// node was restarted or reset outside the test process. The cache cannot be
/// trusted for this fixture anymore.
#[derive(Error, Debug)]
#[error(
    "There was an error reverting the snapshot of the fixture '{fixture}'. \
     This might be caused by interleaving loads of fixtures that build on each other's state, \
     or by resetting the node outside of the fixture cache."
)]
pub struct FixtureSnapshotError {
    fixture: String,
    #[source]
    cause: InvalidSnapshotError,
}

impl FixtureSnapshotError {
    pub(crate) fn new(fixture: &str, cause: InvalidSnapshotError) -> Self {
        Self {
            fixture: fixture.to_string(),
            cause,
        }
    }

    /// Name of the fixture whose snapshot was invalidated
    pub fn fixture(&self) -> &str {
        &self.fixture
    }

    /// The underlying revert failure
    pub fn cause(&self) -> &InvalidSnapshotError {
        &self.cause
    }
}

/// Errors from [`FixtureCache::load_fixture`](crate::fixture::FixtureCache::load_fixture).
#[derive(Error, Debug)]
pub enum FixtureError {
    /// The cached snapshot of a fixture is no longer valid on the node
    #[error(transparent)]
    Snapshot(#[from] FixtureSnapshotError),
    /// Transport or response failure, unchanged
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The setup routine failed; nothing was cached
    #[error("Fixture '{fixture}' failed: {source:#}")]
    Setup {
        /// Name of the failing fixture
        fixture: String,
        /// Error returned by the routine
        #[source]
        source: AnyError,
    },
    /// A setup routine tried to load a fixture through the cache running it
    #[error(
        "Fixture '{fixture}' was loaded from inside the setup of fixture '{outer}' on the same cache; \
         call the inner setup directly instead"
    )]
    NestedLoad {
        /// Fixture whose load was refused
        fixture: String,
        /// Fixture whose setup was running
        outer: String,
    },
    /// A cache entry holds a result of another type than its fixture produces
    #[error("Cached result of fixture '{}' has an unexpected type", _0)]
    TypeMismatch(String),
}

/// Errors from the block and time helpers.
#[derive(Error, Debug)]
pub enum HelperError {
    /// An argument was out of range
    #[error("Invalid input: {}", _0)]
    InvalidInput(String),
    /// Transport or response failure, unchanged
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fixture_snapshot_error_exposes_cause() {
        let err = FixtureSnapshotError::new("deploy_tokens", InvalidSnapshotError);
        assert_eq!(err.fixture(), "deploy_tokens");
        assert_eq!(err.cause(), &InvalidSnapshotError);

        let source = err.source().expect("cause must be chained");
        assert!(source.downcast_ref::<InvalidSnapshotError>().is_some());
        assert!(err.to_string().contains("deploy_tokens"));
        assert!(err.to_string().contains("interleaving loads"));
        assert!(err.to_string().contains("resetting the node"));
    }

    #[test]
    fn test_snapshot_error_conversions() {
        let err: SnapshotError = InvalidSnapshotError.into();
        assert!(matches!(err, SnapshotError::InvalidSnapshot(_)));

        let err: SnapshotError = ProviderError::transport("evm_revert", "connection refused").into();
        assert!(matches!(err, SnapshotError::Provider(_)));
        assert_eq!(
            err.to_string(),
            "Transport error on 'evm_revert': connection refused"
        );
    }
}
