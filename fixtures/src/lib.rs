//! # TOS Fixtures
//!
//! Snapshot/restore and fixture caching for tests that run against a
//! stateful RPC test node.
//!
//! ## Architecture Overview
//!
//! - **Provider**: request/response access to the node (`HttpProvider` for a
//!   real node, `TestNode` in-process)
//! - **Snapshot**: `take_snapshot` returns a `SnapshotRestorer` that can
//!   return the node to the captured state any number of times
//! - **Fixture cache**: `FixtureCache::load_fixture` runs a setup routine
//!   once, snapshots the resulting state, and replays that snapshot on every
//!   later load instead of running the routine again
//! - **Helpers**: block height, timestamps, mining
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tos_fixtures::prelude::*;
//!
//! async fn deploy(provider: Arc<dyn Provider>) -> anyhow::Result<u64> {
//!     mine(provider.as_ref(), 10).await?;
//!     Ok(latest_block(provider.as_ref()).await?)
//! }
//!
//! static DEPLOY: LazyLock<Fixture<u64>> = LazyLock::new(|| Fixture::new("deploy", deploy));
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let cache = FixtureCache::new(Arc::new(HttpProvider::from_env().unwrap()));
//!     let height = cache.load_fixture(&DEPLOY).await.unwrap();
//!     // the node is at the state `deploy` left it in
//! }
//! ```
//!
//! ## Logging
//!
//! All output goes through the `log` facade: `debug` for snapshot and cache
//! activity, `trace` for raw JSON-RPC traffic, `warn` for snapshots rejected
//! by the node.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types
pub mod error;

/// Fixture cache built on snapshots
pub mod fixture;

/// Block and time helpers
pub mod helpers;

/// Node access (HTTP JSON-RPC and in-process)
pub mod provider;

/// Snapshot/restore primitive
pub mod snapshot;

// Convenient re-exports for common usage
pub mod prelude;

// Re-export commonly used types at crate root
pub use error::{
    FixtureError, FixtureSnapshotError, HelperError, InvalidSnapshotError, ProviderError,
    SnapshotError,
};
pub use fixture::{Fixture, FixtureCache, FixtureId};
pub use provider::{HttpProvider, HttpProviderConfig, Provider, TestNode};
pub use snapshot::{take_snapshot, SnapshotRestorer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
