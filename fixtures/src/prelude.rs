//! Prelude - everything a test file usually needs
//!
//! ```rust,ignore
//! use tos_fixtures::prelude::*;
//! ```

pub use crate::error::{
    FixtureError, FixtureSnapshotError, HelperError, InvalidSnapshotError, ProviderError,
    SnapshotError,
};
pub use crate::fixture::{Fixture, FixtureCache};
pub use crate::helpers::{latest_block, mine, mine_with_interval, time};
pub use crate::provider::{HttpProvider, HttpProviderConfig, Provider, TestNode};
pub use crate::snapshot::{take_snapshot, SnapshotRestorer};

pub use std::sync::{Arc, LazyLock};
