// Integration tests for snapshot restore and fixture caching
// Runs everything against the in-process TestNode

use anyhow::Result;
use proptest::prelude::*;
use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tos_fixtures::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counter living outside the node, for observing how often setup runs
struct ExternalCounter(AtomicU64);

impl ExternalCounter {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(0)))
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn counter_fixture(name: &str, counter: Arc<ExternalCounter>) -> Fixture<u64> {
    Fixture::new(name, move |_provider| {
        let counter = counter.clone();
        async move { Ok(counter.increment()) }
    })
}

#[derive(Debug, PartialEq)]
struct Deployment {
    height: u64,
    timestamp: u64,
}

async fn deploy(provider: Arc<dyn Provider>) -> Result<Deployment> {
    mine(provider.as_ref(), 3).await?;
    let timestamp = time::increase(provider.as_ref(), 600).await?;
    Ok(Deployment {
        height: latest_block(provider.as_ref()).await?,
        timestamp,
    })
}

static DEPLOY: LazyLock<Fixture<Deployment>> = LazyLock::new(|| Fixture::new("deploy", deploy));

#[tokio::test]
async fn test_take_snapshot_restore_twice() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let mut snapshot = take_snapshot(node.clone()).await.unwrap();

    mine(node.as_ref(), 1).await.unwrap();
    snapshot.restore().await.unwrap();
    snapshot.restore().await.unwrap();

    assert_eq!(node.block_number(), 0);
}

#[tokio::test]
async fn test_restore_on_invalidated_handle_fails() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let mut snapshot = take_snapshot(node.clone()).await.unwrap();
    mine(node.as_ref(), 2).await.unwrap();

    node.invalidate_snapshots();

    let err = snapshot.restore().await.unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidSnapshot(InvalidSnapshotError)));
    assert_eq!(node.block_number(), 2, "a rejected revert must not change state");
}

#[tokio::test]
async fn test_memoization_runs_setup_once() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = FixtureCache::new(node.clone());
    let counter = ExternalCounter::new();
    let fixture = counter_fixture("counter", counter.clone());

    let mut values = Vec::new();
    for _ in 0..4 {
        values.push(*cache.load_fixture(&fixture).await.unwrap());
    }

    assert_eq!(counter.get(), 1);
    assert_eq!(values, vec![1, 1, 1, 1]);
}

#[tokio::test]
async fn test_distinct_fixtures_do_not_share_entries() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = FixtureCache::new(node.clone());
    let counter = ExternalCounter::new();

    // Same behaviour, different identity
    let f1 = counter_fixture("counter", counter.clone());
    let f2 = counter_fixture("counter", counter.clone());

    // Loading f1 first does not give f2 a cache hit
    assert_eq!(*cache.load_fixture(&f1).await.unwrap(), 1);
    assert_eq!(*cache.load_fixture(&f2).await.unwrap(), 2);

    // Restore in nesting order: f2's snapshot sits above f1's on the node
    assert_eq!(*cache.load_fixture(&f2).await.unwrap(), 2);
    assert_eq!(*cache.load_fixture(&f1).await.unwrap(), 1);

    assert_eq!(counter.get(), 2);
    assert_eq!(cache.len().await, 2);
}

static NESTED_CACHE: LazyLock<FixtureCache> =
    LazyLock::new(|| FixtureCache::new(Arc::new(TestNode::new())));

static BASE: LazyLock<Fixture<u64>> = LazyLock::new(|| {
    Fixture::new("base", |provider: Arc<dyn Provider>| async move {
        mine(provider.as_ref(), 1).await?;
        Ok::<_, anyhow::Error>(1)
    })
});

static OUTER: LazyLock<Fixture<u64>> = LazyLock::new(|| {
    Fixture::new("outer", |_provider| async move {
        let base = NESTED_CACHE.load_fixture(&BASE).await?;
        Ok::<_, anyhow::Error>(*base + 1)
    })
});

#[tokio::test]
async fn test_fixture_loading_fixture_from_same_cache_errors() {
    init_logging();

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        NESTED_CACHE.load_fixture(&OUTER),
    )
    .await
    .expect("loading a fixture from inside a setup must not hang");

    let err = result.unwrap_err();
    let FixtureError::Setup { fixture, source } = &err else {
        panic!("expected FixtureError::Setup, got {:?}", err);
    };
    assert_eq!(fixture, "outer");
    assert!(matches!(
        source.downcast_ref::<FixtureError>(),
        Some(FixtureError::NestedLoad { fixture, outer }) if fixture == "base" && outer == "outer"
    ));
    assert!(NESTED_CACHE.is_empty().await);
}

#[tokio::test]
async fn test_fresh_fixture_per_call_defeats_caching() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = FixtureCache::new(node.clone());
    let counter = ExternalCounter::new();

    for expected in 1..=3 {
        let fixture = counter_fixture("inline", counter.clone());
        assert_eq!(*cache.load_fixture(&fixture).await.unwrap(), expected);
    }
    assert_eq!(cache.len().await, 3);
}

#[tokio::test]
async fn test_cache_hit_restores_post_setup_state() {
    init_logging();
    let node = Arc::new(TestNode::with_genesis_timestamp(1_000));
    let cache = FixtureCache::new(node.clone());

    let first = cache.load_fixture(&DEPLOY).await.unwrap();
    assert_eq!(
        *first,
        Deployment {
            height: 4,
            timestamp: 1_603
        }
    );

    // A test wanders off from the fixture state
    mine(node.as_ref(), 7).await.unwrap();
    time::increase(node.as_ref(), 86_400).await.unwrap();

    let second = cache.load_fixture(&DEPLOY).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(node.block_number(), 4, "state must match the end of setup, not its start");
    assert_eq!(node.latest_timestamp(), 1_603);
}

#[tokio::test]
async fn test_out_of_band_reset_surfaces_fixture_snapshot_error() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = FixtureCache::new(node.clone());
    let counter = ExternalCounter::new();
    let fixture = counter_fixture("token", counter.clone());

    cache.load_fixture(&fixture).await.unwrap();
    node.reset();

    let err = cache.load_fixture(&fixture).await.unwrap_err();
    let FixtureError::Snapshot(snapshot_err) = &err else {
        panic!("expected FixtureError::Snapshot, got {:?}", err);
    };
    assert_eq!(snapshot_err.fixture(), "token");
    assert_eq!(snapshot_err.cause(), &InvalidSnapshotError);

    let source = err.source().expect("cause must be retrievable");
    assert!(source.downcast_ref::<InvalidSnapshotError>().is_some());

    // The routine is not silently re-run
    assert_eq!(counter.get(), 1);
}

#[tokio::test]
async fn test_fixtures_interleave_on_one_node() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = FixtureCache::new(node.clone());

    let two_blocks = Fixture::new("two_blocks", |provider: Arc<dyn Provider>| async move {
        mine(provider.as_ref(), 2).await?;
        Ok::<_, anyhow::Error>(2u64)
    });
    let five_blocks = Fixture::new("five_blocks", |provider: Arc<dyn Provider>| async move {
        mine(provider.as_ref(), 5).await?;
        Ok::<_, anyhow::Error>(5u64)
    });

    cache.load_fixture(&two_blocks).await.unwrap();
    assert_eq!(node.block_number(), 2);

    // Built on top of the first fixture's state
    cache.load_fixture(&five_blocks).await.unwrap();
    assert_eq!(node.block_number(), 7);

    cache.load_fixture(&two_blocks).await.unwrap();
    assert_eq!(node.block_number(), 2);

    // Reverting to the earlier snapshot discarded the later one on the node
    let err = cache.load_fixture(&five_blocks).await.unwrap_err();
    assert!(matches!(err, FixtureError::Snapshot(_)));
}

#[tokio::test]
async fn test_concurrent_loads_run_setup_once() {
    init_logging();
    let node = Arc::new(TestNode::new());
    let cache = Arc::new(FixtureCache::new(node.clone()));
    let counter = ExternalCounter::new();
    let fixture = Arc::new(counter_fixture("shared", counter.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let fixture = fixture.clone();
        handles.push(tokio::spawn(async move {
            *cache.load_fixture(&fixture).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(counter.get(), 1);
}

proptest! {
    /// Property: N loads of one fixture run its setup exactly once and
    /// always return the first result
    #[test]
    fn prop_memoization_holds_for_any_load_count(loads in 1usize..20, preexisting in 0u64..5) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let node = Arc::new(TestNode::new());
            let cache = FixtureCache::new(node.clone());
            let counter = ExternalCounter::new();
            for _ in 0..preexisting {
                counter.increment();
            }
            let fixture = counter_fixture("prop", counter.clone());

            for _ in 0..loads {
                let value = *cache.load_fixture(&fixture).await.unwrap();
                prop_assert_eq!(value, preexisting + 1);
            }
            prop_assert_eq!(counter.get(), preexisting + 1);
            prop_assert_eq!(node.request_count("evm_revert"), (loads - 1) as u64);
            Ok(())
        })?;
    }
}
