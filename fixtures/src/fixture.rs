// File: fixtures/src/fixture.rs
//
// Fixture Cache
//
// Memoizes expensive setup routines. The first load of a fixture runs it and
// snapshots the node; later loads revert the node to that snapshot and hand
// back the stored result instead of running the routine again.

use crate::error::{FixtureError, FixtureSnapshotError, SnapshotError};
use crate::provider::Provider;
use crate::snapshot::{take_snapshot, SnapshotRestorer};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

static NEXT_FIXTURE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// (cache id, fixture name) of every setup routine running on this task
    static RUNNING_SETUPS: Vec<(u64, String)>;
}

/// Process-unique identity of a [`Fixture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixtureId(u64);

impl FixtureId {
    fn next() -> Self {
        Self(NEXT_FIXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type SetupFn<T> = dyn Fn(Arc<dyn Provider>) -> BoxFuture<'static, Result<T>> + Send + Sync;

/// A setup routine whose result and node state are cached
///
/// Identity is assigned at construction: two fixtures built from identical
/// closures are different fixtures. Build each fixture once and keep it
/// around (in a `static`, a `LazyLock`, or an `Arc` shared by the tests);
/// constructing a new `Fixture` on every load silently disables caching.
///
/// # Example
///
/// ```rust,ignore
/// static DEPLOY: LazyLock<Fixture<Deployment>> = LazyLock::new(|| {
///     Fixture::new("deploy", |provider| async move {
///         let token = deploy_token(provider.as_ref()).await?;
///         Ok(Deployment { token })
///     })
/// });
///
/// let deployment = cache.load_fixture(&DEPLOY).await?;
/// ```
pub struct Fixture<T> {
    id: FixtureId,
    name: String,
    setup: Box<SetupFn<T>>,
}

impl<T> Fixture<T>
where
    T: Send + Sync + 'static,
{
    /// Create a fixture named `name` running `setup` on first load
    pub fn new<F, Fut>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(Arc<dyn Provider>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: FixtureId::next(),
            name: name.into(),
            setup: Box::new(move |provider: Arc<dyn Provider>| setup(provider).boxed()),
        }
    }
}

impl<T> Fixture<T> {
    /// Identity used as the cache key
    pub fn id(&self) -> FixtureId {
        self.id
    }

    /// Human-readable name, used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> fmt::Debug for Fixture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct CacheEntry {
    restorer: SnapshotRestorer,
    fixture_id: FixtureId,
    data: Arc<dyn Any + Send + Sync>,
}

/// Cache of fixture results and the node snapshots taken right after them
///
/// One cache per test session, shared by every test that loads fixtures
/// against the same node. Entries live as long as the cache; there is no
/// eviction and no reset. Start over by building a new cache.
///
/// Loads are serialized: the node's snapshot stack is a single ordered
/// resource, so only one restore or setup runs at a time. A setup routine
/// that loads another fixture through the same cache gets
/// [`FixtureError::NestedLoad`]; compose fixtures by calling the inner setup
/// directly. Loads from tasks spawned by a setup routine are not detected
/// and wait for the outer load to finish.
///
/// Entries share the node's snapshot stack. Restoring a fixture discards
/// the node's snapshots of every fixture cached after it, so loading `a`,
/// `b`, then `a` again leaves `b` unrestorable ([`FixtureError::Snapshot`]).
/// Tests that build fixtures on top of each other should load them in the
/// same nesting order every time.
pub struct FixtureCache {
    id: u64,
    provider: Arc<dyn Provider>,
    entries: Mutex<Vec<CacheEntry>>,
}

impl FixtureCache {
    /// Create an empty cache for the node behind `provider`
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            provider,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Provider this cache snapshots and restores through
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Number of cached fixtures
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no fixture has been cached yet
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether `fixture` has a cache entry
    pub async fn contains<T>(&self, fixture: &Fixture<T>) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|entry| entry.fixture_id == fixture.id)
    }

    /// Load `fixture`, running it only on the first call
    ///
    /// On the first load the setup routine runs to completion, then the
    /// node's state is snapshotted and the result cached. On later loads the
    /// node is reverted to that snapshot and the cached result is returned;
    /// the routine does not run again.
    ///
    /// # Errors
    ///
    /// - [`FixtureError::Setup`] if the routine fails; nothing is cached and
    ///   the next load runs it again.
    /// - [`FixtureError::Snapshot`] if the cached snapshot is no longer on
    ///   the node (a fixture cached earlier was restored since, or the node
    ///   was restarted).
    /// - [`FixtureError::NestedLoad`] if called from inside a setup routine
    ///   run by this cache.
    /// - [`FixtureError::Provider`] for any transport failure, unchanged.
    pub async fn load_fixture<T>(&self, fixture: &Fixture<T>) -> Result<Arc<T>, FixtureError>
    where
        T: Send + Sync + 'static,
    {
        let outer = RUNNING_SETUPS
            .try_with(|running| {
                running
                    .iter()
                    .rev()
                    .find(|(cache, _)| *cache == self.id)
                    .map(|(_, name)| name.clone())
            })
            .ok()
            .flatten();
        if let Some(outer) = outer {
            return Err(FixtureError::NestedLoad {
                fixture: fixture.name.clone(),
                outer,
            });
        }

        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.iter_mut().find(|e| e.fixture_id == fixture.id) {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Fixture '{}' {} cached, restoring", fixture.name, fixture.id);
            }

            entry.restorer.restore().await.map_err(|e| match e {
                SnapshotError::InvalidSnapshot(cause) => {
                    FixtureError::Snapshot(FixtureSnapshotError::new(&fixture.name, cause))
                }
                SnapshotError::Provider(e) => FixtureError::Provider(e),
            })?;

            return entry
                .data
                .clone()
                .downcast::<T>()
                .map_err(|_| FixtureError::TypeMismatch(fixture.name.clone()));
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Fixture '{}' {} not cached, running setup", fixture.name, fixture.id);
        }

        let mut running = RUNNING_SETUPS.try_with(Clone::clone).unwrap_or_default();
        running.push((self.id, fixture.name.clone()));

        let data = RUNNING_SETUPS
            .scope(running, (fixture.setup)(self.provider.clone()))
            .await
            .map(Arc::new)
            .map_err(|source| FixtureError::Setup {
                fixture: fixture.name.clone(),
                source,
            })?;

        // Snapshot after setup so the cached state includes its side effects
        let restorer = take_snapshot(self.provider.clone()).await?;

        entries.push(CacheEntry {
            restorer,
            fixture_id: fixture.id,
            data: data.clone(),
        });

        Ok(data)
    }
}

impl fmt::Debug for FixtureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureCache").finish_non_exhaustive()
    }
}
