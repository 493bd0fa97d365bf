//! Request-scoped batching and caching of keyed lookups.
//!
//! A [`DataLoader`] collects every key requested before its flush point and
//! answers them with one call to its [`BatchFn`]. The flush point is the first
//! poll pass after the keys were requested: a pending load yields once to the
//! scheduler before awaiting its batch, so sibling futures polled in the same
//! pass (for example under `join_all`) land in the same batch.
//! [`DataLoader::dispatch`] flushes explicitly.
//!
//! The bulk fetch itself is a shared future. Any waiter on a batch drives it,
//! so cancelling one load never strands the other keys of its batch.
//!
//! Every key is fetched at most once per loader. Loaders hold request state
//! and must be created per request; see [`RequestLoaders`].

mod request;

pub use request::{EntriesByFeed, EntriesById, FeedsById, RequestLoaders};

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

use crate::storage::StorageError;

// ============================================================================
// Error Types
// ============================================================================

/// Failure of a pending load.
///
/// Cloneable so a single batch failure can be delivered to every key in it.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The bulk fetch for this key's batch failed
    #[error("Batch load failed: {0}")]
    Batch(Arc<StorageError>),

    /// A listing read outside any batch failed
    #[error("Storage read failed: {0}")]
    Storage(Arc<StorageError>),

    /// The loader was dropped before this key's batch started
    #[error("Batch was abandoned before completing")]
    Abandoned,
}

pub type LoadResult<V> = Result<Option<V>, LoadError>;

type Pending<V> = Shared<BoxFuture<'static, LoadResult<V>>>;

type BatchFetch<K, V> = Shared<BoxFuture<'static, Result<Arc<HashMap<K, V>>, LoadError>>>;

// ============================================================================
// Batch Function
// ============================================================================

/// Bulk fetch behind a [`DataLoader`].
///
/// Receives distinct keys. Keys missing from the returned map resolve to
/// `None`; an `Err` fails the whole batch.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync {
    async fn load(&self, keys: &[K]) -> Result<HashMap<K, V>, StorageError>;
}

// ============================================================================
// DataLoader
// ============================================================================

/// Keys collected since the last flush, and the fetch that will answer them
struct OpenBatch<K, V> {
    keys: Vec<K>,
    fetch: BatchFetch<K, V>,
}

struct State<K, V> {
    cache: HashMap<K, Pending<V>>,
    open: Option<OpenBatch<K, V>>,
}

/// Per-request cache and coalescer for one key type.
pub struct DataLoader<K, V, F> {
    batch_fn: Arc<F>,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V, F> DataLoader<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V> + 'static,
{
    pub fn new(batch_fn: F) -> Self {
        Self {
            batch_fn: Arc::new(batch_fn),
            state: Arc::new(Mutex::new(State {
                cache: HashMap::new(),
                open: None,
            })),
        }
    }

    /// Request a single key.
    ///
    /// The key is registered immediately; the returned future resolves once
    /// its batch has been fetched. Repeated calls for one key share the same
    /// pending result.
    pub fn load(&self, key: K) -> impl Future<Output = LoadResult<V>> + Send + 'static {
        let pending = self.enqueue(key);
        async move {
            tokio::task::yield_now().await;
            pending.await
        }
    }

    /// Request several keys, answering in the caller's order.
    ///
    /// Duplicates are fetched once and answered once per occurrence. An empty
    /// slice resolves to an empty vec without dispatching anything.
    pub fn load_many(
        &self,
        keys: &[K],
    ) -> impl Future<Output = Result<Vec<Option<V>>, LoadError>> + Send + 'static {
        let pending: Vec<Pending<V>> = keys.iter().map(|key| self.enqueue(key.clone())).collect();
        async move {
            if pending.is_empty() {
                return Ok(Vec::new());
            }
            tokio::task::yield_now().await;
            future::try_join_all(pending).await
        }
    }

    /// Seed the cache with a known value.
    ///
    /// Does nothing if the key is already pending or resolved. Returns whether
    /// the value was stored.
    pub fn prime(&self, key: K, value: V) -> bool {
        let mut state = self.lock();
        if state.cache.contains_key(&key) {
            return false;
        }
        let ready = future::ready(Ok(Some(value))).boxed().shared();
        state.cache.insert(key, ready);
        true
    }

    /// Fetch every queued key now, in a single call to the batch function.
    pub async fn dispatch(&self) {
        let fetch = self.lock().open.as_ref().map(|batch| batch.fetch.clone());
        if let Some(fetch) = fetch {
            let _ = fetch.await;
        }
    }

    /// Register a key, returning its shared pending result.
    fn enqueue(&self, key: K) -> Pending<V> {
        let mut state = self.lock();
        if let Some(pending) = state.cache.get(&key) {
            return pending.clone();
        }

        let batch = state.open.get_or_insert_with(|| OpenBatch {
            keys: Vec::new(),
            fetch: self.new_fetch(),
        });
        batch.keys.push(key.clone());

        let lookup = key.clone();
        let pending = batch
            .fetch
            .clone()
            .map(move |fetched| fetched.map(|values| values.get(&lookup).cloned()))
            .boxed()
            .shared();
        state.cache.insert(key, pending.clone());
        pending
    }

    /// Build the fetch for the next batch.
    ///
    /// Its first poll closes the batch: the collected keys are taken and later
    /// keys open a new one. The state is held weakly so an unpolled fetch
    /// cached in the state does not keep it alive.
    fn new_fetch(&self) -> BatchFetch<K, V> {
        let weak_state: Weak<Mutex<State<K, V>>> = Arc::downgrade(&self.state);
        let batch_fn = Arc::clone(&self.batch_fn);

        async move {
            let Some(state) = weak_state.upgrade() else {
                return Err(LoadError::Abandoned);
            };
            let keys = {
                let mut guard = lock_state(&state);
                guard.open.take().map(|batch| batch.keys).unwrap_or_default()
            };
            drop(state);
            if keys.is_empty() {
                return Ok(Arc::new(HashMap::new()));
            }

            tracing::debug!(keys = keys.len(), "Dispatching loader batch");
            match batch_fn.load(&keys).await {
                Ok(values) => Ok(Arc::new(values)),
                Err(e) => {
                    tracing::warn!(keys = keys.len(), error = %e, "Loader batch failed");
                    Err(LoadError::Batch(Arc::new(e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        lock_state(&self.state)
    }
}

fn lock_state<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
