use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{CartError, RemoteError};
use crate::model::UserId;

pub const CART_NAMESPACE: &str = "cart";
pub const WISHLIST_NAMESPACE: &str = "wishlist";

/// Composite cache key: a namespace plus the user the value belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub namespace: String,
    pub user_id: UserId,
}

impl QueryKey {
    pub fn new(namespace: impl Into<String>, user_id: UserId) -> Self {
        QueryKey {
            namespace: namespace.into(),
            user_id,
        }
    }

    pub fn cart(user_id: &UserId) -> Self {
        Self::new(CART_NAMESPACE, user_id.clone())
    }

    pub fn wishlist(user_id: &UserId) -> Self {
        Self::new(WISHLIST_NAMESPACE, user_id.clone())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.user_id)
    }
}

/// Loads the source-of-truth value for a key.
#[async_trait]
pub trait Fetcher<V>: Send + Sync + 'static {
    async fn fetch(&self, key: &QueryKey) -> Result<V, RemoteError>;
}

/// Configuration for the query store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Age after which a value counts as stale without being invalidated.
    pub stale_time: Duration,
    /// Whether `invalidate` schedules a background refresh.
    pub refetch_on_invalidate: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            stale_time: Duration::from_millis(cartsync_config::DEFAULT_STALE_TIME_MS),
            refetch_on_invalidate: true,
        }
    }
}

impl From<&cartsync_config::StoreConfig> for StoreConfig {
    fn from(config: &cartsync_config::StoreConfig) -> Self {
        let defaults = StoreConfig::default();
        StoreConfig {
            stale_time: config
                .stale_time
                .as_ref()
                .map(|d| d.as_duration())
                .unwrap_or(defaults.stale_time),
            refetch_on_invalidate: config
                .refetch_on_invalidate
                .unwrap_or(defaults.refetch_on_invalidate),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Direct writes (set, update, speculative edits, rollbacks).
    pub writes: u64,
    pub invalidations: u64,
    /// Refreshes whose result was applied.
    pub refreshes: u64,
    pub refresh_failures: u64,
    /// Refresh results thrown away because the key moved on.
    pub discarded: u64,
    /// Pending refreshes aborted by `cancel_pending`.
    pub cancellations: u64,
    /// Number of keys currently tracked.
    pub entries: usize,
}

/// Observable state of one key.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub has_value: bool,
    pub stale: bool,
    pub refreshing: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub generation: u64,
}

struct Slot<V> {
    value: Option<V>,
    /// Explicitly marked stale by `invalidate`.
    invalidated: bool,
    updated_at: Option<Instant>,
    updated_wall: Option<DateTime<Utc>>,
    /// Bumped whenever an outstanding read is superseded; a read only lands
    /// if the generation it started under is still current.
    generation: u64,
    refresh: Option<JoinHandle<()>>,
    last_error: Option<String>,
    tx: watch::Sender<Option<V>>,
}

impl<V: Clone> Slot<V> {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Slot {
            value: None,
            invalidated: false,
            updated_at: None,
            updated_wall: None,
            generation: 0,
            refresh: None,
            last_error: None,
            tx,
        }
    }

    fn write(&mut self, value: V) {
        self.value = Some(value.clone());
        self.updated_at = Some(Instant::now());
        self.updated_wall = Some(Utc::now());
        self.tx.send_replace(Some(value));
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.invalidated || self.updated_at.map_or(true, |at| at.elapsed() > stale_time)
    }

    fn is_refreshing(&self) -> bool {
        self.refresh.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the in-flight refresh, if any. Returns true if one was running.
    fn abort_refresh(&mut self) -> bool {
        self.generation += 1;
        match self.refresh.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }
}

struct Inner<V> {
    slots: HashMap<QueryKey, Slot<V>>,
    stats: StoreStats,
}

/// Keyed client-side cache with staleness tracking and background refresh.
///
/// Every write takes one short lock that is never held across an `.await`,
/// so readers see either the state before an edit or after it.
pub struct QueryStore<V> {
    config: StoreConfig,
    inner: Mutex<Inner<V>>,
    fetcher: RwLock<Option<Arc<dyn Fetcher<V>>>>,
    idle: Notify,
}

impl<V> QueryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new store with the given configuration and no fetcher.
    pub fn new(config: StoreConfig) -> Self {
        QueryStore {
            config,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                stats: StoreStats::default(),
            }),
            fetcher: RwLock::new(None),
            idle: Notify::new(),
        }
    }

    /// Create a store whose refreshes go through `fetcher`.
    pub fn with_fetcher(config: StoreConfig, fetcher: Arc<dyn Fetcher<V>>) -> Self {
        let store = Self::new(config);
        store.set_fetcher(fetcher);
        store
    }

    pub fn set_fetcher(&self, fetcher: Arc<dyn Fetcher<V>>) {
        *self.fetcher.write() = Some(fetcher);
    }

    /// Current value for `key`, stale or not.
    pub fn get(&self, key: &QueryKey) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.slots.get(key).and_then(|s| s.value.clone());
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
            trace!(key = %key, "store miss");
        }
        value
    }

    /// Replace the value for `key`.
    pub fn set(&self, key: &QueryKey, value: V) {
        self.update(key, move |_| value);
    }

    /// Compute a new value from the current one and store it.
    /// Returns the value that was replaced.
    pub fn update<F>(&self, key: &QueryKey, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut guard = self.inner.lock();
        let Inner { slots, stats } = &mut *guard;
        stats.writes += 1;
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
        let previous = slot.value.clone();
        slot.write(f(previous.as_ref()));
        previous
    }

    /// Begin a speculative edit: cancel any pending refresh for `key`,
    /// capture the current value, and write `f`'s result, all under one
    /// lock. Returns the captured value.
    pub fn speculate<F>(&self, key: &QueryKey, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let previous = {
            let mut guard = self.inner.lock();
            let Inner { slots, stats } = &mut *guard;
            stats.writes += 1;
            let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
            if slot.abort_refresh() {
                stats.cancellations += 1;
                trace!(key = %key, "cancelled refresh before speculative write");
            }
            let previous = slot.value.clone();
            slot.write(f(previous.as_ref()));
            previous
        };
        self.idle.notify_waiters();
        previous
    }

    /// Cancel the pending refresh for `key` only. Returns true if one was
    /// in flight. A result that still arrives afterwards is discarded.
    pub fn cancel_pending(&self, key: &QueryKey) -> bool {
        let cancelled = {
            let mut inner = self.inner.lock();
            let cancelled = match inner.slots.get_mut(key) {
                Some(slot) => slot.abort_refresh(),
                None => false,
            };
            if cancelled {
                inner.stats.cancellations += 1;
                trace!(key = %key, "cancelled pending refresh");
            }
            cancelled
        };
        self.idle.notify_waiters();
        cancelled
    }

    /// Mark `key` stale and, if configured and a fetcher and runtime are
    /// available, schedule a background refresh. An older refresh still in
    /// flight is superseded.
    pub fn invalidate(self: &Arc<Self>, key: &QueryKey) {
        let fetcher = self.fetcher.read().clone();
        let runtime = tokio::runtime::Handle::try_current().ok();

        let mut guard = self.inner.lock();
        let Inner { slots, stats } = &mut *guard;
        stats.invalidations += 1;
        let refetch = self.config.refetch_on_invalidate;
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.invalidated = true;

        let (Some(fetcher), Some(runtime), true) = (fetcher, runtime, refetch) else {
            debug!(key = %key, "marked stale without scheduling a refresh");
            return;
        };

        slot.abort_refresh();
        let generation = slot.generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        let task_key = key.clone();

        // Spawned under the lock so the handle is recorded before the task
        // can finish and clear it.
        slot.refresh = Some(runtime.spawn(async move {
            let result = fetcher.fetch(&task_key).await;
            if let Some(store) = weak.upgrade() {
                store.finish_refresh(&task_key, generation, true, result);
            }
        }));
        debug!(key = %key, generation, "scheduled refresh");
    }

    /// Load `key` in the foreground through the fetcher and store the
    /// result, unless the key was cancelled or refreshed meanwhile.
    pub async fn fetch(&self, key: &QueryKey) -> Result<V, CartError> {
        let fetcher = self
            .fetcher
            .read()
            .clone()
            .ok_or_else(|| CartError::NoFetcher(key.namespace.clone()))?;

        let generation = {
            let inner = self.inner.lock();
            inner.slots.get(key).map_or(0, |s| s.generation)
        };

        let value = fetcher
            .fetch(key)
            .await
            .map_err(|source| CartError::RemoteCallFailed {
                operation: "fetch",
                source,
            })?;
        self.finish_refresh(key, generation, false, Ok(value.clone()));
        Ok(value)
    }

    fn finish_refresh(
        &self,
        key: &QueryKey,
        generation: u64,
        background: bool,
        result: Result<V, RemoteError>,
    ) {
        {
            let mut guard = self.inner.lock();
            let Inner { slots, stats } = &mut *guard;
            // A removed key drops background results; a foreground load
            // creates the slot it reads into.
            let slot = if background {
                let Some(slot) = slots.get_mut(key) else {
                    return;
                };
                slot
            } else {
                slots.entry(key.clone()).or_insert_with(Slot::new)
            };
            if slot.generation != generation {
                stats.discarded += 1;
                debug!(key = %key, generation, "discarded superseded refresh result");
                return;
            }
            if background {
                slot.refresh = None;
            }
            match result {
                Ok(value) => {
                    slot.write(value);
                    slot.invalidated = false;
                    slot.last_error = None;
                    stats.refreshes += 1;
                    debug!(key = %key, generation, "refresh applied");
                }
                Err(e) => {
                    slot.last_error = Some(e.to_string());
                    stats.refresh_failures += 1;
                    warn!(key = %key, error = %e, "refresh failed, keeping stale value");
                }
            }
        }
        self.idle.notify_waiters();
    }

    /// Whether `key` is explicitly invalidated, older than `stale_time`,
    /// or missing.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let inner = self.inner.lock();
        match inner.slots.get(key) {
            Some(slot) => slot.is_stale(self.config.stale_time),
            None => true,
        }
    }

    pub fn has_pending_refresh(&self, key: &QueryKey) -> bool {
        let inner = self.inner.lock();
        inner.slots.get(key).is_some_and(|s| s.is_refreshing())
    }

    pub fn state(&self, key: &QueryKey) -> Option<QueryState> {
        let inner = self.inner.lock();
        inner.slots.get(key).map(|slot| QueryState {
            has_value: slot.value.is_some(),
            stale: slot.is_stale(self.config.stale_time),
            refreshing: slot.is_refreshing(),
            updated_at: slot.updated_wall,
            last_error: slot.last_error.clone(),
            generation: slot.generation,
        })
    }

    /// Resolve once no refresh is in flight for `key`.
    pub async fn wait_idle(&self, key: &QueryKey) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.has_pending_refresh(key) {
                return;
            }
            notified.await;
        }
    }

    /// Watch every write to `key`, starting from its current value.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<Option<V>> {
        let mut inner = self.inner.lock();
        inner
            .slots
            .entry(key.clone())
            .or_insert_with(Slot::new)
            .tx
            .subscribe()
    }

    /// Drop `key` entirely, aborting its refresh.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.slots.remove(key) {
                Some(mut slot) => {
                    slot.abort_refresh();
                    slot.tx.send_replace(None);
                    true
                }
                None => false,
            }
        };
        self.idle.notify_waiters();
        removed
    }

    /// Clear all entries from the store.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            for (_, mut slot) in inner.slots.drain() {
                slot.abort_refresh();
                slot.tx.send_replace(None);
            }
        }
        self.idle.notify_waiters();
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            entries: inner.slots.len(),
            ..inner.stats.clone()
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Thread-safe shared store.
pub type SharedStore<V> = Arc<QueryStore<V>>;

/// Create a new shared store.
pub fn create_store<V>(config: StoreConfig) -> SharedStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    Arc::new(QueryStore::new(config))
}
