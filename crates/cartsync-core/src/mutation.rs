use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use cartsync_config::MutationPolicy;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{CartError, RemoteError};
use crate::metrics::{create_metrics, SharedMetrics};
use crate::store::{QueryKey, QueryStore, SharedStore};

/// The value a speculative edit replaced, held until the mutation resolves.
#[derive(Debug, Clone)]
pub struct MutationContext<V> {
    key: QueryKey,
    previous: Option<V>,
}

impl<V> MutationContext<V> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The rollback target. `None` when nothing was cached yet.
    pub fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }
}

/// One async mutex per key so serialized mutations for a user run in turn.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    lanes: Mutex<HashMap<QueryKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lane for `key`. Lanes nobody holds are dropped on the way.
    pub fn lane(&self, key: &QueryKey) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.lanes.lock();
        lanes.retain(|k, lane| k == key || Arc::strong_count(lane) > 1);
        Arc::clone(lanes.entry(key.clone()).or_default())
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.lock().is_empty()
    }
}

/// A speculative edit that has not settled yet. Dropping it unsettled,
/// because the mutation future was dropped or its task aborted, restores
/// the captured value and invalidates the key.
struct InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    store: SharedStore<V>,
    metrics: SharedMetrics,
    operation: &'static str,
    context: MutationContext<V>,
    settled: bool,
}

impl<V> InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn settle<T>(&mut self, result: Result<T, RemoteError>) -> Result<T, CartError> {
        self.settled = true;
        settle(
            &self.store,
            &self.metrics,
            &self.context,
            self.operation,
            result,
        )
    }
}

impl<V> Drop for InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let key = &self.context.key;
        if let Some(snapshot) = &self.context.previous {
            self.store.set(key, snapshot.clone());
        }
        self.store.invalidate(key);
        self.metrics.record_abandoned();
        warn!(
            key = %key,
            operation = self.operation,
            restored = self.context.previous.is_some(),
            "mutation dropped before settling"
        );
    }
}

enum Start<V, E>
where
    V: Clone + Send + Sync + 'static,
{
    Applied(InFlight<V>, Option<OwnedMutexGuard<()>>),
    Queued(Arc<AsyncMutex<()>>, QueryKey, E),
}

/// Runs remote mutations against a store with speculative local edits.
///
/// A mutation is: cancel pending refreshes for the key, capture the cached
/// value, write the speculative value, await the remote call, restore the
/// captured value if the call failed, then invalidate the key so a refresh
/// brings in the source of truth.
pub struct MutationEngine<V> {
    store: SharedStore<V>,
    policy: MutationPolicy,
    lanes: Arc<KeyedLocks>,
    metrics: SharedMetrics,
}

impl<V> MutationEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: SharedStore<V>) -> Self {
        MutationEngine {
            store,
            policy: MutationPolicy::default(),
            lanes: Arc::new(KeyedLocks::new()),
            metrics: create_metrics(),
        }
    }

    pub fn with_policy(mut self, policy: MutationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &SharedStore<V> {
        &self.store
    }

    pub fn policy(&self) -> MutationPolicy {
        self.policy
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Apply `edit` speculatively and return the context needed to settle.
    pub fn begin<E>(&self, key: QueryKey, edit: E) -> MutationContext<V>
    where
        E: FnOnce(Option<&V>) -> V,
    {
        begin(&self.store, &self.metrics, key, edit)
    }

    /// Roll back on failure, then invalidate the key, then hand back the
    /// remote result.
    pub fn settle<T>(
        &self,
        context: MutationContext<V>,
        operation: &'static str,
        result: Result<T, RemoteError>,
    ) -> Result<T, CartError> {
        settle(&self.store, &self.metrics, &context, operation, result)
    }

    /// Run one mutation.
    ///
    /// Dropping the returned future before it resolves restores the
    /// captured value and invalidates the key, so the next refresh still
    /// brings in the server state.
    ///
    /// With [`MutationPolicy::Concurrent`] the speculative edit is written
    /// before this returns. With [`MutationPolicy::Serialized`] it is
    /// written before this returns only if no other mutation holds the
    /// key's lane; otherwise it is written once the returned future gets
    /// its turn.
    pub fn run<T, E, C>(
        &self,
        key: QueryKey,
        operation: &'static str,
        edit: E,
        call: C,
    ) -> impl Future<Output = Result<T, CartError>> + Send + 'static
    where
        T: Send + 'static,
        E: FnOnce(Option<&V>) -> V + Send + 'static,
        C: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);

        let apply = |key: QueryKey, edit: E| InFlight {
            context: begin(&store, &metrics, key, edit),
            store: Arc::clone(&store),
            metrics: Arc::clone(&metrics),
            operation,
            settled: false,
        };

        let start = match self.policy {
            MutationPolicy::Concurrent => Start::Applied(apply(key, edit), None),
            MutationPolicy::Serialized => {
                let lane = self.lanes.lane(&key);
                match Arc::clone(&lane).try_lock_owned() {
                    Ok(turn) => Start::Applied(apply(key, edit), Some(turn)),
                    Err(_) => {
                        debug!(key = %key, operation, "queued behind in-flight mutation");
                        Start::Queued(lane, key, edit)
                    }
                }
            }
        };

        async move {
            let (mut flight, _turn) = match start {
                Start::Applied(flight, turn) => (flight, turn),
                Start::Queued(lane, key, edit) => {
                    let turn = lane.lock_owned().await;
                    let flight = InFlight {
                        context: begin(&store, &metrics, key, edit),
                        store,
                        metrics,
                        operation,
                        settled: false,
                    };
                    (flight, Some(turn))
                }
            };

            let started = Instant::now();
            let result = call.await;
            flight.metrics.record_latency(started.elapsed());

            flight.settle(result)
        }
    }
}

fn begin<V, E>(
    store: &QueryStore<V>,
    metrics: &SharedMetrics,
    key: QueryKey,
    edit: E,
) -> MutationContext<V>
where
    V: Clone + Send + Sync + 'static,
    E: FnOnce(Option<&V>) -> V,
{
    metrics.record_started();
    let previous = store.speculate(&key, edit);
    debug!(key = %key, had_snapshot = previous.is_some(), "applied speculative edit");
    MutationContext { key, previous }
}

fn settle<V, T>(
    store: &SharedStore<V>,
    metrics: &SharedMetrics,
    context: &MutationContext<V>,
    operation: &'static str,
    result: Result<T, RemoteError>,
) -> Result<T, CartError>
where
    V: Clone + Send + Sync + 'static,
{
    let MutationContext { key, previous } = context;

    match &result {
        Ok(_) => {
            metrics.record_success();
            debug!(key = %key, operation, "remote call succeeded");
        }
        Err(e) => match previous {
            Some(snapshot) => {
                store.set(key, snapshot.clone());
                metrics.record_failure(true);
                warn!(key = %key, operation, error = %e, "remote call failed, rolled back");
            }
            None => {
                metrics.record_failure(false);
                warn!(key = %key, operation, error = %e, "remote call failed, nothing to roll back");
            }
        },
    }

    store.invalidate(key);
    metrics.record_settle();

    result.map_err(|source| CartError::RemoteCallFailed { operation, source })
}
