use std::future::Future;
use std::sync::Arc;

use cartsync_config::MutationPolicy;
use tracing::debug;

use crate::error::CartError;
use crate::metrics::SharedMetrics;
use crate::model::{CartItem, CartSnapshot, UserId};
use crate::mutation::MutationEngine;
use crate::store::{create_store, QueryKey, SharedStore, StoreConfig};
use crate::traits::{CartFetcher, CartService};

/// Optimistic cart coordinator.
///
/// Each mutation writes its expected outcome into the store before the
/// remote call is awaited, restores the prior snapshot if the call fails,
/// and always invalidates the user's cart afterwards so the next refresh
/// reconciles with the service.
///
/// Two mutations for the same user issued back to back race on the cache
/// key under [`MutationPolicy::Concurrent`]: the later speculative write
/// wins until either resolves, and a failing call rolls back to whatever it
/// captured, possibly discarding the other call's edit until the refresh
/// lands. [`MutationPolicy::Serialized`] queues them per user instead.
pub struct OptimisticCart<S: CartService + ?Sized> {
    service: Arc<S>,
    engine: MutationEngine<CartSnapshot>,
}

impl<S: CartService + ?Sized> OptimisticCart<S> {
    /// Coordinate mutations through `service` on an existing store.
    pub fn new(service: Arc<S>, store: SharedStore<CartSnapshot>) -> Self {
        OptimisticCart {
            service,
            engine: MutationEngine::new(store),
        }
    }

    /// Build a store whose refreshes read from `service` and wrap it.
    pub fn connect(service: Arc<S>, config: StoreConfig) -> Self {
        let store = create_store(config);
        store.set_fetcher(Arc::new(CartFetcher(Arc::clone(&service))));
        Self::new(service, store)
    }

    pub fn with_policy(mut self, policy: MutationPolicy) -> Self {
        self.engine = self.engine.with_policy(policy);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.engine = self.engine.with_metrics(metrics);
        self
    }

    /// Add `item` to its user's cart.
    ///
    /// The merged snapshot is already in the store when this returns. The
    /// future resolves with the line the service stored.
    pub fn add_item(
        &self,
        item: CartItem,
    ) -> impl Future<Output = Result<CartItem, CartError>> + Send + 'static {
        let key = QueryKey::cart(&item.user_id);
        debug!(user_id = %item.user_id, product_id = %item.product_id, "add_item");

        let edit = {
            let item = item.clone();
            move |current: Option<&CartSnapshot>| match current {
                Some(cart) => cart.with_added(&item),
                None => CartSnapshot::from(vec![item]),
            }
        };

        let service = Arc::clone(&self.service);
        self.engine.run(key, "add_to_cart", edit, async move {
            service.add_to_cart(&item).await
        })
    }

    /// Remove every line for `item.product_id` from its user's cart.
    pub fn remove_item(
        &self,
        item: CartItem,
    ) -> impl Future<Output = Result<(), CartError>> + Send + 'static {
        let key = QueryKey::cart(&item.user_id);
        debug!(user_id = %item.user_id, product_id = %item.product_id, "remove_item");

        let product_id = item.product_id.clone();
        let edit = move |current: Option<&CartSnapshot>| match current {
            Some(cart) => cart.without(&product_id),
            None => CartSnapshot::new(),
        };

        let service = Arc::clone(&self.service);
        self.engine.run(key, "remove_from_cart", edit, async move {
            service.remove_from_cart(&item).await
        })
    }

    /// The cart currently visible for `user_id`.
    pub fn cart(&self, user_id: &UserId) -> Option<CartSnapshot> {
        self.engine.store().get(&QueryKey::cart(user_id))
    }

    /// Load the cart from the service into the store.
    pub async fn load(&self, user_id: &UserId) -> Result<CartSnapshot, CartError> {
        self.engine.store().fetch(&QueryKey::cart(user_id)).await
    }

    /// Wait until no refresh is pending for `user_id`'s cart.
    pub async fn settled(&self, user_id: &UserId) {
        self.engine.store().wait_idle(&QueryKey::cart(user_id)).await
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn store(&self) -> &SharedStore<CartSnapshot> {
        self.engine.store()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        self.engine.metrics()
    }

    pub fn policy(&self) -> MutationPolicy {
        self.engine.policy()
    }
}
