use std::future::Future;
use std::sync::Arc;

use cartsync_config::MutationPolicy;
use tracing::debug;

use crate::error::CartError;
use crate::metrics::SharedMetrics;
use crate::model::{UserId, WishlistItem, WishlistSnapshot};
use crate::mutation::MutationEngine;
use crate::store::{create_store, QueryKey, SharedStore, StoreConfig};
use crate::traits::{WishlistFetcher, WishlistService};

/// Optimistic wishlist coordinator. Same protocol as
/// [`OptimisticCart`](crate::OptimisticCart) on the `wishlist` namespace,
/// without quantities.
pub struct OptimisticWishlist<S: WishlistService + ?Sized> {
    service: Arc<S>,
    engine: MutationEngine<WishlistSnapshot>,
}

impl<S: WishlistService + ?Sized> OptimisticWishlist<S> {
    pub fn new(service: Arc<S>, store: SharedStore<WishlistSnapshot>) -> Self {
        OptimisticWishlist {
            service,
            engine: MutationEngine::new(store),
        }
    }

    pub fn connect(service: Arc<S>, config: StoreConfig) -> Self {
        let store = create_store(config);
        store.set_fetcher(Arc::new(WishlistFetcher(Arc::clone(&service))));
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

    /// Add `item` unless the product is already listed.
    pub fn add_item(
        &self,
        item: WishlistItem,
    ) -> impl Future<Output = Result<(), CartError>> + Send + 'static {
        let key = QueryKey::wishlist(&item.user_id);
        debug!(user_id = %item.user_id, product_id = %item.product_id, "wishlist add");

        let edit = {
            let item = item.clone();
            move |current: Option<&WishlistSnapshot>| match current {
                Some(list) => list.with_added(&item),
                None => WishlistSnapshot::from(vec![item]),
            }
        };

        let service = Arc::clone(&self.service);
        self.engine.run(key, "add_to_wishlist", edit, async move {
            service.add_to_wishlist(&item).await
        })
    }

    pub fn remove_item(
        &self,
        item: WishlistItem,
    ) -> impl Future<Output = Result<(), CartError>> + Send + 'static {
        let key = QueryKey::wishlist(&item.user_id);
        debug!(user_id = %item.user_id, product_id = %item.product_id, "wishlist remove");

        let product_id = item.product_id.clone();
        let edit = move |current: Option<&WishlistSnapshot>| match current {
            Some(list) => list.without(&product_id),
            None => WishlistSnapshot::default(),
        };

        let service = Arc::clone(&self.service);
        self.engine.run(key, "remove_from_wishlist", edit, async move {
            service.remove_from_wishlist(&item).await
        })
    }

    pub fn wishlist(&self, user_id: &UserId) -> Option<WishlistSnapshot> {
        self.engine.store().get(&QueryKey::wishlist(user_id))
    }

    pub async fn load(&self, user_id: &UserId) -> Result<WishlistSnapshot, CartError> {
        self.engine.store().fetch(&QueryKey::wishlist(user_id)).await
    }

    pub async fn settled(&self, user_id: &UserId) {
        self.engine.store().wait_idle(&QueryKey::wishlist(user_id)).await
    }

    pub fn store(&self) -> &SharedStore<WishlistSnapshot> {
        self.engine.store()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        self.engine.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCartService;
    use crate::model::ProductId;

    fn ids(list: &WishlistSnapshot) -> Vec<String> {
        list.items().iter().map(|i| i.product_id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_is_visible_and_deduplicated() {
        let user = UserId::from("u1");
        let service = Arc::new(MemoryCartService::new());
        let wishlist = OptimisticWishlist::connect(Arc::clone(&service), StoreConfig::default());
        wishlist.load(&user).await.unwrap();

        let first = wishlist.add_item(WishlistItem::new("u1", "p1"));
        let second = wishlist.add_item(WishlistItem::new("u1", "p1"));
        assert_eq!(ids(&wishlist.wishlist(&user).unwrap()), vec!["p1"]);

        first.await.unwrap();
        second.await.unwrap();
        wishlist.settled(&user).await;
        assert_eq!(wishlist.wishlist(&user), Some(service.wishlist(&user)));
    }

    #[tokio::test]
    async fn test_failed_remove_rolls_back() {
        let user = UserId::from("u1");
        let service = Arc::new(MemoryCartService::new());
        let wishlist = OptimisticWishlist::connect(Arc::clone(&service), StoreConfig::default());
        wishlist.add_item(WishlistItem::new("u1", "p1")).await.unwrap();
        wishlist.add_item(WishlistItem::new("u1", "p2")).await.unwrap();
        wishlist.settled(&user).await;

        service.fail_next(1);
        let pending = wishlist.remove_item(WishlistItem::new("u1", "p1"));
        let visible = wishlist.wishlist(&user).unwrap();
        assert!(!visible.contains(&ProductId::from("p1")));
        assert!(visible.contains(&ProductId::from("p2")));

        assert!(pending.await.is_err());
        assert_eq!(ids(&wishlist.wishlist(&user).unwrap()), vec!["p1", "p2"]);
        assert_eq!(wishlist.metrics().snapshot().rollbacks, 1);
    }
}
