use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::RemoteError;
use crate::model::{CartItem, CartSnapshot, ProductId, UserId, WishlistItem, WishlistSnapshot};
use crate::traits::{CartService, WishlistService};

const SERVICE_NAME: &str = "memory";

/// Parks callers while held.
struct Gate(watch::Sender<bool>);

impl Gate {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Gate(tx)
    }

    fn set(&self, held: bool) {
        self.0.send_replace(held);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|held| !*held).await;
    }
}

/// In-memory cart and wishlist service for testing and demos.
///
/// Mutation calls can be made to fail (`fail_next`, `set_failing`) or to
/// park until released (`hold_mutations`), which lets tests observe the
/// store while a call is still outstanding.
pub struct MemoryCartService {
    carts: Mutex<HashMap<UserId, IndexMap<ProductId, CartItem>>>,
    wishlists: Mutex<HashMap<UserId, IndexMap<ProductId, WishlistItem>>>,
    max_quantity: Option<u32>,
    latency: Duration,
    forced_failures: AtomicUsize,
    failing: AtomicBool,
    mutation_gate: Gate,
    fetch_gate: Gate,
    mutation_calls: watch::Sender<usize>,
    fetch_calls: AtomicUsize,
}

impl MemoryCartService {
    /// Create a new empty service.
    pub fn new() -> Self {
        let (mutation_calls, _) = watch::channel(0);
        MemoryCartService {
            carts: Mutex::new(HashMap::new()),
            wishlists: Mutex::new(HashMap::new()),
            max_quantity: None,
            latency: Duration::ZERO,
            forced_failures: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            mutation_gate: Gate::new(),
            fetch_gate: Gate::new(),
            mutation_calls,
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &cartsync_config::ServiceConfig) -> Self {
        let mut service = Self::new();
        service.max_quantity = config.max_quantity;
        service.latency = config
            .latency
            .as_ref()
            .map(|d| d.as_duration())
            .unwrap_or(Duration::ZERO);
        service
    }

    /// Clamp every stored line to at most `max` units.
    pub fn with_max_quantity(mut self, max: u32) -> Self {
        self.max_quantity = Some(max);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace a user's server-side cart.
    pub fn seed_cart(&self, user_id: &UserId, items: impl IntoIterator<Item = CartItem>) {
        let lines = items
            .into_iter()
            .map(|item| (item.product_id.clone(), item))
            .collect();
        self.carts.lock().insert(user_id.clone(), lines);
    }

    /// Server truth for a user's cart.
    pub fn cart(&self, user_id: &UserId) -> CartSnapshot {
        self.carts
            .lock()
            .get(user_id)
            .map(|lines| lines.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Server truth for a user's wishlist.
    pub fn wishlist(&self, user_id: &UserId) -> WishlistSnapshot {
        self.wishlists
            .lock()
            .get(user_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `n` mutation calls fail.
    pub fn fail_next(&self, n: usize) {
        self.forced_failures.store(n, Ordering::SeqCst);
    }

    /// Make every mutation call fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Park mutation calls after they arrive until `release_mutations`.
    pub fn hold_mutations(&self) {
        self.mutation_gate.set(true);
    }

    pub fn release_mutations(&self) {
        self.mutation_gate.set(false);
    }

    /// Park cart and wishlist reads until `release_fetches`.
    pub fn hold_fetches(&self) {
        self.fetch_gate.set(true);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.set(false);
    }

    /// Number of mutation calls that have arrived so far.
    pub fn mutation_calls(&self) -> usize {
        *self.mutation_calls.borrow()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Resolve once at least `n` mutation calls have arrived.
    pub async fn wait_for_mutation_calls(&self, n: usize) {
        let mut rx = self.mutation_calls.subscribe();
        let _ = rx.wait_for(|calls| *calls >= n).await;
    }

    fn take_failure(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Shared preamble of every mutation: count it, decide its fate, then
    /// wait out the gate and latency.
    async fn enter_mutation(&self, operation: &str) -> Result<(), RemoteError> {
        self.mutation_calls.send_modify(|calls| *calls += 1);
        let fail = self.take_failure();

        self.mutation_gate.pass().await;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if fail {
            return Err(RemoteError::Unavailable {
                service: SERVICE_NAME.to_string(),
                source: Box::new(std::io::Error::other(format!(
                    "injected failure during {}",
                    operation
                ))),
            });
        }
        Ok(())
    }

    async fn enter_fetch(&self) {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_gate.pass().await;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MemoryCartService {
    fn default() -> Self {
        Self::new()
    }
}

fn check_ids(user_id: &UserId, product_id: &ProductId) -> Result<(), RemoteError> {
    if user_id.as_str().is_empty() || product_id.as_str().is_empty() {
        return Err(RemoteError::Rejected {
            status: 400,
            message: "user_id and product_id are required".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl CartService for MemoryCartService {
    async fn add_to_cart(&self, item: &CartItem) -> Result<CartItem, RemoteError> {
        self.enter_mutation("add_to_cart").await?;
        check_ids(&item.user_id, &item.product_id)?;

        let mut carts = self.carts.lock();
        let lines = carts.entry(item.user_id.clone()).or_default();
        let stored = match lines.entry(item.product_id.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                let summed = existing
                    .effective_quantity()
                    .saturating_add(item.effective_quantity());
                existing.quantity = Some(summed);
                existing
            }
            Entry::Vacant(entry) => entry.insert(CartItem {
                quantity: Some(item.effective_quantity()),
                ..item.clone()
            }),
        };
        if let Some(max) = self.max_quantity {
            stored.quantity = stored.quantity.map(|q| q.min(max));
        }
        Ok(stored.clone())
    }

    async fn remove_from_cart(&self, item: &CartItem) -> Result<(), RemoteError> {
        self.enter_mutation("remove_from_cart").await?;
        check_ids(&item.user_id, &item.product_id)?;

        if let Some(lines) = self.carts.lock().get_mut(&item.user_id) {
            lines.shift_remove(&item.product_id);
        }
        Ok(())
    }

    async fn fetch_cart(&self, user_id: &UserId) -> Result<CartSnapshot, RemoteError> {
        self.enter_fetch().await;
        Ok(self.cart(user_id))
    }
}

#[async_trait]
impl WishlistService for MemoryCartService {
    async fn add_to_wishlist(&self, item: &WishlistItem) -> Result<(), RemoteError> {
        self.enter_mutation("add_to_wishlist").await?;
        check_ids(&item.user_id, &item.product_id)?;

        self.wishlists
            .lock()
            .entry(item.user_id.clone())
            .or_default()
            .entry(item.product_id.clone())
            .or_insert_with(|| item.clone());
        Ok(())
    }

    async fn remove_from_wishlist(&self, item: &WishlistItem) -> Result<(), RemoteError> {
        self.enter_mutation("remove_from_wishlist").await?;
        check_ids(&item.user_id, &item.product_id)?;

        if let Some(items) = self.wishlists.lock().get_mut(&item.user_id) {
            items.shift_remove(&item.product_id);
        }
        Ok(())
    }

    async fn fetch_wishlist(&self, user_id: &UserId) -> Result<WishlistSnapshot, RemoteError> {
        self.enter_fetch().await;
        Ok(self.wishlist(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user() -> UserId {
        UserId::from("u1")
    }

    #[tokio::test]
    async fn test_add_sums_and_clamps() {
        let service = MemoryCartService::new().with_max_quantity(5);

        let first = service.add_to_cart(&CartItem::new("u1", "p1", 2)).await.unwrap();
        assert_eq!(first.quantity, Some(2));

        let second = service.add_to_cart(&CartItem::new("u1", "p1", 4)).await.unwrap();
        assert_eq!(second.quantity, Some(5));

        let unset = service.add_to_cart(&CartItem::product("u1", "p2")).await.unwrap();
        assert_eq!(unset.quantity, Some(1));

        assert_eq!(service.cart(&user()).len(), 2);
        assert_eq!(service.mutation_calls(), 3);
    }

    #[tokio::test]
    async fn test_remove_keeps_order() {
        let service = MemoryCartService::new();
        service.seed_cart(
            &user(),
            vec![
                CartItem::new("u1", "p1", 1),
                CartItem::new("u1", "p2", 1),
                CartItem::new("u1", "p3", 1),
            ],
        );

        service.remove_from_cart(&CartItem::product("u1", "p2")).await.unwrap();
        service.remove_from_cart(&CartItem::product("u1", "p9")).await.unwrap();

        let ids: Vec<_> = service.cart(&user()).iter().map(|i| i.product_id.to_string()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let service = MemoryCartService::new();
        service.fail_next(1);

        let err = service.add_to_cart(&CartItem::new("u1", "p1", 1)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(service.cart(&user()).is_empty());

        service.add_to_cart(&CartItem::new("u1", "p1", 1)).await.unwrap();
        assert_eq!(service.cart(&user()).len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_blank_ids() {
        let service = MemoryCartService::new();
        let err = service.add_to_cart(&CartItem::new("u1", "", 1)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_hold_mutations_parks_calls() {
        let service = Arc::new(MemoryCartService::new());
        service.hold_mutations();

        let call = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.add_to_cart(&CartItem::new("u1", "p1", 1)).await })
        };

        service.wait_for_mutation_calls(1).await;
        assert!(service.cart(&user()).is_empty());

        service.release_mutations();
        call.await.unwrap().unwrap();
        assert_eq!(service.cart(&user()).len(), 1);
    }

    #[tokio::test]
    async fn test_wishlist_is_duplicate_free() {
        let service = MemoryCartService::new();
        let item = WishlistItem::new("u1", "p1");

        service.add_to_wishlist(&item).await.unwrap();
        service.add_to_wishlist(&item).await.unwrap();
        assert_eq!(service.fetch_wishlist(&user()).await.unwrap().len(), 1);

        service.remove_from_wishlist(&item).await.unwrap();
        assert!(service.wishlist(&user()).is_empty());
        assert_eq!(service.fetch_calls(), 1);
    }

    #[test]
    fn test_from_config() {
        let config = cartsync_config::ServiceConfig {
            latency: Some(cartsync_config::HumanDuration::from_millis(5)),
            max_quantity: Some(3),
            failure_rate: None,
        };
        let service = MemoryCartService::from_config(&config);
        assert_eq!(service.max_quantity, Some(3));
        assert_eq!(service.latency, Duration::from_millis(5));
    }
}
