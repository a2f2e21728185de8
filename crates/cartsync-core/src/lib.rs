//! cartsync-core: optimistic cart mutations over a keyed client-side store.
//!
//! This crate provides:
//! - The cart data model and its edit rules
//! - [`QueryStore`], a keyed cache with staleness and background refresh
//! - [`OptimisticCart`] and [`OptimisticWishlist`] coordinators
//! - An in-memory service for tests and demos

mod cart;
mod error;
mod memory;
mod metrics;
mod model;
mod mutation;
mod store;
mod traits;
mod wishlist;

pub use cart::OptimisticCart;
pub use error::{CartError, RemoteError};
pub use memory::MemoryCartService;
pub use metrics::{create_metrics, MetricsSnapshot, MutationMetrics, SharedMetrics};
pub use model::{
    CartItem, CartSnapshot, DisplayInfo, ProductId, UserId, WishlistItem, WishlistSnapshot,
};
pub use mutation::{KeyedLocks, MutationContext, MutationEngine};
pub use store::{
    create_store, Fetcher, QueryKey, QueryState, QueryStore, SharedStore, StoreConfig, StoreStats,
    CART_NAMESPACE, WISHLIST_NAMESPACE,
};
pub use traits::{CartFetcher, CartService, WishlistFetcher, WishlistService};
pub use wishlist::OptimisticWishlist;

pub use cartsync_config::MutationPolicy;
