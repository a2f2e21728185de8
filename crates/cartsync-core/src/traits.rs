use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{CartItem, CartSnapshot, UserId, WishlistItem, WishlistSnapshot};
use crate::store::{Fetcher, QueryKey};

/// Remote source of truth for carts.
#[async_trait]
pub trait CartService: Send + Sync + 'static {
    /// Add `item` to its user's cart and return the line as stored.
    async fn add_to_cart(&self, item: &CartItem) -> Result<CartItem, RemoteError>;

    /// Remove the line for `item.product_id` from its user's cart.
    async fn remove_from_cart(&self, item: &CartItem) -> Result<(), RemoteError>;

    /// Read a user's whole cart.
    async fn fetch_cart(&self, user_id: &UserId) -> Result<CartSnapshot, RemoteError>;
}

/// Remote source of truth for wishlists.
#[async_trait]
pub trait WishlistService: Send + Sync + 'static {
    async fn add_to_wishlist(&self, item: &WishlistItem) -> Result<(), RemoteError>;

    async fn remove_from_wishlist(&self, item: &WishlistItem) -> Result<(), RemoteError>;

    async fn fetch_wishlist(&self, user_id: &UserId) -> Result<WishlistSnapshot, RemoteError>;
}

/// Refreshes cart entries of a store from a [`CartService`].
pub struct CartFetcher<S: ?Sized>(pub Arc<S>);

#[async_trait]
impl<S: CartService + ?Sized> Fetcher<CartSnapshot> for CartFetcher<S> {
    async fn fetch(&self, key: &QueryKey) -> Result<CartSnapshot, RemoteError> {
        self.0.fetch_cart(&key.user_id).await
    }
}

/// Refreshes wishlist entries of a store from a [`WishlistService`].
pub struct WishlistFetcher<S: ?Sized>(pub Arc<S>);

#[async_trait]
impl<S: WishlistService + ?Sized> Fetcher<WishlistSnapshot> for WishlistFetcher<S> {
    async fn fetch(&self, key: &QueryKey) -> Result<WishlistSnapshot, RemoteError> {
        self.0.fetch_wishlist(&key.user_id).await
    }
}
