use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Opaque product identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        ProductId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        ProductId(s.to_string())
    }
}

/// Optional presentation data carried alongside a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// One line of a user's cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub user_id: UserId,
    pub product_id: ProductId,
    /// Requested quantity. Unset or zero counts as one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayInfo>,
}

impl CartItem {
    pub fn new(user_id: impl Into<String>, product_id: impl Into<String>, quantity: u32) -> Self {
        CartItem {
            user_id: UserId::new(user_id),
            product_id: ProductId::new(product_id),
            quantity: Some(quantity),
            display: None,
        }
    }

    /// Item addressing a product without stating a quantity (used for removal).
    pub fn product(user_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        CartItem {
            user_id: UserId::new(user_id),
            product_id: ProductId::new(product_id),
            quantity: None,
            display: None,
        }
    }

    pub fn with_display(mut self, display: DisplayInfo) -> Self {
        self.display = Some(display);
        self
    }

    /// The quantity used for arithmetic: the stated one if positive, else 1.
    pub fn effective_quantity(&self) -> u32 {
        match self.quantity {
            Some(q) if q > 0 => q,
            _ => 1,
        }
    }
}

/// The ordered line items of one user's cart.
///
/// Every edit preserves the order of the entries it keeps, and a snapshot
/// built through [`CartSnapshot::with_added`] never holds two entries for
/// the same product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartSnapshot(Vec<CartItem>);

impl CartSnapshot {
    pub fn new() -> Self {
        CartSnapshot(Vec::new())
    }

    pub fn items(&self) -> &[CartItem] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CartItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.0.iter().find(|i| &i.product_id == product_id)
    }

    /// Sum of effective quantities across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.0.iter().map(|i| u64::from(i.effective_quantity())).sum()
    }

    /// Merge `item` in: an existing line for the same product keeps its
    /// position and metadata and gets the quantities summed; otherwise the
    /// item is appended unchanged.
    pub fn with_added(&self, item: &CartItem) -> CartSnapshot {
        let mut items = self.0.clone();
        match items.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => {
                let summed = existing
                    .effective_quantity()
                    .saturating_add(item.effective_quantity());
                existing.quantity = Some(summed);
            }
            None => items.push(item.clone()),
        }
        CartSnapshot(items)
    }

    /// Drop every line for `product_id`, keeping the rest in order.
    pub fn without(&self, product_id: &ProductId) -> CartSnapshot {
        CartSnapshot(
            self.0
                .iter()
                .filter(|i| &i.product_id != product_id)
                .cloned()
                .collect(),
        )
    }
}

impl From<Vec<CartItem>> for CartSnapshot {
    fn from(items: Vec<CartItem>) -> Self {
        CartSnapshot(items)
    }
}

impl FromIterator<CartItem> for CartSnapshot {
    fn from_iter<I: IntoIterator<Item = CartItem>>(iter: I) -> Self {
        CartSnapshot(iter.into_iter().collect())
    }
}

impl IntoIterator for CartSnapshot {
    type Item = CartItem;
    type IntoIter = std::vec::IntoIter<CartItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CartSnapshot {
    type Item = &'a CartItem;
    type IntoIter = std::slice::Iter<'a, CartItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CartSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} x{}", item.product_id, item.effective_quantity())?;
        }
        write!(f, "]")
    }
}

/// A product a user saved for later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WishlistItem {
    pub user_id: UserId,
    pub product_id: ProductId,
}

impl WishlistItem {
    pub fn new(user_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        WishlistItem {
            user_id: UserId::new(user_id),
            product_id: ProductId::new(product_id),
        }
    }
}

/// The ordered, duplicate-free wishlist of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WishlistSnapshot(Vec<WishlistItem>);

impl WishlistSnapshot {
    pub fn items(&self) -> &[WishlistItem] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.0.iter().any(|i| &i.product_id == product_id)
    }

    /// Append `item` unless the product is already saved.
    pub fn with_added(&self, item: &WishlistItem) -> WishlistSnapshot {
        let mut items = self.0.clone();
        if !self.contains(&item.product_id) {
            items.push(item.clone());
        }
        WishlistSnapshot(items)
    }

    pub fn without(&self, product_id: &ProductId) -> WishlistSnapshot {
        WishlistSnapshot(
            self.0
                .iter()
                .filter(|i| &i.product_id != product_id)
                .cloned()
                .collect(),
        )
    }
}

impl From<Vec<WishlistItem>> for WishlistSnapshot {
    fn from(items: Vec<WishlistItem>) -> Self {
        WishlistSnapshot(items)
    }
}

impl FromIterator<WishlistItem> for WishlistSnapshot {
    fn from_iter<I: IntoIterator<Item = WishlistItem>>(iter: I) -> Self {
        WishlistSnapshot(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(product: &str, quantity: u32) -> CartItem {
        CartItem::new("u1", product, quantity)
    }

    #[test]
    fn test_effective_quantity_defaults() {
        assert_eq!(line("p1", 3).effective_quantity(), 3);
        assert_eq!(line("p1", 0).effective_quantity(), 1);
        assert_eq!(CartItem::product("u1", "p1").effective_quantity(), 1);
    }

    #[test]
    fn test_with_added_merges_existing_line() {
        let display = DisplayInfo {
            name: "Mug".to_string(),
            price: Some(9.5),
            image_url: None,
        };
        let cart: CartSnapshot = vec![line("p1", 2).with_display(display.clone()), line("p2", 1)].into();

        let updated = cart.with_added(&line("p1", 1));

        assert_eq!(updated.len(), 2);
        assert_eq!(updated.items()[0].product_id.as_str(), "p1");
        assert_eq!(updated.items()[0].quantity, Some(3));
        assert_eq!(updated.items()[0].display, Some(display));
        assert_eq!(updated.items()[1], line("p2", 1));
    }

    #[test]
    fn test_with_added_existing_without_quantity_counts_as_one() {
        let cart: CartSnapshot = vec![CartItem::product("u1", "p1")].into();
        let updated = cart.with_added(&CartItem::product("u1", "p1"));
        assert_eq!(updated.items()[0].quantity, Some(2));
    }

    #[test]
    fn test_with_added_appends_new_item_unchanged() {
        let cart: CartSnapshot = vec![line("p1", 1)].into();
        let incoming = CartItem::product("u1", "p9");

        let updated = cart.with_added(&incoming);

        assert_eq!(updated.len(), 2);
        assert_eq!(updated.items()[1], incoming);
    }

    #[test]
    fn test_without_is_exact_match() {
        let cart: CartSnapshot = vec![line("p1", 1), line("p10", 2), line("p2", 1)].into();
        let updated = cart.without(&ProductId::from("p1"));
        assert_eq!(updated, CartSnapshot::from(vec![line("p10", 2), line("p2", 1)]));
    }

    #[test]
    fn test_snapshot_serializes_as_list() {
        let cart: CartSnapshot = vec![line("p1", 2)].into();
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "user_id": "u1", "product_id": "p1", "quantity": 2 }])
        );
    }

    #[test]
    fn test_snapshot_display() {
        let cart: CartSnapshot = vec![line("p1", 3), CartItem::product("u1", "p2")].into();
        assert_eq!(cart.to_string(), "[p1 x3, p2 x1]");
    }

    #[test]
    fn test_wishlist_add_is_idempotent() {
        let list = WishlistSnapshot::default()
            .with_added(&WishlistItem::new("u1", "p1"))
            .with_added(&WishlistItem::new("u1", "p2"))
            .with_added(&WishlistItem::new("u1", "p1"));

        assert_eq!(list.len(), 2);
        assert_eq!(list.without(&ProductId::from("p1")).items(), &[WishlistItem::new("u1", "p2")]);
    }

    fn arb_cart() -> impl Strategy<Value = CartSnapshot> {
        proptest::collection::btree_map(0u8..12, 0u32..5, 0..8).prop_map(|lines| {
            lines
                .into_iter()
                .map(|(p, q)| line(&format!("p{}", p), q))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_with_added_keeps_products_unique(cart in arb_cart(), product in 0u8..12, qty in 0u32..5) {
            let item = line(&format!("p{}", product), qty);
            let updated = cart.with_added(&item).with_added(&item);

            let matching = updated.iter().filter(|i| i.product_id == item.product_id).count();
            prop_assert_eq!(matching, 1);
            prop_assert_eq!(
                updated.total_quantity(),
                cart.total_quantity() + 2 * u64::from(item.effective_quantity())
            );
        }

        #[test]
        fn prop_without_preserves_order_of_others(cart in arb_cart(), product in 0u8..12) {
            let target = ProductId::new(format!("p{}", product));
            let updated = cart.without(&target);

            let expected: Vec<&CartItem> = cart.iter().filter(|i| i.product_id != target).collect();
            let actual: Vec<&CartItem> = updated.iter().collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
