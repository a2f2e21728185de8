use std::fmt;

use cartsync_core::{CartItem, CartSnapshot, ProductId, UserId};
use rand::seq::SliceRandom;
use rand::Rng;

/// An operation the simulation can perform against one user's cart.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Add {
        user: UserId,
        product: ProductId,
        /// Sent as-is; unset and zero both count as one unit.
        quantity: Option<u32>,
    },
    Remove {
        user: UserId,
        product: ProductId,
    },
    /// Invalidate the cart so a background refresh is in flight when the
    /// next mutation starts.
    Refresh { user: UserId },
}

impl Op {
    pub fn user(&self) -> &UserId {
        match self {
            Op::Add { user, .. } | Op::Remove { user, .. } | Op::Refresh { user } => user,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Op::Refresh { .. })
    }

    /// The item sent to the service for a mutation.
    pub fn item(&self) -> Option<CartItem> {
        match self {
            Op::Add {
                user,
                product,
                quantity,
            } => Some(CartItem {
                user_id: user.clone(),
                product_id: product.clone(),
                quantity: *quantity,
                display: None,
            }),
            Op::Remove { user, product } => Some(CartItem {
                user_id: user.clone(),
                product_id: product.clone(),
                quantity: None,
                display: None,
            }),
            Op::Refresh { .. } => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Add {
                user,
                product,
                quantity,
            } => match quantity {
                Some(q) => write!(f, "add {} {} x{}", user, product, q),
                None => write!(f, "add {} {}", user, product),
            },
            Op::Remove { user, product } => write!(f, "remove {} {}", user, product),
            Op::Refresh { user } => write!(f, "refresh {}", user),
        }
    }
}

/// Generate a mutation for `user`, removing something already visible more
/// often than not.
pub fn generate<R: Rng>(
    rng: &mut R,
    user: &UserId,
    products: &[ProductId],
    visible: Option<&CartSnapshot>,
) -> Op {
    // Weights: Add 55%, Remove 30%, Refresh 15%
    let roll: u32 = rng.gen_range(0..100);

    match roll {
        0..=54 => {
            let quantity = match rng.gen_range(0..10) {
                0 => None,
                1 => Some(0),
                _ => Some(rng.gen_range(1..=3)),
            };
            Op::Add {
                user: user.clone(),
                product: pick_product(rng, products),
                quantity,
            }
        }
        55..=84 => {
            let present: Vec<&ProductId> = visible
                .map(|cart| cart.iter().map(|i| &i.product_id).collect())
                .unwrap_or_default();
            let product = match present.choose(rng) {
                Some(p) if rng.gen_bool(0.7) => (*p).clone(),
                _ => pick_product(rng, products),
            };
            Op::Remove {
                user: user.clone(),
                product,
            }
        }
        _ => Op::Refresh { user: user.clone() },
    }
}

/// Generate a mutation only (no refresh), for concurrent bursts.
pub fn generate_mutation<R: Rng>(
    rng: &mut R,
    user: &UserId,
    products: &[ProductId],
    visible: Option<&CartSnapshot>,
) -> Op {
    loop {
        let op = generate(rng, user, products, visible);
        if op.is_mutation() {
            return op;
        }
    }
}

fn pick_product<R: Rng>(rng: &mut R, products: &[ProductId]) -> ProductId {
    products
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| ProductId::from("p0"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn products() -> Vec<ProductId> {
        (0..4).map(|i| ProductId::new(format!("p{}", i))).collect()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let user = UserId::from("u1");
        let mut a = ChaCha8Rng::seed_from_u64(42);
        let mut b = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(
                generate(&mut a, &user, &products(), None),
                generate(&mut b, &user, &products(), None)
            );
        }
    }

    #[test]
    fn test_generate_mutation_skips_refresh() {
        let user = UserId::from("u1");
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            assert!(generate_mutation(&mut rng, &user, &products(), None).is_mutation());
        }
    }

    #[test]
    fn test_item_matches_op() {
        let op = Op::Add {
            user: UserId::from("u1"),
            product: ProductId::from("p2"),
            quantity: None,
        };
        let item = op.item().unwrap();
        assert_eq!(item.product_id, ProductId::from("p2"));
        assert_eq!(item.quantity, None);
        assert_eq!(op.to_string(), "add u1 p2");
        assert!(Op::Refresh { user: UserId::from("u1") }.item().is_none());
    }
}
