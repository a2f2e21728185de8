use std::collections::HashMap;

use cartsync_core::{CartSnapshot, ProductId, UserId};

use crate::ops::Op;

/// One cart line as the oracle sees it: product and effective quantity.
pub type Line = (ProductId, u32);

/// Flatten a snapshot into comparable lines.
pub fn lines_of(cart: &CartSnapshot) -> Vec<Line> {
    cart.iter()
        .map(|item| (item.product_id.clone(), item.effective_quantity()))
        .collect()
}

fn units(quantity: Option<u32>) -> u32 {
    match quantity {
        Some(q) if q > 0 => q,
        _ => 1,
    }
}

/// Apply `op` to `lines` the way a cart edit should.
///
/// Adds sum into an existing line in place or append a new one; removes
/// drop every line for the product and keep the rest in order.
pub fn apply(lines: &[Line], op: &Op) -> Vec<Line> {
    match op {
        Op::Add {
            product, quantity, ..
        } => {
            let mut next = lines.to_vec();
            match next.iter_mut().find(|(p, _)| p == product) {
                Some((_, q)) => *q = q.saturating_add(units(*quantity)),
                None => next.push((product.clone(), units(*quantity))),
            }
            next
        }
        Op::Remove { product, .. } => lines.iter().filter(|(p, _)| p != product).cloned().collect(),
        Op::Refresh { .. } => lines.to_vec(),
    }
}

/// Ground truth model of what the service should hold.
#[derive(Debug, Default)]
pub struct Oracle {
    carts: HashMap<UserId, Vec<Line>>,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, user: &UserId, lines: Vec<Line>) {
        self.carts.insert(user.clone(), lines);
    }

    /// Expected server cart for `user`.
    pub fn server(&self, user: &UserId) -> Vec<Line> {
        self.carts.get(user).cloned().unwrap_or_default()
    }

    /// What the store should show right after `op` is issued on top of
    /// `visible`. A missing cache value edits as an empty cart.
    pub fn predict(&self, visible: Option<&CartSnapshot>, op: &Op) -> Vec<Line> {
        let current = visible.map(lines_of).unwrap_or_default();
        apply(&current, op)
    }

    /// Record that the service accepted `op`.
    pub fn commit(&mut self, op: &Op) {
        if !op.is_mutation() {
            return;
        }
        let cart = self.carts.entry(op.user().clone()).or_default();
        *cart = apply(cart, op);
    }
}
