use std::collections::HashSet;

use cartsync_core::{CartSnapshot, ProductId, UserId};
use serde::Serialize;

use crate::oracle::{lines_of, Line};

/// A violation detected during simulation.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub step: usize,
    pub user: String,
    pub invariant: String,
    pub details: String,
}

impl Violation {
    fn new(step: usize, user: &UserId, invariant: &str, details: String) -> Self {
        Violation {
            step,
            user: user.to_string(),
            invariant: invariant.to_string(),
            details,
        }
    }
}

fn render(lines: &[Line]) -> String {
    let parts: Vec<String> = lines.iter().map(|(p, q)| format!("{} x{}", p, q)).collect();
    format!("[{}]", parts.join(", "))
}

/// After the initial load the store holds exactly what the server holds.
pub fn check_loaded(
    step: usize,
    user: &UserId,
    visible: Option<&CartSnapshot>,
    server: &[Line],
) -> Option<Violation> {
    let actual = visible.map(lines_of);
    if actual.as_deref() == Some(server) {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "loaded-matches-server",
        format!(
            "server holds {} after load, store shows {}",
            render(server),
            actual.as_deref().map_or_else(|| "nothing".to_string(), render)
        ),
    ))
}

/// A failed call on a loaded cart always had a snapshot to restore.
pub fn check_snapshot_captured(
    step: usize,
    user: &UserId,
    before: Option<&CartSnapshot>,
) -> Option<Violation> {
    if before.is_some() {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "rollback-snapshot-missing",
        "call failed on a loaded cart with nothing cached to restore".to_string(),
    ))
}

/// The issued edit is visible before the remote call resolves.
pub fn check_speculative(
    step: usize,
    user: &UserId,
    expected: &[Line],
    visible: Option<&CartSnapshot>,
) -> Option<Violation> {
    let actual = visible.map(lines_of);
    if actual.as_deref() == Some(expected) {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "speculative-visibility",
        format!(
            "expected {} right after issue, store shows {}",
            render(expected),
            actual.as_deref().map_or_else(|| "nothing".to_string(), render)
        ),
    ))
}

/// At most one line per product.
pub fn check_unique_products(
    step: usize,
    user: &UserId,
    visible: Option<&CartSnapshot>,
) -> Option<Violation> {
    let cart = visible?;
    let mut seen = HashSet::new();
    let duplicate = cart.iter().find(|item| !seen.insert(&item.product_id))?;
    Some(Violation::new(
        step,
        user,
        "key-exclusivity",
        format!("product {} appears more than once in {}", duplicate.product_id, cart),
    ))
}

/// A remove drops only the matching product and keeps the rest in order.
pub fn check_remove_exact(
    step: usize,
    user: &UserId,
    product: &ProductId,
    before: Option<&CartSnapshot>,
    after: Option<&CartSnapshot>,
) -> Option<Violation> {
    let expected: Vec<Line> = before
        .map(lines_of)
        .unwrap_or_default()
        .into_iter()
        .filter(|(p, _)| p != product)
        .collect();
    let actual = after.map(lines_of).unwrap_or_default();
    if actual == expected {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "remove-exact-match",
        format!(
            "removing {} should leave {}, store shows {}",
            product,
            render(&expected),
            render(&actual)
        ),
    ))
}

/// A failed call restores exactly the snapshot captured before it.
pub fn check_rollback(
    step: usize,
    user: &UserId,
    before: &CartSnapshot,
    after: Option<&CartSnapshot>,
) -> Option<Violation> {
    if after == Some(before) {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "rollback-exact",
        format!(
            "expected {} after failure, store shows {}",
            before,
            after.map_or_else(|| "nothing".to_string(), |c| c.to_string())
        ),
    ))
}

/// A successful call keeps its speculative edit until a refresh replaces it.
pub fn check_not_reverted(
    step: usize,
    user: &UserId,
    speculative: &[Line],
    server: &[Line],
    after: Option<&CartSnapshot>,
) -> Option<Violation> {
    let actual = after.map(lines_of).unwrap_or_default();
    if actual == speculative || actual == server {
        return None;
    }
    Some(Violation::new(
        step,
        user,
        "success-not-reverted",
        format!(
            "expected {} or server {} after success, store shows {}",
            render(speculative),
            render(server),
            render(&actual)
        ),
    ))
}

/// Once refreshes drain, store, service and oracle agree.
pub fn check_convergence(
    step: usize,
    user: &UserId,
    store: Option<&CartSnapshot>,
    service: &CartSnapshot,
    oracle: &[Line],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let server = lines_of(service);

    if server != oracle {
        violations.push(Violation::new(
            step,
            user,
            "server-matches-oracle",
            format!("service holds {}, oracle expects {}", render(&server), render(oracle)),
        ));
    }
    if store != Some(service) {
        violations.push(Violation::new(
            step,
            user,
            "store-converged",
            format!(
                "store shows {} after refresh, service holds {}",
                store.map_or_else(|| "nothing".to_string(), |c| c.to_string()),
                service
            ),
        ));
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartsync_core::CartItem;

    fn cart(lines: &[(&str, u32)]) -> CartSnapshot {
        lines
            .iter()
            .map(|(p, q)| CartItem::new("u1", *p, *q))
            .collect()
    }

    fn user() -> UserId {
        UserId::from("u1")
    }

    #[test]
    fn test_duplicate_detected() {
        let dup = CartSnapshot::from(vec![
            CartItem::new("u1", "p1", 1),
            CartItem::new("u1", "p1", 2),
        ]);
        let v = check_unique_products(3, &user(), Some(&dup)).unwrap();
        assert_eq!(v.invariant, "key-exclusivity");
        assert_eq!(v.step, 3);
        assert!(check_unique_products(3, &user(), Some(&cart(&[("p1", 1)]))).is_none());
    }

    #[test]
    fn test_remove_exact() {
        let before = cart(&[("p1", 1), ("p2", 2), ("p3", 1)]);
        let good = cart(&[("p1", 1), ("p3", 1)]);
        let reordered = cart(&[("p3", 1), ("p1", 1)]);
        let p2 = ProductId::from("p2");
        assert!(check_remove_exact(0, &user(), &p2, Some(&before), Some(&good)).is_none());
        assert!(check_remove_exact(0, &user(), &p2, Some(&before), Some(&reordered)).is_some());
    }

    #[test]
    fn test_loaded_and_snapshot_checks() {
        let loaded = cart(&[("p1", 2)]);
        let server = vec![(ProductId::from("p1"), 2)];
        assert!(check_loaded(0, &user(), Some(&loaded), &server).is_none());

        let missing = check_loaded(0, &user(), None, &server).unwrap();
        assert_eq!(missing.invariant, "loaded-matches-server");
        assert!(missing.details.contains("nothing"));
        assert!(check_loaded(0, &user(), Some(&cart(&[])), &server).is_some());

        assert!(check_snapshot_captured(4, &user(), Some(&loaded)).is_none());
        let v = check_snapshot_captured(4, &user(), None).unwrap();
        assert_eq!((v.step, v.invariant.as_str()), (4, "rollback-snapshot-missing"));
    }

    #[test]
    fn test_rollback_and_convergence() {
        let before = cart(&[("p1", 2)]);
        assert!(check_rollback(0, &user(), &before, Some(&before)).is_none());
        assert!(check_rollback(0, &user(), &before, Some(&cart(&[("p1", 3)]))).is_some());

        let oracle = vec![(ProductId::from("p1"), 2)];
        assert!(check_convergence(0, &user(), Some(&before), &before, &oracle).is_empty());
        assert_eq!(
            check_convergence(0, &user(), None, &before, &[]).len(),
            2
        );
    }
}
