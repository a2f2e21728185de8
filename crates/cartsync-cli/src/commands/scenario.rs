use std::sync::Arc;

use cartsync_config::CartsyncConfig;
use cartsync_core::{
    CartItem, CartSnapshot, MemoryCartService, OptimisticCart, QueryKey, StoreConfig, UserId,
};
use clap::ValueEnum;

/// Scripted walkthroughs of the mutation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioName {
    /// Add to a cart holding the same product, remote call fails
    RollbackAdd,
    /// Add to an empty cart, remote call succeeds
    AddEmpty,
    /// Remove one of two lines, remote call fails
    RollbackRemove,
    /// Run every scenario in turn
    All,
}

struct Harness {
    service: Arc<MemoryCartService>,
    cart: OptimisticCart<MemoryCartService>,
}

impl Harness {
    fn new(config: &CartsyncConfig) -> Self {
        let service = Arc::new(MemoryCartService::from_config(&config.service));
        let cart = OptimisticCart::connect(Arc::clone(&service), StoreConfig::from(&config.store))
            .with_policy(config.mutation.policy.unwrap_or_default());
        Harness { service, cart }
    }

    fn show(&self, label: &str, user: &UserId) {
        let key = QueryKey::cart(user);
        let visible = self
            .cart
            .cart(user)
            .map_or_else(|| "(nothing cached)".to_string(), |c: CartSnapshot| c.to_string());
        let stale = if self.cart.store().is_stale(&key) {
            " (stale)"
        } else {
            ""
        };
        println!("  {:<16} {}{}", label, visible, stale);
    }
}

pub async fn run(config: &CartsyncConfig, name: ScenarioName) -> Result<(), Box<dyn std::error::Error>> {
    let scenarios = match name {
        ScenarioName::All => vec![
            ScenarioName::RollbackAdd,
            ScenarioName::AddEmpty,
            ScenarioName::RollbackRemove,
        ],
        one => vec![one],
    };

    for scenario in scenarios {
        match scenario {
            ScenarioName::RollbackAdd => rollback_add(config).await?,
            ScenarioName::AddEmpty => add_empty(config).await?,
            ScenarioName::RollbackRemove => rollback_remove(config).await?,
            ScenarioName::All => {}
        }
        println!();
    }

    Ok(())
}

async fn rollback_add(config: &CartsyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("rollback-add: u1 holds p1 x2, add p1 x1 fails");
    let h = Harness::new(config);
    let user = UserId::from("u1");
    h.service.seed_cart(&user, vec![CartItem::new("u1", "p1", 2)]);
    h.cart.load(&user).await?;
    h.show("loaded", &user);

    h.service.fail_next(1);
    let pending = h.cart.add_item(CartItem::new("u1", "p1", 1));
    h.show("issued", &user);

    if let Err(e) = pending.await {
        println!("  {:<16} {}", "error", e);
    }
    h.show("rolled back", &user);

    h.cart.settled(&user).await;
    h.show("refreshed", &user);
    Ok(())
}

async fn add_empty(config: &CartsyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("add-empty: u2 has an empty cart, add p9 x1 succeeds");
    let h = Harness::new(config);
    let user = UserId::from("u2");
    h.cart.load(&user).await?;
    h.show("loaded", &user);

    let pending = h.cart.add_item(CartItem::new("u2", "p9", 1));
    h.show("issued", &user);

    let stored = pending.await?;
    println!(
        "  {:<16} {} x{}",
        "confirmed",
        stored.product_id,
        stored.effective_quantity()
    );
    h.show("settled", &user);

    h.cart.settled(&user).await;
    h.show("refreshed", &user);
    Ok(())
}

async fn rollback_remove(config: &CartsyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("rollback-remove: u3 holds p1 and p2, remove p1 fails");
    let h = Harness::new(config);
    let user = UserId::from("u3");
    h.service.seed_cart(
        &user,
        vec![CartItem::new("u3", "p1", 1), CartItem::new("u3", "p2", 1)],
    );
    h.cart.load(&user).await?;
    h.show("loaded", &user);

    h.service.fail_next(1);
    let pending = h.cart.remove_item(CartItem::product("u3", "p1"));
    h.show("issued", &user);

    if let Err(e) = pending.await {
        println!("  {:<16} {}", "error", e);
    }
    h.show("rolled back", &user);

    h.cart.settled(&user).await;
    h.show("refreshed", &user);
    Ok(())
}
