use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cartsync_core::{
    CartError, CartItem, CartSnapshot, MemoryCartService, MetricsSnapshot, MutationPolicy,
    OptimisticCart, ProductId, QueryKey, StoreConfig, UserId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::fault::{is_injected_fault, FaultConfig, FaultStats, FaultyCartService};
use crate::invariants::{
    check_convergence, check_loaded, check_not_reverted, check_remove_exact, check_rollback,
    check_snapshot_captured, check_speculative, check_unique_products, Violation,
};
use crate::ops::{generate, generate_mutation, Op};
use crate::oracle::{lines_of, Oracle};

type Pending = Pin<Box<dyn Future<Output = Result<(), CartError>> + Send>>;

/// A single operation/result entry captured during simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimTraceEntry {
    pub step: usize,
    pub op: String,
    pub outcome: String,
}

/// Knobs for one simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub users: usize,
    pub products: usize,
    pub policy: MutationPolicy,
    pub faults: Option<FaultConfig>,
    /// Share of steps that issue several mutations before awaiting any.
    pub burst_ratio: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            users: 3,
            products: 5,
            policy: MutationPolicy::Concurrent,
            faults: None,
            burst_ratio: 0.2,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub seed: u64,
    pub steps: usize,
    pub violations: Vec<Violation>,
    pub faults: FaultStats,
    pub mutations: MetricsSnapshot,
}

impl SimReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The main simulation harness.
pub struct Sim {
    pub cart: OptimisticCart<FaultyCartService>,
    pub service: Arc<FaultyCartService>,
    pub oracle: Oracle,
    pub rng: ChaCha8Rng,
    pub config: SimConfig,
    pub seed: u64,
    pub step: usize,
    pub users: Vec<UserId>,
    pub products: Vec<ProductId>,
    pub violations: Vec<Violation>,
    /// Step-by-step operation outcomes for tooling.
    pub trace: Vec<SimTraceEntry>,
}

impl Sim {
    /// Create a new deterministic simulation with the given seed.
    pub async fn new(seed: u64) -> Self {
        Self::with_config(seed, SimConfig::default()).await
    }

    /// Create a new deterministic simulation with optional fault injection.
    pub async fn new_with_faults(seed: u64, faults: Option<FaultConfig>) -> Self {
        Self::with_config(
            seed,
            SimConfig {
                faults,
                ..SimConfig::default()
            },
        )
        .await
    }

    pub async fn with_config(seed: u64, config: SimConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let fault_rng = ChaCha8Rng::seed_from_u64(rng.gen());

        let users: Vec<UserId> = (0..config.users.max(1))
            .map(|i| UserId::new(format!("u{}", i)))
            .collect();
        let products: Vec<ProductId> = (0..config.products.max(1))
            .map(|i| ProductId::new(format!("p{}", i)))
            .collect();

        let memory = Arc::new(MemoryCartService::new());
        let mut oracle = Oracle::new();

        // Every user starts with a couple of lines on the server.
        for user in &users {
            let seeded: CartSnapshot = products
                .iter()
                .take(2)
                .map(|p| CartItem::new(user.as_str(), p.as_str(), rng.gen_range(1..=3)))
                .collect();
            oracle.seed(user, lines_of(&seeded));
            memory.seed_cart(user, seeded);
        }

        let service = Arc::new(FaultyCartService::new(
            memory,
            fault_rng,
            config.faults.clone().unwrap_or_default(),
        ));
        let cart = OptimisticCart::connect(Arc::clone(&service), StoreConfig::default())
            .with_policy(config.policy);

        service.set_enabled(false);
        let mut violations = Vec::new();
        for user in &users {
            if let Err(e) = cart.load(user).await {
                debug!(user_id = %user, error = %e, "initial load failed");
            }
            violations.extend(check_loaded(0, user, cart.cart(user).as_ref(), &oracle.server(user)));
        }
        service.set_enabled(true);

        Sim {
            cart,
            service,
            oracle,
            rng,
            config,
            seed,
            step: 0,
            users,
            products,
            violations,
            trace: Vec::new(),
        }
    }

    /// Run `steps` random steps, then drain and check convergence.
    pub async fn run(&mut self, steps: usize) -> &[Violation] {
        let ratio = if self.config.burst_ratio.is_finite() {
            self.config.burst_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };

        for _ in 0..steps {
            let user_idx = self.rng.gen_range(0..self.users.len());
            let user = self.users[user_idx].clone();

            if self.rng.gen_bool(ratio) {
                let size = self.rng.gen_range(2..=3);
                self.burst(&user, size).await;
            } else {
                let visible = self.visible(&user);
                let op = generate(&mut self.rng, &user, &self.products, visible.as_ref());
                self.step_with(op).await;
            }
        }

        self.finish().await;
        &self.violations
    }

    /// Run and summarize.
    pub async fn run_report(&mut self, steps: usize) -> SimReport {
        self.run(steps).await;
        self.report()
    }

    pub fn report(&self) -> SimReport {
        SimReport {
            seed: self.seed,
            steps: self.step,
            violations: self.violations.clone(),
            faults: self.service.stats(),
            mutations: self.cart.metrics().snapshot(),
        }
    }

    fn visible(&self, user: &UserId) -> Option<CartSnapshot> {
        self.cart.cart(user)
    }

    fn record(&mut self, violation: Option<Violation>) {
        if let Some(v) = violation {
            debug!(step = v.step, invariant = %v.invariant, "violation");
            self.violations.push(v);
        }
    }

    fn trace(&mut self, op: &Op, outcome: impl Into<String>) {
        self.trace.push(SimTraceEntry {
            step: self.step,
            op: op.to_string(),
            outcome: outcome.into(),
        });
    }

    /// Start the mutation for `op`; its speculative edit is applied on return.
    fn issue(&self, op: &Op) -> Option<Pending> {
        let item = op.item()?;
        let pending: Pending = match op {
            Op::Add { .. } => {
                let added = self.cart.add_item(item);
                Box::pin(async move { added.await.map(|_| ()) })
            }
            _ => Box::pin(self.cart.remove_item(item)),
        };
        Some(pending)
    }

    /// Issue one operation, await it, and check every per-call invariant.
    pub async fn step_with(&mut self, op: Op) {
        let step = self.step;
        self.step += 1;
        let user = op.user().clone();
        let key = QueryKey::cart(&user);

        if let Op::Refresh { .. } = op {
            self.cart.store().invalidate(&key);
            self.trace(&op, "invalidated");
            return;
        }

        let before = self.visible(&user);
        let predicted = self.oracle.predict(before.as_ref(), &op);

        let Some(pending) = self.issue(&op) else {
            return;
        };

        let during = self.visible(&user);
        self.record(check_speculative(step, &user, &predicted, during.as_ref()));
        self.record(check_unique_products(step, &user, during.as_ref()));
        if let Op::Remove { product, .. } = &op {
            self.record(check_remove_exact(
                step,
                &user,
                product,
                before.as_ref(),
                during.as_ref(),
            ));
        }

        let result = pending.await;
        let after = self.visible(&user);

        match result {
            Ok(()) => {
                self.oracle.commit(&op);
                let server = self.oracle.server(&user);
                self.record(check_not_reverted(step, &user, &predicted, &server, after.as_ref()));
                self.trace(&op, "ok");
            }
            Err(e) => {
                let message = e.to_string();
                if !is_injected_fault(&message) {
                    self.record(Some(Violation {
                        step,
                        user: user.to_string(),
                        invariant: "unexpected-error".to_string(),
                        details: message.clone(),
                    }));
                }
                // Every cart is loaded during setup, so a snapshot always exists.
                match &before {
                    Some(snapshot) => {
                        self.record(check_rollback(step, &user, snapshot, after.as_ref()))
                    }
                    None => self.record(check_snapshot_captured(step, &user, None)),
                }
                self.trace(&op, format!("failed: {}", message));
            }
        }
    }

    /// Issue several mutations for one user before awaiting any of them,
    /// then await them in issue order and check the user's cart converges.
    pub async fn burst(&mut self, user: &UserId, size: usize) {
        let mut pending = Vec::with_capacity(size);

        for _ in 0..size {
            let step = self.step;
            self.step += 1;

            let before = self.visible(user);
            let op = generate_mutation(&mut self.rng, user, &self.products, before.as_ref());
            let predicted = self.oracle.predict(before.as_ref(), &op);

            let Some(future) = self.issue(&op) else {
                continue;
            };
            let during = self.visible(user);
            self.record(check_unique_products(step, user, during.as_ref()));
            if self.config.policy == MutationPolicy::Concurrent {
                self.record(check_speculative(step, user, &predicted, during.as_ref()));
            }
            pending.push((op, future));
        }

        for (op, future) in pending {
            match future.await {
                Ok(()) => {
                    self.oracle.commit(&op);
                    self.trace(&op, "ok (burst)");
                }
                Err(e) => {
                    let message = e.to_string();
                    if !is_injected_fault(&message) {
                        self.record(Some(Violation {
                            step: self.step,
                            user: user.to_string(),
                            invariant: "unexpected-error".to_string(),
                            details: message.clone(),
                        }));
                    }
                    self.trace(&op, format!("failed (burst): {}", message));
                }
            }
        }

        self.check_user_converged(user).await;
    }

    /// Wait for the user's refresh and compare store, service and oracle.
    /// Skipped when the last refresh itself failed.
    async fn check_user_converged(&mut self, user: &UserId) {
        self.cart.settled(user).await;
        let key = QueryKey::cart(user);
        if self.cart.store().is_stale(&key) {
            debug!(user_id = %user, "refresh failed, skipping convergence check");
            return;
        }
        let store = self.visible(user);
        let service = self.service.inner().cart(user);
        let oracle = self.oracle.server(user);
        let violations = check_convergence(self.step, user, store.as_ref(), &service, &oracle);
        self.violations.extend(violations);
    }

    /// Disable faults, force a refresh of every cart and check convergence.
    pub async fn finish(&mut self) {
        self.service.set_enabled(false);
        let users = self.users.clone();
        for user in &users {
            self.cart.store().invalidate(&QueryKey::cart(user));
            self.check_user_converged(user).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_run_has_no_violations() {
        let mut sim = Sim::new(1).await;
        let violations = sim.run(200).await;
        assert!(violations.is_empty(), "{:?}", violations);
        assert!(!sim.trace.is_empty());
    }

    #[tokio::test]
    async fn test_setup_loads_every_cart() {
        let sim = Sim::new(2).await;
        assert!(sim.violations.is_empty(), "{:?}", sim.violations);
        for user in &sim.users {
            let visible = sim.cart.cart(user).expect("cart loaded during setup");
            assert_eq!(lines_of(&visible), sim.oracle.server(user));
            assert_eq!(visible.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_failures_roll_back_to_loaded_snapshots() {
        let mut sim = Sim::new_with_faults(8, Some(FaultConfig::mutations(1.0))).await;
        let user = sim.users[0].clone();
        let loaded = sim.cart.cart(&user).unwrap();
        let product = sim.products[4].clone();

        sim.step_with(Op::Add {
            user: user.clone(),
            product,
            quantity: Some(1),
        })
        .await;

        assert!(sim.violations.is_empty(), "{:?}", sim.violations);
        assert_eq!(sim.cart.cart(&user), Some(loaded));
        let snap = sim.cart.metrics().snapshot();
        assert_eq!((snap.rollbacks, snap.rollbacks_skipped), (1, 0));
    }

    #[tokio::test]
    async fn test_same_seed_same_trace() {
        let mut a = Sim::new_with_faults(9, Some(FaultConfig::mutations(0.3))).await;
        let mut b = Sim::new_with_faults(9, Some(FaultConfig::mutations(0.3))).await;
        a.run(100).await;
        b.run(100).await;

        let ops_a: Vec<_> = a.trace.iter().map(|t| (&t.op, &t.outcome)).collect();
        let ops_b: Vec<_> = b.trace.iter().map(|t| (&t.op, &t.outcome)).collect();
        assert_eq!(ops_a, ops_b);
    }

    #[tokio::test]
    async fn test_faults_trigger_rollbacks() {
        let mut sim = Sim::new_with_faults(3, Some(FaultConfig::mutations(0.5))).await;
        let report = sim.run_report(150).await;
        assert!(report.passed(), "{:?}", report.violations);
        assert!(report.faults.mutation_faults > 0);
        assert!(report.mutations.rollbacks > 0);
    }
}
