use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cartsync_core::{CartItem, CartService, CartSnapshot, MemoryCartService, RemoteError, UserId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::Mutex;

/// Prefix used in error messages to distinguish injected faults from real errors.
pub const FAULT_PREFIX: &str = "[fault-injected]";

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability that a mutation call fails before reaching the service (0.0-1.0).
    pub error_rate: f64,
    /// Probability that a cart read fails (0.0-1.0).
    pub fetch_error_rate: f64,
}

impl FaultConfig {
    pub fn mutations(error_rate: f64) -> Self {
        FaultConfig {
            error_rate,
            fetch_error_rate: 0.0,
        }
    }
}

/// Statistics about injected faults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FaultStats {
    pub mutation_faults: usize,
    pub fetch_faults: usize,
}

/// A cart service wrapper that randomly fails calls.
pub struct FaultyCartService {
    inner: Arc<MemoryCartService>,
    rng: Mutex<ChaCha8Rng>,
    config: FaultConfig,
    enabled: AtomicBool,
    mutation_faults: AtomicUsize,
    fetch_faults: AtomicUsize,
}

impl FaultyCartService {
    pub fn new(inner: Arc<MemoryCartService>, rng: ChaCha8Rng, config: FaultConfig) -> Self {
        FaultyCartService {
            inner,
            rng: Mutex::new(rng),
            config,
            enabled: AtomicBool::new(true),
            mutation_faults: AtomicUsize::new(0),
            fetch_faults: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryCartService> {
        &self.inner
    }

    /// Turn injection on or off without touching the RNG stream.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            mutation_faults: self.mutation_faults.load(Ordering::Relaxed),
            fetch_faults: self.fetch_faults.load(Ordering::Relaxed),
        }
    }

    async fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 || !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let roll: f64 = self.rng.lock().await.gen();
        roll < rate
    }

    /// Generate a random injected error (Unavailable or Timeout).
    async fn injected_error(&self, op: &str) -> RemoteError {
        let use_timeout: bool = self.rng.lock().await.gen();
        if use_timeout {
            RemoteError::Timeout {
                operation: format!("{} {}", FAULT_PREFIX, op),
            }
        } else {
            RemoteError::Unavailable {
                service: format!("{} faulty", FAULT_PREFIX),
                source: Box::new(std::io::Error::other(format!(
                    "{} connection failed during {}",
                    FAULT_PREFIX, op
                ))),
            }
        }
    }

    async fn mutation_fault(&self, op: &str) -> Option<RemoteError> {
        if !self.roll(self.config.error_rate).await {
            return None;
        }
        self.mutation_faults.fetch_add(1, Ordering::Relaxed);
        Some(self.injected_error(op).await)
    }
}

#[async_trait]
impl CartService for FaultyCartService {
    async fn add_to_cart(&self, item: &CartItem) -> Result<CartItem, RemoteError> {
        if let Some(e) = self.mutation_fault("add_to_cart").await {
            return Err(e);
        }
        self.inner.add_to_cart(item).await
    }

    async fn remove_from_cart(&self, item: &CartItem) -> Result<(), RemoteError> {
        if let Some(e) = self.mutation_fault("remove_from_cart").await {
            return Err(e);
        }
        self.inner.remove_from_cart(item).await
    }

    async fn fetch_cart(&self, user_id: &UserId) -> Result<CartSnapshot, RemoteError> {
        if self.roll(self.config.fetch_error_rate).await {
            self.fetch_faults.fetch_add(1, Ordering::Relaxed);
            return Err(self.injected_error("fetch_cart").await);
        }
        self.inner.fetch_cart(user_id).await
    }
}

/// Check if an error was injected by the fault layer.
pub fn is_injected_fault(msg: &str) -> bool {
    msg.contains(FAULT_PREFIX)
}
