use crate::types::{CartsyncConfig, HumanDuration, MutationPolicy};

pub const DEFAULT_STALE_TIME_MS: u64 = 30_000;
pub const DEFAULT_SERVICE_LATENCY_MS: u64 = 20;
pub const DEFAULT_MAX_QUANTITY: u32 = 99;
pub const DEFAULT_LOG_LEVEL: &str = "info";

impl CartsyncConfig {
    /// Fill every unset field with its default.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        if self.name.is_none() {
            self.name = Some("cartsync".to_string());
        }

        let store = &mut self.store;
        store
            .stale_time
            .get_or_insert_with(|| HumanDuration::from_millis(DEFAULT_STALE_TIME_MS));
        store.refetch_on_invalidate.get_or_insert(true);

        self.mutation.policy.get_or_insert(MutationPolicy::Concurrent);

        let service = &mut self.service;
        service
            .latency
            .get_or_insert_with(|| HumanDuration::from_millis(DEFAULT_SERVICE_LATENCY_MS));
        service.max_quantity.get_or_insert(DEFAULT_MAX_QUANTITY);
        service.failure_rate.get_or_insert(0.0);

        if self.log_level.is_none() {
            self.log_level = Some(DEFAULT_LOG_LEVEL.to_string());
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> CartsyncConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}
