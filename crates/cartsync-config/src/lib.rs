mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_QUANTITY, DEFAULT_SERVICE_LATENCY_MS, DEFAULT_STALE_TIME_MS,
};
pub use env::interpolate_env;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid value for '{0}': {1}")]
    InvalidField(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CartsyncConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: CartsyncConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_minimal_config() {
        let config = CartsyncConfig::from_yaml("name: storefront\n").unwrap();
        assert_eq!(config.name, Some("storefront".to_string()));
        assert_eq!(config.store, StoreConfig::default());
        assert!(config.mutation.policy.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
name: storefront
store:
  stale_time: 45s
  refetch_on_invalidate: false
mutation:
  policy: serialized
service:
  latency: 5ms
  max_quantity: 10
  failure_rate: 0.25
log_level: debug
"#;

        let config = CartsyncConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.store.stale_time.as_ref().map(HumanDuration::as_duration),
            Some(Duration::from_secs(45))
        );
        assert_eq!(config.store.refetch_on_invalidate, Some(false));
        assert_eq!(config.mutation.policy, Some(MutationPolicy::Serialized));
        assert_eq!(
            config.service.latency.as_ref().map(HumanDuration::as_duration),
            Some(Duration::from_millis(5))
        );
        assert_eq!(config.service.max_quantity, Some(10));
        assert_eq!(config.service.failure_rate, Some(0.25));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("CARTSYNC_TEST_POLICY", "serialized");

        let yaml = "mutation:\n  policy: ${CARTSYNC_TEST_POLICY}\n";
        let config = CartsyncConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mutation.policy, Some(MutationPolicy::Serialized));
    }

    #[test]
    fn test_unknown_policy_is_yaml_error() {
        let result = CartsyncConfig::from_yaml("mutation:\n  policy: sometimes\n");
        assert!(matches!(result, Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: from-disk\nservice:\n  max_quantity: 4").unwrap();

        let config = CartsyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("from-disk"));
        assert_eq!(config.service.max_quantity, Some(4));
    }

    #[test]
    fn test_effective_yaml_reparses() {
        let effective = CartsyncConfig::default().effective();
        let yaml = effective.to_yaml().unwrap();
        let reparsed = CartsyncConfig::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed, effective);
    }
}
