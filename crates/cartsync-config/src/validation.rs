use crate::types::CartsyncConfig;
use crate::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

impl CartsyncConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Some(rate) = self.service.failure_rate {
            if !(0.0..=1.0).contains(&rate) || rate.is_nan() {
                errors.push(ConfigError::InvalidField(
                    "service.failure_rate".to_string(),
                    format!("must be between 0.0 and 1.0, got {}", rate),
                ));
            }
        }

        if self.service.max_quantity == Some(0) {
            errors.push(ConfigError::InvalidField(
                "service.max_quantity".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        if let Some(level) = &self.log_level {
            if !is_valid_filter(level) {
                errors.push(ConfigError::InvalidField(
                    "log_level".to_string(),
                    format!("unknown log level '{}'", level),
                ));
            }
        }

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig("name must not be blank".to_string()));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A bare level must be a known name; directive lists (`a=debug,b`) are left
/// for the subscriber to interpret.
fn is_valid_filter(level: &str) -> bool {
    let level = level.trim();
    if level.is_empty() {
        return false;
    }
    if level.contains('=') || level.contains(',') {
        return true;
    }
    LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CartsyncConfig::default().validate().is_empty());
        assert!(CartsyncConfig::default().effective().validate().is_empty());
    }

    #[test]
    fn test_failure_rate_out_of_range() {
        let mut config = CartsyncConfig::default();
        config.service.failure_rate = Some(1.5);

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidField(f, _) if f == "service.failure_rate")));
    }

    #[test]
    fn test_zero_max_quantity() {
        let mut config = CartsyncConfig::default();
        config.service.max_quantity = Some(0);
        assert!(config.validate_or_err().is_err());
    }

    #[test]
    fn test_log_level_checks() {
        let mut config = CartsyncConfig::default();

        config.log_level = Some("WARN".to_string());
        assert!(config.validate().is_empty());

        config.log_level = Some("cartsync_core=debug,info".to_string());
        assert!(config.validate().is_empty());

        config.log_level = Some("loud".to_string());
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = CartsyncConfig::default();
        config.name = Some("  ".to_string());
        config.service.failure_rate = Some(-0.1);
        config.service.max_quantity = Some(0);
        assert_eq!(config.validate().len(), 3);
    }
}
