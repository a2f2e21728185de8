use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;

use crate::ConfigError;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();

    let result = placeholder().replace_all(input, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m| m == var_name) {
                    missing.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("CARTSYNC_TEST_NAME", "storefront");
        env::set_var("CARTSYNC_TEST_LEVEL", "debug");

        let input = "name: ${CARTSYNC_TEST_NAME}\nlog_level: ${CARTSYNC_TEST_LEVEL}";
        let result = interpolate_env(input).unwrap();
        assert_eq!(result, "name: storefront\nlog_level: debug");
    }

    #[test]
    fn test_interpolate_env_missing_collects_each_name_once() {
        let input = "${CARTSYNC_MISSING_A} ${CARTSYNC_MISSING_B} ${CARTSYNC_MISSING_A}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["CARTSYNC_MISSING_A", "CARTSYNC_MISSING_B"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        assert_eq!(interpolate_env("").unwrap(), "");
        assert_eq!(interpolate_env("plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_interpolate_env_repeated_and_adjacent() {
        env::set_var("CARTSYNC_TEST_A", "x");
        env::set_var("CARTSYNC_TEST_B", "y");
        let input = "${CARTSYNC_TEST_A}${CARTSYNC_TEST_B}-${CARTSYNC_TEST_A}";
        assert_eq!(interpolate_env(input).unwrap(), "xy-x");
    }

    #[test]
    fn test_interpolate_env_partial_syntax_not_matched() {
        assert_eq!(interpolate_env("a $VAR b").unwrap(), "a $VAR b");
        assert_eq!(interpolate_env("a ${VAR b").unwrap(), "a ${VAR b");
    }

    #[test]
    fn test_interpolate_env_value_is_not_reexpanded() {
        env::set_var("CARTSYNC_TEST_DOLLAR", "${CARTSYNC_TEST_A}");
        let result = interpolate_env("${CARTSYNC_TEST_DOLLAR}").unwrap();
        assert_eq!(result, "${CARTSYNC_TEST_A}");
    }
}
