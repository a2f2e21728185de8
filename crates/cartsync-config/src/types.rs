use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// How mutations for the same user are scheduled against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// Mutations run as soon as they are issued; same-user calls race
    /// last-write-wins on the cache key.
    #[default]
    Concurrent,
    /// Mutations for one user queue behind each other until settled.
    Serialized,
}

impl fmt::Display for MutationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationPolicy::Concurrent => write!(f, "concurrent"),
            MutationPolicy::Serialized => write!(f, "serialized"),
        }
    }
}

impl FromStr for MutationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(MutationPolicy::Concurrent),
            "serialized" => Ok(MutationPolicy::Serialized),
            other => Err(format!(
                "Unknown mutation policy '{}' (expected concurrent or serialized)",
                other
            )),
        }
    }
}

/// Human-readable duration (e.g., "200ms", "30s", "5m").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn from_millis(millis: u64) -> Self {
        HumanDuration(std::time::Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            _ => std::time::Duration::from_secs(num * 3600),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 || millis == 0 {
            write!(f, "{}ms", millis)
        } else if secs % 60 != 0 {
            write!(f, "{}s", secs)
        } else if secs % 3600 != 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}h", secs / 3600)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Query store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Age after which a cached value counts as stale even if never invalidated.
    #[serde(default)]
    pub stale_time: Option<HumanDuration>,
    /// Whether `invalidate` schedules a background refresh.
    #[serde(default)]
    pub refetch_on_invalidate: Option<bool>,
}

/// Mutation coordinator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default)]
    pub policy: Option<MutationPolicy>,
}

/// Settings for the in-memory cart service used by scenarios and simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Artificial latency added to every remote call.
    #[serde(default)]
    pub latency: Option<HumanDuration>,
    /// Server-side clamp on a line item's quantity.
    #[serde(default)]
    pub max_quantity: Option<u32>,
    /// Probability (0.0-1.0) that a mutation call fails.
    #[serde(default)]
    pub failure_rate: Option<f64>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartsyncConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parsing() {
        assert_eq!(
            HumanDuration::from_str("200ms").unwrap().as_duration(),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            HumanDuration::from_str("30s").unwrap().as_duration(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            HumanDuration::from_str("5m").unwrap().as_duration(),
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            HumanDuration::from_str("1h").unwrap().as_duration(),
            std::time::Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            MutationPolicy::from_str("Serialized").unwrap(),
            MutationPolicy::Serialized
        );
        assert_eq!(
            "concurrent".parse::<MutationPolicy>().unwrap(),
            MutationPolicy::Concurrent
        );
        assert!(MutationPolicy::from_str("queued").is_err());
    }

    #[test]
    fn test_human_duration_rejects_garbage() {
        assert!(HumanDuration::from_str("soon").is_err());
        assert!(HumanDuration::from_str("10").is_err());
        assert!(HumanDuration::from_str("xms").is_err());
    }

    #[test]
    fn test_human_duration_display() {
        assert_eq!(HumanDuration::from_millis(250).to_string(), "250ms");
        assert_eq!(HumanDuration::from_millis(30_000).to_string(), "30s");
        assert_eq!(HumanDuration::from_millis(120_000).to_string(), "2m");
        assert_eq!(HumanDuration::from_millis(1500).to_string(), "1500ms");
    }

    #[test]
    fn test_mutation_policy_serde() {
        let policy: MutationPolicy = serde_yaml::from_str("serialized").unwrap();
        assert_eq!(policy, MutationPolicy::Serialized);
        assert_eq!(MutationPolicy::default(), MutationPolicy::Concurrent);
    }
}
