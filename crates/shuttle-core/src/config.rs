//! Typed configuration for pools and dispatchers.
//!
//! Values can come from serde (embedding in a larger config file) or from
//! environment variables via [`ShuttleConfig::from_env`]. Malformed values
//! fail fast; missing ones fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_WORKERS: &str = "SHUTTLE_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "SHUTTLE_QUEUE_CAPACITY";
pub const ENV_DRAIN_POLICY: &str = "SHUTTLE_DRAIN_POLICY";
pub const ENV_DISPATCH_TIMEOUT_MS: &str = "SHUTTLE_DISPATCH_TIMEOUT_MS";

/// What happens to already-queued items when the pool shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Workers keep taking items until the sealed queue is empty.
    #[default]
    DrainOnShutdown,
    /// Workers finish their current item and exit; queued items are discarded.
    StopImmediately,
}

impl std::str::FromStr for DrainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" | "drain_on_shutdown" => Ok(DrainPolicy::DrainOnShutdown),
            "stop" | "stop_immediately" => Ok(DrainPolicy::StopImmediately),
            other => Err(format!("expected `drain` or `stop`, got `{other}`")),
        }
    }
}

/// Intake queue size.
///
/// `Bounded(0)` is a rendezvous queue: a submission completes only when a
/// worker takes the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    Bounded(usize),
    Unbounded,
}

impl Default for QueueCapacity {
    fn default() -> Self {
        QueueCapacity::Bounded(64)
    }
}

impl std::str::FromStr for QueueCapacity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(QueueCapacity::Unbounded);
        }
        s.parse::<usize>()
            .map(QueueCapacity::Bounded)
            .map_err(|e| format!("expected a number or `unbounded`: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: QueueCapacity,
    pub drain_policy: DrainPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: QueueCapacity::default(),
            drain_policy: DrainPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Used by `Dispatcher::dispatch_default`.
    #[serde(with = "millis")]
    pub default_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
}

impl ShuttleConfig {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `lookup`, which
    /// keeps tests away from the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parsed(&lookup, ENV_WORKERS)? {
            config.pool.workers = workers;
        }
        if let Some(capacity) = parsed(&lookup, ENV_QUEUE_CAPACITY)? {
            config.pool.queue_capacity = capacity;
        }
        if let Some(policy) = parsed(&lookup, ENV_DRAIN_POLICY)? {
            config.pool.drain_policy = policy;
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, ENV_DISPATCH_TIMEOUT_MS)? {
            config.dispatch.default_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ShuttleConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config, ShuttleConfig::default());
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = ShuttleConfig::from_lookup(env(&[
            (ENV_WORKERS, "8"),
            (ENV_QUEUE_CAPACITY, "unbounded"),
            (ENV_DRAIN_POLICY, "stop"),
            (ENV_DISPATCH_TIMEOUT_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.pool.queue_capacity, QueueCapacity::Unbounded);
        assert_eq!(config.pool.drain_policy, DrainPolicy::StopImmediately);
        assert_eq!(config.dispatch.default_timeout, Duration::from_millis(250));
    }

    #[rstest]
    #[case(ENV_WORKERS, "many")]
    #[case(ENV_QUEUE_CAPACITY, "-1")]
    #[case(ENV_DRAIN_POLICY, "later")]
    #[case(ENV_DISPATCH_TIMEOUT_MS, "1.5")]
    fn malformed_values_fail_fast(#[case] name: &str, #[case] value: &str) {
        let err = ShuttleConfig::from_lookup(env(&[(name, value)])).unwrap_err();
        assert!(err.to_string().contains(name));
    }

    #[rstest]
    #[case("0", QueueCapacity::Bounded(0))]
    #[case(" 16 ", QueueCapacity::Bounded(16))]
    #[case("Unbounded", QueueCapacity::Unbounded)]
    fn queue_capacity_parses(#[case] raw: &str, #[case] expected: QueueCapacity) {
        assert_eq!(raw.parse::<QueueCapacity>().unwrap(), expected);
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let config: ShuttleConfig = serde_json::from_value(serde_json::json!({
            "pool": { "workers": 2, "queue_capacity": { "bounded": 0 } },
            "dispatch": { "default_timeout": 100 }
        }))
        .unwrap();

        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.pool.queue_capacity, QueueCapacity::Bounded(0));
        assert_eq!(config.pool.drain_policy, DrainPolicy::DrainOnShutdown);
        assert_eq!(config.dispatch.default_timeout, Duration::from_millis(100));
    }
}
