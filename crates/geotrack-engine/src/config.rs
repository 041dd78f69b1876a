//! Engine configuration.
//!
//! Defaults suit a single-region deployment. Every field can be overridden
//! through a `GEOTRACK_*` environment variable; see [`EngineConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

/// Tunables for ingestion, detection, queries, and retention.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Samples with a larger accuracy radius are stored low-confidence and
    /// never validated.
    pub accuracy_ceiling_m: f64,
    /// Consecutive OUTSIDE samples required before a violation is opened.
    pub debounce_threshold: u32,
    /// When set, returning inside only flags a violation `auto_resolvable`
    /// and closing it is left to a supervisor.
    pub require_manual_resolution: bool,
    pub zone_cache_ttl: Duration,
    /// An agent counts as active if it reported within this window.
    pub freshness_window: Duration,
    pub history_default_limit: usize,
    pub history_max_limit: usize,
    pub shard_count: usize,
    pub shard_queue_capacity: usize,
    pub ingest_timeout: Duration,
    /// Horizon used by the scheduled janitor.
    pub retention_days: u32,
    pub retention_interval: Duration,
    /// Rows deleted per statement during retention sweeps.
    pub retention_batch_size: usize,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accuracy_ceiling_m: 100.0,
            debounce_threshold: 2,
            require_manual_resolution: false,
            zone_cache_ttl: Duration::from_secs(60),
            freshness_window: Duration::from_secs(15 * 60),
            history_default_limit: 100,
            history_max_limit: 1000,
            shard_count: 16,
            shard_queue_capacity: 1024,
            ingest_timeout: Duration::from_millis(5000),
            retention_days: 30,
            retention_interval: Duration::from_secs(24 * 60 * 60),
            retention_batch_size: 5000,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    ///
    /// Variables:
    /// - `GEOTRACK_ACCURACY_CEILING_M` (default: 100)
    /// - `GEOTRACK_DEBOUNCE_THRESHOLD` (default: 2)
    /// - `GEOTRACK_MANUAL_RESOLUTION` (default: false)
    /// - `GEOTRACK_ZONE_CACHE_TTL_SECS` (default: 60)
    /// - `GEOTRACK_FRESHNESS_WINDOW_SECS` (default: 900)
    /// - `GEOTRACK_HISTORY_DEFAULT_LIMIT` (default: 100)
    /// - `GEOTRACK_HISTORY_MAX_LIMIT` (default: 1000)
    /// - `GEOTRACK_SHARD_COUNT` (default: 16)
    /// - `GEOTRACK_SHARD_QUEUE_CAPACITY` (default: 1024)
    /// - `GEOTRACK_INGEST_TIMEOUT_MS` (default: 5000)
    /// - `GEOTRACK_RETENTION_DAYS` (default: 30)
    /// - `GEOTRACK_RETENTION_INTERVAL_SECS` (default: 86400)
    /// - `GEOTRACK_RETENTION_BATCH_SIZE` (default: 5000)
    /// - `GEOTRACK_EVENT_CAPACITY` (default: 1024)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set but does not
    /// parse, and [`ConfigError::OutOfRange`] when the resulting
    /// configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            accuracy_ceiling_m: parse_or(&lookup, "GEOTRACK_ACCURACY_CEILING_M", d.accuracy_ceiling_m)?,
            debounce_threshold: parse_or(&lookup, "GEOTRACK_DEBOUNCE_THRESHOLD", d.debounce_threshold)?,
            require_manual_resolution: parse_flag(
                &lookup,
                "GEOTRACK_MANUAL_RESOLUTION",
                d.require_manual_resolution,
            )?,
            zone_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "GEOTRACK_ZONE_CACHE_TTL_SECS",
                d.zone_cache_ttl.as_secs(),
            )?),
            freshness_window: Duration::from_secs(parse_or(
                &lookup,
                "GEOTRACK_FRESHNESS_WINDOW_SECS",
                d.freshness_window.as_secs(),
            )?),
            history_default_limit: parse_or(
                &lookup,
                "GEOTRACK_HISTORY_DEFAULT_LIMIT",
                d.history_default_limit,
            )?,
            history_max_limit: parse_or(&lookup, "GEOTRACK_HISTORY_MAX_LIMIT", d.history_max_limit)?,
            shard_count: parse_or(&lookup, "GEOTRACK_SHARD_COUNT", d.shard_count)?,
            shard_queue_capacity: parse_or(
                &lookup,
                "GEOTRACK_SHARD_QUEUE_CAPACITY",
                d.shard_queue_capacity,
            )?,
            ingest_timeout: Duration::from_millis(parse_or(
                &lookup,
                "GEOTRACK_INGEST_TIMEOUT_MS",
                d.ingest_timeout.as_millis() as u64,
            )?),
            retention_days: parse_or(&lookup, "GEOTRACK_RETENTION_DAYS", d.retention_days)?,
            retention_interval: Duration::from_secs(parse_or(
                &lookup,
                "GEOTRACK_RETENTION_INTERVAL_SECS",
                d.retention_interval.as_secs(),
            )?),
            retention_batch_size: parse_or(
                &lookup,
                "GEOTRACK_RETENTION_BATCH_SIZE",
                d.retention_batch_size,
            )?,
            event_capacity: parse_or(&lookup, "GEOTRACK_EVENT_CAPACITY", d.event_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.accuracy_ceiling_m.is_finite() || self.accuracy_ceiling_m <= 0.0 {
            return Err(ConfigError::OutOfRange(
                "accuracy_ceiling_m must be a positive number".into(),
            ));
        }
        if self.debounce_threshold == 0 {
            return Err(ConfigError::OutOfRange(
                "debounce_threshold must be at least 1".into(),
            ));
        }
        if self.history_default_limit == 0 || self.history_max_limit == 0 {
            return Err(ConfigError::OutOfRange("history limits must be positive".into()));
        }
        if self.history_default_limit > self.history_max_limit {
            return Err(ConfigError::OutOfRange(format!(
                "history_default_limit ({}) exceeds history_max_limit ({})",
                self.history_default_limit, self.history_max_limit
            )));
        }
        if self.shard_count == 0 || self.shard_queue_capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "shard_count and shard_queue_capacity must be positive".into(),
            ));
        }
        if self.ingest_timeout.is_zero() {
            return Err(ConfigError::OutOfRange("ingest_timeout must be positive".into()));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::OutOfRange("retention_days must be at least 1".into()));
        }
        if self.retention_interval.is_zero() || self.retention_batch_size == 0 {
            return Err(ConfigError::OutOfRange(
                "retention_interval and retention_batch_size must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::OutOfRange("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(var.to_string(), e.to_string())),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid(
                var.to_string(),
                format!("expected a boolean, got {other:?}"),
            )),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("configuration out of range: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.debounce_threshold, 2);
        assert_eq!(cfg.freshness_window, Duration::from_secs(900));
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("GEOTRACK_DEBOUNCE_THRESHOLD", "3"),
            ("GEOTRACK_MANUAL_RESOLUTION", "TRUE"),
            ("GEOTRACK_INGEST_TIMEOUT_MS", "250"),
            ("GEOTRACK_SHARD_COUNT", " 4 "),
        ]))
        .unwrap();
        assert_eq!(cfg.debounce_threshold, 3);
        assert!(cfg.require_manual_resolution);
        assert_eq!(cfg.ingest_timeout, Duration::from_millis(250));
        assert_eq!(cfg.shard_count, 4);
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let err = EngineConfig::from_lookup(lookup(&[("GEOTRACK_SHARD_COUNT", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(var, _) if var == "GEOTRACK_SHARD_COUNT"));

        let err = EngineConfig::from_lookup(lookup(&[("GEOTRACK_MANUAL_RESOLUTION", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(..)));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("GEOTRACK_DEBOUNCE_THRESHOLD", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange(_)));
    }

    #[test]
    fn default_limit_cannot_exceed_cap() {
        let cfg = EngineConfig {
            history_default_limit: 2000,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
