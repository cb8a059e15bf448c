//! Engine configuration.
//!
//! Defaults work out of the box; a TOML file selected through `LIQMON_CONFIG`
//! overrides them, and a handful of environment variables override the file
//! for the knobs that change between deployments.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use liqmon_api::{PriceRange, RetryPolicy};
use liqmon_chain::OnMalformed;

use crate::aggregator::SweepConfig;
use crate::error::EngineError;

/// Environment variable names.
pub mod env {
    pub const CONFIG_PATH: &str = "LIQMON_CONFIG";
    pub const EKUBO_URL: &str = "LIQMON_EKUBO_URL";
    pub const HAIKO_URL: &str = "LIQMON_HAIKO_URL";
    pub const ON_MALFORMED: &str = "LIQMON_ON_MALFORMED";
    pub const RETRY_ATTEMPTS: &str = "LIQMON_RETRY_ATTEMPTS";
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Hypothetical-price sweep for the aggregator.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Multiplicative window curve levels must fall in.
    #[serde(default)]
    pub price_range: PriceRangeConfig,

    #[serde(default)]
    pub fold: FoldConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig::default(),
            retry: RetryConfig::default(),
            sweep: SweepConfig::default(),
            price_range: PriceRangeConfig::default(),
            fold: FoldConfig::default(),
        }
    }
}

/// DEX API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_ekubo_url")]
    pub ekubo_base_url: String,

    #[serde(default = "default_haiko_url")]
    pub haiko_base_url: String,
}

fn default_ekubo_url() -> String {
    "https://mainnet-api.ekubo.org".to_string()
}
fn default_haiko_url() -> String {
    "https://app.haiko.xyz/api/v1".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            ekubo_base_url: default_ekubo_url(),
            haiko_base_url: default_haiko_url(),
        }
    }
}

/// HTTP retry budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }
}

/// Price-range filter bounds, as multipliers of the current price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceRangeConfig {
    #[serde(default = "default_range_lower")]
    pub lower_multiplier: f64,

    #[serde(default = "default_range_upper")]
    pub upper_multiplier: f64,
}

fn default_range_lower() -> f64 {
    0.0001
}
fn default_range_upper() -> f64 {
    100.0
}

impl Default for PriceRangeConfig {
    fn default() -> Self {
        Self {
            lower_multiplier: default_range_lower(),
            upper_multiplier: default_range_upper(),
        }
    }
}

impl PriceRangeConfig {
    pub fn range(&self) -> PriceRange {
        PriceRange {
            lower_multiplier: self.lower_multiplier,
            upper_multiplier: self.upper_multiplier,
        }
    }
}

/// What a ledger does with events that fail to decode or apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FoldConfig {
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
}

impl FoldConfig {
    pub fn policy(&self) -> OnMalformed {
        match self.on_malformed {
            MalformedPolicy::Skip => OnMalformed::SkipAndContinue,
            MalformedPolicy::Abort => OnMalformed::Abort,
        }
    }
}

impl EngineConfig {
    /// Loads a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("{path}: {err}")))?;
        toml::from_str(&content).map_err(|err| EngineError::Config(format!("{path}: {err}")))
    }

    /// Loads the file named by `LIQMON_CONFIG` (defaults otherwise), then
    /// applies environment overrides.
    pub fn load() -> Result<Self, EngineError> {
        let mut config = match std::env::var(env::CONFIG_PATH) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(env::EKUBO_URL) {
            self.endpoints.ekubo_base_url = url;
        }
        if let Ok(url) = std::env::var(env::HAIKO_URL) {
            self.endpoints.haiko_base_url = url;
        }
        if let Ok(policy) = std::env::var(env::ON_MALFORMED) {
            match policy.as_str() {
                "skip" => self.fold.on_malformed = MalformedPolicy::Skip,
                "abort" => self.fold.on_malformed = MalformedPolicy::Abort,
                other => tracing::warn!(value = other, "ignoring unknown fold policy"),
            }
        }
        if let Ok(attempts) = std::env::var(env::RETRY_ATTEMPTS) {
            match attempts.parse() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => tracing::warn!(value = %attempts, "ignoring unparsable retry budget"),
            }
        }
    }

    pub fn log_config(&self) {
        tracing::info!(
            ekubo = %self.endpoints.ekubo_base_url,
            haiko = %self.endpoints.haiko_base_url,
            "DEX endpoints"
        );
        tracing::info!(
            attempts = self.retry.max_attempts,
            backoff_ms = self.retry.initial_backoff_ms,
            "HTTP retry budget"
        );
        tracing::info!(
            sweep_steps = self.sweep.steps,
            sweep_upper = self.sweep.upper_multiplier,
            range_lower = self.price_range.lower_multiplier,
            range_upper = self.price_range.upper_multiplier,
            fold = ?self.fold.on_malformed,
            "Engine parameters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sweep.steps, 50);
        assert_eq!(config.fold.policy(), OnMalformed::SkipAndContinue);
        assert!(config.endpoints.ekubo_base_url.starts_with("https://"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [fold]
            on_malformed = "abort"

            [sweep]
            steps = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.fold.policy(), OnMalformed::Abort);
        assert_eq!(config.sweep.steps, 25);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sweep.upper_multiplier, 1.2);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EngineConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
        assert_eq!(
            parsed.price_range.upper_multiplier,
            config.price_range.upper_multiplier
        );
    }
}
