//! HTTP clients for DEX APIs.
//!
//! Both APIs return numbers as JSON strings; DTOs keep them as strings and the
//! curve builders parse at the float boundary.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::CurveError;

const EKUBO_BASE_URL: &str = "https://mainnet-api.ekubo.org";
const HAIKO_BASE_URL: &str = "https://app.haiko.xyz/api/v1";

/// Bounded retry with doubling backoff for transient HTTP failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds, fails non-transiently, or the
    /// attempt budget runs out. Only transport-level errors are retried;
    /// decode failures and unsupported pairs are final on the first try.
    pub async fn run<T, F, Fut>(&self, what: &str, operation: F) -> Result<T, CurveError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CurveError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err @ CurveError::Http(_)) if attempt < self.max_attempts => {
                    warn!(
                        target = what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after transient HTTP failure"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Parses a stringly-typed API number.
pub(crate) fn parse_number(value: &str, what: &str) -> Result<f64, CurveError> {
    value
        .parse::<f64>()
        .map_err(|_| CurveError::MissingPrice(format!("{what}: {value:?}")))
}

// ============================================================================
// Ekubo
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EkuboPool {
    pub key_hash: String,
    pub token0: String,
    pub token1: String,
    pub liquidity: String,
    pub tick: i64,
    pub tick_spacing: i64,
    #[serde(rename = "lastUpdate")]
    pub last_update: EkuboPoolUpdate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EkuboPoolUpdate {
    pub event_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EkuboLiquidityTick {
    pub tick: i64,
    pub net_liquidity_delta_diff: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EkuboLiquidityResponse {
    data: Vec<EkuboLiquidityTick>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EkuboPairPrice {
    pub price: String,
}

/// Client for the Ekubo mainnet API.
#[derive(Debug, Clone)]
pub struct EkuboClient {
    http: reqwest::Client,
    base_url: String,
}

impl EkuboClient {
    pub fn new() -> Self {
        Self::with_base_url(EKUBO_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn get_pools(&self) -> Result<Vec<EkuboPool>, CurveError> {
        let url = format!("{}/pools", self.base_url);
        Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
    }

    pub async fn get_pool_liquidity(
        &self,
        key_hash: &str,
    ) -> Result<Vec<EkuboLiquidityTick>, CurveError> {
        let url = format!("{}/pools/{key_hash}/liquidity", self.base_url);
        let response: EkuboLiquidityResponse =
            self.http.get(&url).send().await?.error_for_status()?.json().await?;
        Ok(response.data)
    }

    pub async fn get_pair_price(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<EkuboPairPrice, CurveError> {
        let url = format!("{}/price/{base}/{quote}", self.base_url);
        Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
    }
}

impl Default for EkuboClient {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Haiko
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HaikoMarket {
    #[serde(rename = "marketId")]
    pub market_id: String,
    #[serde(rename = "currPrice")]
    pub curr_price: String,
    pub tvl: String,
    #[serde(rename = "baseToken")]
    pub base_token: HaikoMarketToken,
    #[serde(rename = "quoteToken")]
    pub quote_token: HaikoMarketToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaikoMarketToken {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaikoDepthEntry {
    pub price: String,
    #[serde(rename = "liquidityCumulative")]
    pub liquidity_cumulative: String,
}

/// Client for the Haiko markets API.
#[derive(Debug, Clone)]
pub struct HaikoClient {
    http: reqwest::Client,
    base_url: String,
}

impl HaikoClient {
    pub fn new() -> Self {
        Self::with_base_url(HAIKO_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn get_pair_markets(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<Vec<HaikoMarket>, CurveError> {
        let url = format!(
            "{}/markets?network=mainnet&baseToken={base}&quoteToken={quote}",
            self.base_url
        );
        Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
    }

    pub async fn get_market_depth(
        &self,
        market_id: &str,
    ) -> Result<Vec<HaikoDepthEntry>, CurveError> {
        let url = format!("{}/depth?network=mainnet&id={market_id}", self.base_url);
        Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
    }
}

impl Default for HaikoClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_passes_through_success() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CurveError>(7u32) }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CurveError::MissingPrice("quote".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_number_rejects_garbage() {
        assert!(parse_number("1.5", "x").is_ok());
        assert!(parse_number("", "x").is_err());
        assert!(parse_number("abc", "x").is_err());
    }
}
