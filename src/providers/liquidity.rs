// =============================================================================
// Liquidity Provider — spread, depth, tape velocity
// =============================================================================
//
// The fallback here is the engine's safety net: a 999 bps spread guarantees
// the spread gate fails whenever liquidity cannot actually be observed.
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProviderEndpoint;
use crate::types::{DataSource, TradeVelocity};

use super::{build_client, get_json, num_field, probe_base, str_field, FetchReport};

/// Order-book liquidity snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityData {
    pub spread_bps: f64,
    /// Book depth score in [0, 100].
    pub depth_score: f64,
    pub trade_velocity: TradeVelocity,
    pub data_source: DataSource,
}

impl LiquidityData {
    /// Fail-closed constant: unobservable liquidity reads as untradeable.
    pub fn fallback() -> Self {
        Self {
            spread_bps: 999.0,
            depth_score: 0.0,
            trade_velocity: TradeVelocity::Slow,
            data_source: DataSource::Fallback,
        }
    }
}

pub struct LiquidityProvider {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl LiquidityProvider {
    pub fn new(endpoint: &ProviderEndpoint, deadline: Duration) -> Self {
        Self {
            client: build_client(&endpoint.api_key, deadline),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            deadline,
        }
    }

    pub async fn fetch(&self, symbol: &str) -> FetchReport<LiquidityData> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.deadline, self.fetch_inner(symbol)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(data)) => {
                debug!(symbol, latency_ms, "liquidity data fetched");
                FetchReport::live(data, latency_ms)
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "liquidity fetch failed, using fallback");
                FetchReport::fallback(LiquidityData::fallback(), e.to_string(), latency_ms)
            }
            Err(_) => {
                warn!(
                    symbol,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "liquidity fetch missed deadline, using fallback"
                );
                FetchReport::fallback(
                    LiquidityData::fallback(),
                    format!("deadline of {}ms exceeded", self.deadline.as_millis()),
                    latency_ms,
                )
            }
        }
    }

    async fn fetch_inner(&self, symbol: &str) -> Result<LiquidityData> {
        let url = format!("{}/v1/liquidity?symbol={symbol}", self.base_url);
        let body = get_json(&self.client, &url).await?;

        let spread_bps = num_field(&body, "spread_bps")?;
        let depth_score = num_field(&body, "depth_score")?.clamp(0.0, 100.0);
        let velocity_raw = str_field(&body, "trade_velocity")?;
        let trade_velocity = TradeVelocity::parse(velocity_raw)
            .ok_or_else(|| anyhow::anyhow!("unknown trade_velocity '{velocity_raw}'"))?;

        Ok(LiquidityData {
            spread_bps,
            depth_score,
            trade_velocity,
            data_source: DataSource::Api,
        })
    }

    pub async fn probe(&self) -> bool {
        probe_base(&self.client, &self.base_url).await
    }

    pub fn name(&self) -> &'static str {
        "liquidity"
    }
}

impl std::fmt::Debug for LiquidityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidityProvider")
            .field("base_url", &self.base_url)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_fails_the_spread_gate_by_construction() {
        let fb = LiquidityData::fallback();
        assert_eq!(fb.spread_bps, 999.0);
        assert_eq!(fb.depth_score, 0.0);
        assert_eq!(fb.trade_velocity, TradeVelocity::Slow);
        assert_eq!(fb.data_source, DataSource::Fallback);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_fallback() {
        let endpoint = ProviderEndpoint {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test-key-0000".to_string(),
        };
        let provider = LiquidityProvider::new(&endpoint, Duration::from_millis(600));
        let report = provider.fetch("SPY").await;
        assert_eq!(report.source, DataSource::Fallback);
        assert_eq!(report.data.spread_bps, 999.0);
        assert!(report.error.is_some());
    }
}
