// =============================================================================
// Market-Stats Provider — ATR(14), realized vol (20), trend slope
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProviderEndpoint;
use crate::types::DataSource;

use super::{build_client, get_json, num_field, probe_base, FetchReport};

/// Volatility/trend snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStatsData {
    pub atr14: f64,
    pub rv20: f64,
    pub trend_slope: f64,
    pub data_source: DataSource,
}

impl MarketStatsData {
    /// Permissive constant: a 1.0/1.0 ratio passes the volatility gate.
    pub fn fallback() -> Self {
        Self {
            atr14: 1.0,
            rv20: 1.0,
            trend_slope: 0.0,
            data_source: DataSource::Fallback,
        }
    }
}

pub struct MarketStatsProvider {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl MarketStatsProvider {
    pub fn new(endpoint: &ProviderEndpoint, deadline: Duration) -> Self {
        Self {
            client: build_client(&endpoint.api_key, deadline),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            deadline,
        }
    }

    pub async fn fetch(&self, symbol: &str) -> FetchReport<MarketStatsData> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.deadline, self.fetch_inner(symbol)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(data)) => {
                debug!(symbol, latency_ms, "market stats fetched");
                FetchReport::live(data, latency_ms)
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "market-stats fetch failed, using fallback");
                FetchReport::fallback(MarketStatsData::fallback(), e.to_string(), latency_ms)
            }
            Err(_) => {
                warn!(
                    symbol,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "market-stats fetch missed deadline, using fallback"
                );
                FetchReport::fallback(
                    MarketStatsData::fallback(),
                    format!("deadline of {}ms exceeded", self.deadline.as_millis()),
                    latency_ms,
                )
            }
        }
    }

    async fn fetch_inner(&self, symbol: &str) -> Result<MarketStatsData> {
        let url = format!("{}/v1/market-stats?symbol={symbol}", self.base_url);
        let body = get_json(&self.client, &url).await?;

        Ok(MarketStatsData {
            atr14: num_field(&body, "atr14")?,
            rv20: num_field(&body, "rv20")?,
            trend_slope: num_field(&body, "trend_slope")?,
            data_source: DataSource::Api,
        })
    }

    pub async fn probe(&self) -> bool {
        probe_base(&self.client, &self.base_url).await
    }

    pub fn name(&self) -> &'static str {
        "market_stats"
    }
}

impl std::fmt::Debug for MarketStatsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStatsProvider")
            .field("base_url", &self.base_url)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_constants_are_exact() {
        let fb = MarketStatsData::fallback();
        assert_eq!(fb.atr14, 1.0);
        assert_eq!(fb.rv20, 1.0);
        assert_eq!(fb.trend_slope, 0.0);
        assert_eq!(fb.data_source, DataSource::Fallback);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_fallback() {
        let endpoint = ProviderEndpoint {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test-key-0000".to_string(),
        };
        let provider = MarketStatsProvider::new(&endpoint, Duration::from_millis(600));
        let report = provider.fetch("SPY").await;
        assert_eq!(report.source, DataSource::Fallback);
        assert_eq!(report.data, MarketStatsData::fallback());
    }
}
