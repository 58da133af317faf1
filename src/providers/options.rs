// =============================================================================
// Options Provider — put/call ratio, IV percentile, gamma bias
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProviderEndpoint;
use crate::types::{DataSource, GammaBias};

use super::{build_client, get_json, num_field, probe_base, str_field, FetchReport};

/// Options positioning snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionsData {
    pub put_call_ratio: f64,
    /// Implied-volatility percentile rank in [0, 100].
    pub iv_percentile: f64,
    pub gamma_bias: GammaBias,
    pub data_source: DataSource,
}

impl OptionsData {
    /// Neutral constant used whenever the provider cannot be read.
    pub fn fallback() -> Self {
        Self {
            put_call_ratio: 1.0,
            iv_percentile: 50.0,
            gamma_bias: GammaBias::Neutral,
            data_source: DataSource::Fallback,
        }
    }
}

pub struct OptionsProvider {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl OptionsProvider {
    pub fn new(endpoint: &ProviderEndpoint, deadline: Duration) -> Self {
        Self {
            client: build_client(&endpoint.api_key, deadline),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            deadline,
        }
    }

    /// Fetch the options snapshot for `symbol`. Always returns within the
    /// deadline plus scheduling slack; failure yields the fallback.
    pub async fn fetch(&self, symbol: &str) -> FetchReport<OptionsData> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.deadline, self.fetch_inner(symbol)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(data)) => {
                debug!(symbol, latency_ms, "options data fetched");
                FetchReport::live(data, latency_ms)
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "options fetch failed, using fallback");
                FetchReport::fallback(OptionsData::fallback(), e.to_string(), latency_ms)
            }
            Err(_) => {
                warn!(
                    symbol,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "options fetch missed deadline, using fallback"
                );
                FetchReport::fallback(
                    OptionsData::fallback(),
                    format!("deadline of {}ms exceeded", self.deadline.as_millis()),
                    latency_ms,
                )
            }
        }
    }

    async fn fetch_inner(&self, symbol: &str) -> Result<OptionsData> {
        let url = format!("{}/v1/options/summary?symbol={symbol}", self.base_url);
        let body = get_json(&self.client, &url).await?;

        let put_call_ratio = num_field(&body, "put_call_ratio")?;
        let iv_percentile = num_field(&body, "iv_percentile")?.clamp(0.0, 100.0);
        let gamma_raw = str_field(&body, "gamma_bias")?;
        let gamma_bias = GammaBias::parse(gamma_raw)
            .ok_or_else(|| anyhow::anyhow!("unknown gamma_bias '{gamma_raw}'"))?;

        Ok(OptionsData {
            put_call_ratio,
            iv_percentile,
            gamma_bias,
            data_source: DataSource::Api,
        })
    }

    /// Connectivity check for the health endpoint.
    pub async fn probe(&self) -> bool {
        probe_base(&self.client, &self.base_url).await
    }

    pub fn name(&self) -> &'static str {
        "options"
    }
}

impl std::fmt::Debug for OptionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsProvider")
            .field("base_url", &self.base_url)
            .field("deadline", &self.deadline)
            .finish()
    }
}
