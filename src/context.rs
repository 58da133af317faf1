// =============================================================================
// Market Context Builder — parallel three-provider fan-out under one deadline
// =============================================================================
//
// Launches the options, market-stats, and liquidity fetches concurrently.
// Each provider already enforces its own per-call deadline; the builder adds
// the shared per-request budget on top, so a build never outlives
// min(shared deadline, slowest provider deadline) by more than scheduling
// slack. A provider that misses either deadline is cancelled (its future is
// dropped, aborting the in-flight request) and contributes its fallback.
// The build itself cannot fail.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::providers::{
    FetchReport, LiquidityData, LiquidityProvider, MarketStatsData, MarketStatsProvider,
    OptionsData, OptionsProvider,
};
use crate::types::DataSource;

/// Everything the gate battery knows about current market conditions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketContext {
    pub options_data: OptionsData,
    pub market_stats: MarketStatsData,
    pub liquidity_data: LiquidityData,
}

impl MarketContext {
    /// Context made entirely of fallback records.
    pub fn all_fallback() -> Self {
        Self {
            options_data: OptionsData::fallback(),
            market_stats: MarketStatsData::fallback(),
            liquidity_data: LiquidityData::fallback(),
        }
    }

    /// Number of sub-records that fell back.
    pub fn fallback_count(&self) -> u32 {
        [
            self.options_data.data_source,
            self.market_stats.data_source,
            self.liquidity_data.data_source,
        ]
        .iter()
        .filter(|s| **s == DataSource::Fallback)
        .count() as u32
    }
}

/// Per-provider timing observed during one build.
#[derive(Debug, Clone, Copy)]
pub struct ProviderTiming {
    pub name: &'static str,
    pub latency_ms: u64,
    pub source: DataSource,
}

/// A finished build: the merged context plus provider timings for the
/// performance tracker.
#[derive(Debug, Clone)]
pub struct ContextBuild {
    pub context: MarketContext,
    pub timings: [ProviderTiming; 3],
}

/// Result of one provider reachability probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderProbe {
    pub name: &'static str,
    pub reachable: bool,
    pub response_time_ms: u64,
}

pub struct MarketContextBuilder {
    options: OptionsProvider,
    market_stats: MarketStatsProvider,
    liquidity: LiquidityProvider,
}

impl MarketContextBuilder {
    pub fn new(settings: &ProviderSettings) -> Self {
        let deadline = Duration::from_millis(settings.fetch_timeout_ms);
        Self {
            options: OptionsProvider::new(&settings.options, deadline),
            market_stats: MarketStatsProvider::new(&settings.market_stats, deadline),
            liquidity: LiquidityProvider::new(&settings.liquidity, deadline),
        }
    }

    /// Fan out all three fetches concurrently under `shared_deadline` and
    /// merge whatever comes back.
    pub async fn build(&self, symbol: &str, shared_deadline: Duration) -> ContextBuild {
        let (options, market_stats, liquidity) = tokio::join!(
            bounded(
                shared_deadline,
                self.options.fetch(symbol),
                OptionsData::fallback
            ),
            bounded(
                shared_deadline,
                self.market_stats.fetch(symbol),
                MarketStatsData::fallback
            ),
            bounded(
                shared_deadline,
                self.liquidity.fetch(symbol),
                LiquidityData::fallback
            ),
        );

        let timings = [
            ProviderTiming {
                name: self.options.name(),
                latency_ms: options.latency_ms,
                source: options.source,
            },
            ProviderTiming {
                name: self.market_stats.name(),
                latency_ms: market_stats.latency_ms,
                source: market_stats.source,
            },
            ProviderTiming {
                name: self.liquidity.name(),
                latency_ms: liquidity.latency_ms,
                source: liquidity.source,
            },
        ];

        let context = MarketContext {
            options_data: options.data,
            market_stats: market_stats.data,
            liquidity_data: liquidity.data,
        };

        debug!(
            symbol,
            fallbacks = context.fallback_count(),
            "market context assembled"
        );

        ContextBuild { context, timings }
    }

    /// Probe all three providers concurrently (for the health endpoint).
    pub async fn probe_all(&self) -> Vec<ProviderProbe> {
        let (o, m, l) = tokio::join!(
            timed_probe(self.options.name(), self.options.probe()),
            timed_probe(self.market_stats.name(), self.market_stats.probe()),
            timed_probe(self.liquidity.name(), self.liquidity.probe()),
        );
        vec![o, m, l]
    }
}

/// Bound a fetch by the shared per-request deadline. A miss drops the
/// in-flight future and substitutes the fallback record.
pub(crate) async fn bounded<T>(
    deadline: Duration,
    fetch: impl Future<Output = FetchReport<T>>,
    fallback: impl FnOnce() -> T,
) -> FetchReport<T> {
    match tokio::time::timeout(deadline, fetch).await {
        Ok(report) => report,
        Err(_) => FetchReport::fallback(
            fallback(),
            format!("shared deadline of {}ms exceeded", deadline.as_millis()),
            deadline.as_millis() as u64,
        ),
    }
}

async fn timed_probe(
    name: &'static str,
    probe: impl Future<Output = bool>,
) -> ProviderProbe {
    let started = std::time::Instant::now();
    let reachable = probe.await;
    ProviderProbe {
        name,
        reachable,
        response_time_ms: started.elapsed().as_millis() as u64,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEndpoint;

    fn dead_settings() -> ProviderSettings {
        let endpoint = |name: &str| ProviderEndpoint {
            // Connection refused immediately; no real network traffic.
            base_url: format!("http://127.0.0.1:9/{name}"),
            api_key: "test-key-0000".to_string(),
        };
        ProviderSettings {
            options: endpoint("options"),
            market_stats: endpoint("stats"),
            liquidity: endpoint("liquidity"),
            fetch_timeout_ms: 600,
        }
    }

    #[tokio::test]
    async fn dead_providers_merge_into_full_fallback_context() {
        let builder = MarketContextBuilder::new(&dead_settings());
        let build = builder.build("SPY", Duration::from_millis(1000)).await;

        assert_eq!(build.context, MarketContext::all_fallback());
        assert_eq!(build.context.fallback_count(), 3);
        assert!(build
            .timings
            .iter()
            .all(|t| t.source == DataSource::Fallback));
    }

    #[tokio::test]
    async fn shared_deadline_cancels_slow_fetches() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            FetchReport::live(OptionsData::fallback(), 200)
        };
        let report = bounded(Duration::from_millis(20), slow, OptionsData::fallback).await;
        assert_eq!(report.source, DataSource::Fallback);
        assert!(report.error.unwrap().contains("shared deadline"));
    }

    #[tokio::test]
    async fn fast_fetch_passes_through_the_bound() {
        let fast = async { FetchReport::live(OptionsData::fallback(), 5) };
        let report = bounded(Duration::from_millis(100), fast, OptionsData::fallback).await;
        assert_eq!(report.source, DataSource::Api);
    }

    #[tokio::test]
    async fn probes_report_per_provider_timing() {
        let builder = MarketContextBuilder::new(&dead_settings());
        let probes = builder.probe_all().await;
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[0].name, "options");
        assert!(probes.iter().all(|p| !p.reachable));
    }
}
