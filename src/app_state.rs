// =============================================================================
// Central Application State — Gatekeeper admission engine
// =============================================================================
//
// Constructed once in the composition root and shared as `Arc<AppState>`.
// The two TTL stores are the only mutable shared state in the core; the
// frozen config is read-only after init.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigGuard, EngineConfig};
use crate::context::MarketContextBuilder;
use crate::engine::DecisionEngine;
use crate::performance::{PerformanceTracker, SuspiciousActivityTracker};
use crate::stores::{PhaseStore, SweeperHandle, TimeframeStore};

pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub config_guard: Arc<ConfigGuard>,
    pub context_builder: Arc<MarketContextBuilder>,
    pub engine: DecisionEngine,
    pub timeframe_store: Arc<TimeframeStore>,
    pub phase_store: Arc<PhaseStore>,
    pub perf: Arc<PerformanceTracker>,
    pub suspicious: SuspiciousActivityTracker,
}

impl AppState {
    /// Wire every subsystem together from the frozen configuration.
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let context_builder = Arc::new(MarketContextBuilder::new(&config.providers));
        let timeframe_store = Arc::new(TimeframeStore::new());
        let phase_store = Arc::new(PhaseStore::new());
        let perf = Arc::new(PerformanceTracker::new(config.performance.clone()));
        let suspicious = SuspiciousActivityTracker::new(&config.performance);
        let config_guard = Arc::new(ConfigGuard::new(Arc::clone(&config)));

        let engine = DecisionEngine::new(
            Arc::clone(&config),
            Arc::clone(&context_builder),
            Arc::clone(&timeframe_store),
            Arc::clone(&perf),
        );

        Self {
            config,
            config_guard,
            context_builder,
            engine,
            timeframe_store,
            phase_store,
            perf,
            suspicious,
        }
    }

    /// Start the background sweepers for both stores.
    pub fn start_sweepers(&self) -> Vec<SweeperHandle> {
        let every = Duration::from_secs(self.config.stores.sweep_interval_secs);
        vec![
            self.timeframe_store.start_sweeper(every),
            self.phase_store.start_sweeper(every),
        ]
    }
}
