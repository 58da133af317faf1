// =============================================================================
// Engine Configuration — loaded once at startup, frozen for the process
// =============================================================================
//
// Every threshold, multiplier, timeout, and endpoint the engine consults
// lives here. The tree is built exactly once in `EngineConfig::from_env`,
// validated, and then shared as `Arc<EngineConfig>`; no mutating accessor
// exists, so every consumer reads the same values for the process lifetime.
//
// A fingerprint of the canonical JSON serialisation is captured at load
// time. `ConfigGuard` re-serialises periodically and compares, so that any
// unsafe-code corruption of the frozen tree is detected and counted rather
// than silently steering decisions.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Version constant surfaced in every verdict and in health/metrics.
pub const ENGINE_VERSION: &str = concat!("gatekeeper-v", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_max_spread_bps() -> f64 {
    12.0
}

fn default_max_volatility_ratio() -> f64 {
    2.0
}

fn default_min_phase_magnitude() -> i32 {
    65
}

fn default_phase_boost_threshold() -> i32 {
    80
}

fn default_phase_boost() -> f64 {
    0.5
}

fn default_tight_spread_bps() -> f64 {
    5.0
}

fn default_spread_boost() -> f64 {
    0.3
}

fn default_max_confidence() -> f64 {
    10.0
}

fn default_fetch_timeout_ms() -> u64 {
    600
}

fn default_request_deadline_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> u32 {
    200
}

fn default_webhook_target_ms() -> f64 {
    1000.0
}

fn default_decision_target_ms() -> f64 {
    10.0
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_suspicious_threshold() -> u32 {
    10
}

fn default_suspicious_window_ms() -> i64 {
    10 * 60 * 1000
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_port() -> u16 {
    3001
}

// =============================================================================
// Sections
// =============================================================================

/// Thresholds consulted by the gate battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSettings {
    /// Maximum acceptable quoted spread in basis points.
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,

    /// Maximum acceptable ATR(14) / RV(20) ratio.
    #[serde(default = "default_max_volatility_ratio")]
    pub max_volatility_ratio: f64,

    /// Minimum |saty_phase| required for phase confidence.
    #[serde(default = "default_min_phase_magnitude")]
    pub min_phase_magnitude: i32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_spread_bps: default_max_spread_bps(),
            max_volatility_ratio: default_max_volatility_ratio(),
            min_phase_magnitude: default_min_phase_magnitude(),
        }
    }
}

/// Confidence assembly boosts and the final cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceSettings {
    /// |saty_phase| at or above this earns the phase boost.
    #[serde(default = "default_phase_boost_threshold")]
    pub phase_boost_threshold: i32,

    #[serde(default = "default_phase_boost")]
    pub phase_boost: f64,

    /// Spread at or below this (bps) earns the spread boost.
    #[serde(default = "default_tight_spread_bps")]
    pub tight_spread_bps: f64,

    #[serde(default = "default_spread_boost")]
    pub spread_boost: f64,

    /// Hard ceiling applied once, after all boosts.
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            phase_boost_threshold: default_phase_boost_threshold(),
            phase_boost: default_phase_boost(),
            tight_spread_bps: default_tight_spread_bps(),
            spread_boost: default_spread_boost(),
            max_confidence: default_max_confidence(),
        }
    }
}

/// Endpoint and credentials for one external data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// The three provider endpoints plus the shared per-call deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub options: ProviderEndpoint,
    pub market_stats: ProviderEndpoint,
    pub liquidity: ProviderEndpoint,

    /// Per-provider fetch deadline in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

/// Admission, deadline, and health-threshold settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// End-to-end budget for one decide call in milliseconds.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,

    /// Concurrent-request ceiling; arrivals above it are refused.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Health degrades when average or p95 latency exceeds this.
    #[serde(default = "default_webhook_target_ms")]
    pub webhook_target_ms: f64,

    /// Decision-logic-only latency target (monitored, never enforced).
    #[serde(default = "default_decision_target_ms")]
    pub decision_target_ms: f64,

    /// Health degrades when the error rate exceeds this fraction.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Anomaly count at which a source address is flagged.
    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: u32,

    /// Window over which anomalies are counted, in milliseconds.
    #[serde(default = "default_suspicious_window_ms")]
    pub suspicious_window_ms: i64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            request_deadline_ms: default_request_deadline_ms(),
            max_concurrent: default_max_concurrent(),
            webhook_target_ms: default_webhook_target_ms(),
            decision_target_ms: default_decision_target_ms(),
            max_error_rate: default_max_error_rate(),
            suspicious_threshold: default_suspicious_threshold(),
            suspicious_window_ms: default_suspicious_window_ms(),
        }
    }
}

/// TTL store background-sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// HTTP boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// The full frozen configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub gates: GateSettings,
    #[serde(default)]
    pub confidence: ConfidenceSettings,
    pub providers: ProviderSettings,
    #[serde(default)]
    pub performance: PerformanceSettings,
    #[serde(default)]
    pub stores: StoreSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Load the configuration from process environment variables plus
    /// compiled-in defaults. Missing required keys fail fast.
    pub fn from_env() -> Result<Arc<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`] but with an injectable lookup, so tests never
    /// touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Arc<Self>> {
        let required = |key: &str| -> Result<String> {
            let val = lookup(key)
                .with_context(|| format!("required environment variable {key} is not set"))?;
            if val.trim().is_empty() {
                anyhow::bail!("required environment variable {key} is empty");
            }
            Ok(val)
        };

        let providers = ProviderSettings {
            options: ProviderEndpoint {
                base_url: required("GATEKEEPER_OPTIONS_API_URL")?,
                api_key: required("GATEKEEPER_OPTIONS_API_KEY")?,
            },
            market_stats: ProviderEndpoint {
                base_url: required("GATEKEEPER_MARKET_STATS_API_URL")?,
                api_key: required("GATEKEEPER_MARKET_STATS_API_KEY")?,
            },
            liquidity: ProviderEndpoint {
                base_url: required("GATEKEEPER_LIQUIDITY_API_URL")?,
                api_key: required("GATEKEEPER_LIQUIDITY_API_KEY")?,
            },
            fetch_timeout_ms: parse_or_default(
                &lookup,
                "GATEKEEPER_FETCH_TIMEOUT_MS",
                default_fetch_timeout_ms(),
            )?,
        };

        let performance = PerformanceSettings {
            request_deadline_ms: parse_or_default(
                &lookup,
                "GATEKEEPER_REQUEST_DEADLINE_MS",
                default_request_deadline_ms(),
            )?,
            max_concurrent: parse_or_default(
                &lookup,
                "GATEKEEPER_MAX_CONCURRENT",
                default_max_concurrent(),
            )?,
            ..PerformanceSettings::default()
        };

        let server = ServerSettings {
            port: parse_or_default(&lookup, "GATEKEEPER_PORT", default_port())?,
        };

        let config = Self {
            gates: GateSettings::default(),
            confidence: ConfidenceSettings::default(),
            providers,
            performance,
            stores: StoreSettings::default(),
            server,
        };

        config.validate()?;

        info!(
            options_url = %config.providers.options.base_url,
            market_stats_url = %config.providers.market_stats.base_url,
            liquidity_url = %config.providers.liquidity.base_url,
            options_key = %mask_secret(&config.providers.options.api_key),
            fetch_timeout_ms = config.providers.fetch_timeout_ms,
            max_concurrent = config.performance.max_concurrent,
            port = config.server.port,
            "engine configuration loaded"
        );

        Ok(Arc::new(config))
    }

    /// Structural validation: URL syntax, port range, sane thresholds.
    pub fn validate(&self) -> Result<()> {
        for (name, endpoint) in [
            ("options", &self.providers.options),
            ("market_stats", &self.providers.market_stats),
            ("liquidity", &self.providers.liquidity),
        ] {
            let url = reqwest::Url::parse(&endpoint.base_url)
                .with_context(|| format!("{name} provider base URL is not a valid URL"))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("{name} provider base URL must be http(s), got {}", url.scheme());
            }
            if endpoint.api_key.trim().is_empty() {
                anyhow::bail!("{name} provider API key is empty");
            }
        }

        if self.server.port == 0 {
            anyhow::bail!("server port must be non-zero");
        }
        if self.providers.fetch_timeout_ms == 0 || self.performance.request_deadline_ms == 0 {
            anyhow::bail!("timeouts must be non-zero");
        }
        if self.performance.max_concurrent == 0 {
            anyhow::bail!("concurrent-request ceiling must be non-zero");
        }

        Ok(())
    }

    /// Hash of the canonical JSON serialisation, captured at load time and
    /// reverified by [`ConfigGuard`].
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let canonical =
            serde_json::to_string(self).expect("config serialisation is infallible");
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        None => Ok(default),
    }
}

/// Mask a secret to its first four characters for logging.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}

// =============================================================================
// ConfigGuard — periodic immutability reverification
// =============================================================================

/// Watches the frozen configuration for corruption. Rust makes the tree
/// structurally immutable behind `Arc`, so a mismatch here indicates memory
/// corruption or an unsafe-code bug; it is logged and counted, never
/// silently ignored.
pub struct ConfigGuard {
    config: Arc<EngineConfig>,
    expected: u64,
    violations: AtomicU64,
}

impl ConfigGuard {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let expected = config.fingerprint();
        Self {
            config,
            expected,
            violations: AtomicU64::new(0),
        }
    }

    /// Recompute the fingerprint and compare. Returns `true` when intact.
    pub fn verify(&self) -> bool {
        let current = self.config.fingerprint();
        if current == self.expected {
            return true;
        }
        let count = self.violations.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            expected = self.expected,
            current,
            violations = count,
            "frozen configuration fingerprint mismatch"
        );
        false
    }

    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    /// Spawn the periodic reverification loop.
    pub fn start(self: Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.verify();
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_fixture() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("GATEKEEPER_OPTIONS_API_URL", "https://options.example.com"),
            ("GATEKEEPER_OPTIONS_API_KEY", "opt-key-123456"),
            (
                "GATEKEEPER_MARKET_STATS_API_URL",
                "https://stats.example.com",
            ),
            ("GATEKEEPER_MARKET_STATS_API_KEY", "stats-key-123456"),
            ("GATEKEEPER_LIQUIDITY_API_URL", "https://liq.example.com"),
            ("GATEKEEPER_LIQUIDITY_API_KEY", "liq-key-123456"),
        ])
    }

    fn lookup_from<'a>(map: &'a HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn loads_with_defaults_when_only_required_keys_present() {
        let env = env_fixture();
        let cfg = EngineConfig::from_lookup(lookup_from(&env)).unwrap();
        assert_eq!(cfg.gates.max_spread_bps, 12.0);
        assert_eq!(cfg.gates.max_volatility_ratio, 2.0);
        assert_eq!(cfg.gates.min_phase_magnitude, 65);
        assert_eq!(cfg.providers.fetch_timeout_ms, 600);
        assert_eq!(cfg.performance.request_deadline_ms, 1000);
        assert_eq!(cfg.performance.max_concurrent, 200);
        assert_eq!(cfg.stores.sweep_interval_secs, 10);
        assert_eq!(cfg.server.port, 3001);
    }

    #[test]
    fn missing_required_key_fails_fast() {
        let mut env = env_fixture();
        env.remove("GATEKEEPER_LIQUIDITY_API_KEY");
        let err = EngineConfig::from_lookup(lookup_from(&env)).unwrap_err();
        assert!(err.to_string().contains("GATEKEEPER_LIQUIDITY_API_KEY"));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let mut env = env_fixture();
        env.insert("GATEKEEPER_OPTIONS_API_URL", "not a url");
        assert!(EngineConfig::from_lookup(lookup_from(&env)).is_err());
    }

    #[test]
    fn env_overrides_are_applied() {
        let mut env = env_fixture();
        env.insert("GATEKEEPER_FETCH_TIMEOUT_MS", "350");
        env.insert("GATEKEEPER_MAX_CONCURRENT", "64");
        env.insert("GATEKEEPER_PORT", "8080");
        let cfg = EngineConfig::from_lookup(lookup_from(&env)).unwrap();
        assert_eq!(cfg.providers.fetch_timeout_ms, 350);
        assert_eq!(cfg.performance.max_concurrent, 64);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn fingerprint_is_stable_and_guard_passes() {
        let env = env_fixture();
        let cfg = EngineConfig::from_lookup(lookup_from(&env)).unwrap();
        assert_eq!(cfg.fingerprint(), cfg.fingerprint());

        let guard = ConfigGuard::new(cfg);
        assert!(guard.verify());
        assert_eq!(guard.violation_count(), 0);
    }

    #[test]
    fn secrets_are_masked_to_four_chars() {
        assert_eq!(mask_secret("abcdef123456"), "abcd****");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret(""), "****");
    }
}
