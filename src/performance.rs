// =============================================================================
// Performance & Admission Envelope
// =============================================================================
//
// Wraps every decide call: refuses work above the concurrent ceiling,
// tracks latency (end-to-end, decision-logic-only, per-provider), and
// derives the health and metrics views.
//
// Counters are atomics; the latency rings sit behind Mutexes and are
// bounded at 1000 samples, with percentiles computed by sorting a snapshot
// on demand. That is cheap at this sample size and avoids a streaming
// histogram.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::config::PerformanceSettings;

/// Bounded rolling sample size for latency percentiles.
const LATENCY_SAMPLE_CAP: usize = 1000;
/// Bounded window for per-provider moving averages.
const PROVIDER_SAMPLE_CAP: usize = 100;

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LatencyView {
    pub average: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputView {
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub peak_rps: u32,
    pub concurrent: u32,
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionEngineView {
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorsView {
    pub error_rate: f64,
}

/// The metrics-endpoint payload.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsView {
    pub latency: LatencyView,
    pub throughput: ThroughputView,
    pub decision_engine: DecisionEngineView,
    pub errors: ErrorsView,
    pub providers: HashMap<String, f64>,
}

/// Health verdict for the performance envelope.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
}

// =============================================================================
// PerformanceTracker
// =============================================================================

pub struct PerformanceTracker {
    settings: PerformanceSettings,

    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    total_completed: AtomicU64,
    total_errors: AtomicU64,

    latencies_ms: Mutex<VecDeque<u64>>,
    decision_latencies_ms: Mutex<VecDeque<u64>>,
    provider_latencies: Mutex<HashMap<&'static str, VecDeque<u64>>>,

    // Requests-per-second tracking over one-second buckets.
    current_second: AtomicI64,
    count_this_second: AtomicU32,
    peak_rps: AtomicU32,

    started: Instant,
}

impl PerformanceTracker {
    pub fn new(settings: PerformanceSettings) -> Self {
        Self {
            settings,
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
            total_completed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLE_CAP)),
            decision_latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLE_CAP)),
            provider_latencies: Mutex::new(HashMap::new()),
            current_second: AtomicI64::new(0),
            count_this_second: AtomicU32::new(0),
            peak_rps: AtomicU32::new(0),
            started: Instant::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Try to enter the envelope. Returns `None` when the concurrent
    /// ceiling is reached; the caller must refuse the request immediately.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let ceiling = self.settings.max_concurrent;
        let admitted = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < ceiling {
                    Some(current + 1)
                } else {
                    None
                }
            });

        match admitted {
            Ok(previous) => {
                let now_in_flight = previous + 1;
                self.peak_in_flight
                    .fetch_max(now_in_flight, Ordering::SeqCst);
                self.bump_rps();
                Some(AdmissionPermit {
                    tracker: Arc::clone(self),
                })
            }
            Err(_) => {
                warn!(ceiling, "admission refused, concurrent ceiling reached");
                None
            }
        }
    }

    /// Suggested client back-off when saturated.
    pub fn suggested_retry_after_ms(&self) -> u64 {
        let avg = mean(&self.latencies_ms.lock());
        (avg.round() as u64).clamp(50, 1000)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record one finished request.
    pub fn record_request(&self, latency_ms: u64, is_error: bool) {
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        push_bounded(&mut self.latencies_ms.lock(), latency_ms, LATENCY_SAMPLE_CAP);
    }

    /// Record the decision-logic-only portion of a request.
    pub fn record_decision_latency(&self, latency_ms: u64) {
        push_bounded(
            &mut self.decision_latencies_ms.lock(),
            latency_ms,
            LATENCY_SAMPLE_CAP,
        );
    }

    pub fn record_provider_latency(&self, provider: &'static str, latency_ms: u64) {
        let mut map = self.provider_latencies.lock();
        let ring = map.entry(provider).or_default();
        push_bounded(ring, latency_ms, PROVIDER_SAMPLE_CAP);
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn metrics(&self) -> MetricsView {
        let latencies = self.latencies_ms.lock();
        let mut sorted: Vec<u64> = latencies.iter().copied().collect();
        sorted.sort_unstable();

        let total = self.total_completed.load(Ordering::Relaxed);
        let errors = self.total_errors.load(Ordering::Relaxed);
        let uptime_secs = self.started.elapsed().as_secs_f64().max(1e-9);

        let providers = self
            .provider_latencies
            .lock()
            .iter()
            .map(|(name, ring)| (name.to_string(), mean(ring)))
            .collect();

        MetricsView {
            latency: LatencyView {
                average: mean(&latencies),
                p50: percentile(&sorted, 50.0),
                p95: percentile(&sorted, 95.0),
                p99: percentile(&sorted, 99.0),
            },
            throughput: ThroughputView {
                total_requests: total,
                requests_per_second: total as f64 / uptime_secs,
                peak_rps: self.peak_rps.load(Ordering::Relaxed),
                concurrent: self.in_flight.load(Ordering::SeqCst),
                max_concurrent: self.peak_in_flight.load(Ordering::SeqCst),
            },
            decision_engine: DecisionEngineView {
                average_latency_ms: mean(&self.decision_latencies_ms.lock()),
            },
            errors: ErrorsView {
                error_rate: if total > 0 {
                    errors as f64 / total as f64
                } else {
                    0.0
                },
            },
            providers,
        }
    }

    /// Health verdict against the configured thresholds.
    pub fn health(&self) -> PerformanceHealth {
        let metrics = self.metrics();
        let target = self.settings.webhook_target_ms;
        let mut issues = Vec::new();

        if metrics.latency.average > target {
            issues.push(format!(
                "average latency {:.1}ms exceeds target {:.0}ms",
                metrics.latency.average, target
            ));
        }
        if metrics.latency.p95 as f64 > target {
            issues.push(format!(
                "p95 latency {}ms exceeds target {:.0}ms",
                metrics.latency.p95, target
            ));
        }
        if metrics.errors.error_rate > self.settings.max_error_rate {
            issues.push(format!(
                "error rate {:.1}% exceeds {:.1}%",
                metrics.errors.error_rate * 100.0,
                self.settings.max_error_rate * 100.0
            ));
        }

        PerformanceHealth {
            healthy: issues.is_empty(),
            issues,
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn bump_rps(&self) {
        let second = self.started.elapsed().as_secs() as i64;
        let previous = self.current_second.swap(second, Ordering::SeqCst);
        if previous == second {
            let count = self.count_this_second.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_rps.fetch_max(count, Ordering::SeqCst);
        } else {
            self.count_this_second.store(1, Ordering::SeqCst);
            self.peak_rps.fetch_max(1, Ordering::SeqCst);
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTracker")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("total_completed", &self.total_completed.load(Ordering::Relaxed))
            .field("max_concurrent", &self.settings.max_concurrent)
            .finish()
    }
}

/// RAII admission slot: dropping it frees the concurrency slot.
pub struct AdmissionPermit {
    tracker: Arc<PerformanceTracker>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

fn push_bounded(ring: &mut VecDeque<u64>, value: u64, cap: usize) {
    ring.push_back(value);
    while ring.len() > cap {
        ring.pop_front();
    }
}

fn mean(ring: &VecDeque<u64>) -> f64 {
    if ring.is_empty() {
        return 0.0;
    }
    ring.iter().sum::<u64>() as f64 / ring.len() as f64
}

/// Nearest-rank percentile over an already-sorted sample.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// =============================================================================
// Suspicious activity tracker
// =============================================================================

/// Counts boundary-layer anomalies per source address. Advisory only: the
/// boundary decides what to do with a flagged source.
pub struct SuspiciousActivityTracker {
    window_ms: i64,
    threshold: u32,
    events: Mutex<HashMap<String, VecDeque<i64>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousSource {
    pub source: String,
    pub anomalies: u32,
}

impl SuspiciousActivityTracker {
    pub fn new(settings: &PerformanceSettings) -> Self {
        Self {
            window_ms: settings.suspicious_window_ms,
            threshold: settings.suspicious_threshold,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Record one anomaly for `source`; returns the in-window count.
    pub fn record_anomaly(&self, source: &str, now_ms: i64) -> u32 {
        let mut events = self.events.lock();
        let ring = events.entry(source.to_string()).or_default();
        let cutoff = now_ms - self.window_ms;
        while ring.front().is_some_and(|t| *t < cutoff) {
            ring.pop_front();
        }
        ring.push_back(now_ms);

        let count = ring.len() as u32;
        if count == self.threshold {
            warn!(source, count, "source flagged as suspicious");
        }
        count
    }

    pub fn is_flagged(&self, source: &str, now_ms: i64) -> bool {
        let events = self.events.lock();
        let cutoff = now_ms - self.window_ms;
        events
            .get(source)
            .map(|ring| ring.iter().filter(|t| **t >= cutoff).count() as u32)
            .is_some_and(|count| count >= self.threshold)
    }

    /// All currently flagged sources.
    pub fn flagged(&self, now_ms: i64) -> Vec<SuspiciousSource> {
        let events = self.events.lock();
        let cutoff = now_ms - self.window_ms;
        let mut flagged: Vec<SuspiciousSource> = events
            .iter()
            .filter_map(|(source, ring)| {
                let count = ring.iter().filter(|t| **t >= cutoff).count() as u32;
                (count >= self.threshold).then(|| SuspiciousSource {
                    source: source.clone(),
                    anomalies: count,
                })
            })
            .collect();
        flagged.sort_by(|a, b| b.anomalies.cmp(&a.anomalies));
        flagged
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_concurrent: u32) -> PerformanceSettings {
        PerformanceSettings {
            max_concurrent,
            ..PerformanceSettings::default()
        }
    }

    #[test]
    fn admission_honours_the_ceiling() {
        let tracker = Arc::new(PerformanceTracker::new(settings(3)));

        let p1 = tracker.try_admit().unwrap();
        let _p2 = tracker.try_admit().unwrap();
        let _p3 = tracker.try_admit().unwrap();
        assert_eq!(tracker.in_flight(), 3);
        assert!(tracker.try_admit().is_none());

        // Releasing one slot re-opens admission.
        drop(p1);
        assert_eq!(tracker.in_flight(), 2);
        assert!(tracker.try_admit().is_some());
    }

    #[test]
    fn peak_in_flight_is_tracked() {
        let tracker = Arc::new(PerformanceTracker::new(settings(10)));
        let permits: Vec<_> = (0..4).map(|_| tracker.try_admit().unwrap()).collect();
        drop(permits);

        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.metrics().throughput.max_concurrent, 4);
    }

    #[test]
    fn percentiles_over_known_sample() {
        let tracker = PerformanceTracker::new(settings(10));
        for ms in 1..=100u64 {
            tracker.record_request(ms, false);
        }
        let m = tracker.metrics();
        assert_eq!(m.latency.p50, 50);
        assert_eq!(m.latency.p95, 95);
        assert_eq!(m.latency.p99, 99);
        assert!((m.latency.average - 50.5).abs() < 1e-9);
        assert_eq!(m.throughput.total_requests, 100);
    }

    #[test]
    fn latency_ring_is_bounded() {
        let tracker = PerformanceTracker::new(settings(10));
        for ms in 0..2000u64 {
            tracker.record_request(ms, false);
        }
        // Only the newest 1000 samples (1000..=1999) remain; nearest-rank
        // p50 over that window is the 500th sample.
        let m = tracker.metrics();
        assert_eq!(m.latency.p50, 1499);
        assert_eq!(m.throughput.total_requests, 2000);
    }

    #[test]
    fn error_rate_degrades_health() {
        let tracker = PerformanceTracker::new(settings(10));
        for i in 0..100u64 {
            tracker.record_request(5, i < 10);
        }
        let health = tracker.health();
        assert!(!health.healthy);
        assert!(health.issues.iter().any(|i| i.contains("error rate")));
    }

    #[test]
    fn slow_latencies_degrade_health() {
        let tracker = PerformanceTracker::new(settings(10));
        for _ in 0..50 {
            tracker.record_request(5000, false);
        }
        let health = tracker.health();
        assert!(!health.healthy);
        assert!(!health.issues.is_empty());
    }

    #[test]
    fn healthy_when_quiet_and_fast() {
        let tracker = PerformanceTracker::new(settings(10));
        tracker.record_request(5, false);
        tracker.record_decision_latency(1);
        assert!(tracker.health().healthy);
    }

    #[test]
    fn provider_latency_averages_are_per_provider() {
        let tracker = PerformanceTracker::new(settings(10));
        tracker.record_provider_latency("options", 100);
        tracker.record_provider_latency("options", 200);
        tracker.record_provider_latency("liquidity", 30);

        let m = tracker.metrics();
        assert_eq!(m.providers["options"], 150.0);
        assert_eq!(m.providers["liquidity"], 30.0);
    }

    #[test]
    fn suspicious_source_flags_at_threshold() {
        let tracker = SuspiciousActivityTracker::new(&PerformanceSettings::default());
        let now = 1_700_000_000_000;

        for i in 0..9 {
            tracker.record_anomaly("10.0.0.1", now + i);
            assert!(!tracker.is_flagged("10.0.0.1", now + i));
        }
        tracker.record_anomaly("10.0.0.1", now + 9);
        assert!(tracker.is_flagged("10.0.0.1", now + 9));
        assert_eq!(tracker.flagged(now + 9).len(), 1);
        assert!(!tracker.is_flagged("10.0.0.2", now));
    }

    #[test]
    fn anomalies_age_out_of_the_window() {
        let settings = PerformanceSettings::default();
        let window = settings.suspicious_window_ms;
        let tracker = SuspiciousActivityTracker::new(&settings);
        let now = 1_700_000_000_000;

        for i in 0..10 {
            tracker.record_anomaly("10.0.0.1", now + i);
        }
        assert!(tracker.is_flagged("10.0.0.1", now + 9));
        assert!(!tracker.is_flagged("10.0.0.1", now + window + 10));
    }

    #[test]
    fn retry_after_stays_in_sane_bounds() {
        let tracker = PerformanceTracker::new(settings(10));
        assert_eq!(tracker.suggested_retry_after_ms(), 50);
        for _ in 0..10 {
            tracker.record_request(100_000, false);
        }
        assert_eq!(tracker.suggested_retry_after_ms(), 1000);
    }
}
