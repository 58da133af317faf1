// =============================================================================
// Decision Engine — one call, one auditable verdict
// =============================================================================
//
// Pipeline for a decide call:
//   1. Normalize the raw payload (failures surface as validation errors,
//      never as REJECT verdicts).
//   2. Build the market context (parallel provider fan-out, cannot fail).
//   3. Run all five gates in order.
//   4. REJECT with every violated reason, or APPROVE with assembled
//      confidence.
//   5. Attach the audit record: deep copy of candidate + context, the full
//      gate-result list, wall clock, and elapsed milliseconds.
//
// Identical inputs yield identical verdicts modulo audit.timestamp and
// audit.processing_time_ms.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::config::{EngineConfig, ENGINE_VERSION};
use crate::confidence;
use crate::context::{MarketContext, MarketContextBuilder};
use crate::gates::{run_gates, GateName, GateReason, GateResult};
use crate::normalizer::{normalize, Candidate, ValidationError};
use crate::performance::PerformanceTracker;
use crate::stores::timeframe::ActiveSignal;
use crate::stores::TimeframeStore;
use crate::types::{MarketSession, SignalType};

/// Final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// Partition of the five gate names by outcome.
#[derive(Debug, Clone, Serialize)]
pub struct GatesSummary {
    pub passed: Vec<GateName>,
    pub failed: Vec<GateName>,
}

/// Immutable audit record attached to every verdict.
#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    /// Request ID (UUID v4).
    pub id: String,
    /// Wall-clock decision time, ISO 8601.
    pub timestamp: String,
    pub symbol: String,
    pub session: MarketSession,
    /// Deep copy of the candidate at decision time.
    pub candidate: Candidate,
    /// Deep copy of the fetched context at decision time.
    pub context: MarketContext,
    /// All five results in battery order.
    pub gate_results: Vec<GateResult>,
    pub processing_time_ms: u64,
    /// Live timeframe-store snapshot at decision time (observability only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub active_timeframes: Vec<ActiveSignal>,
}

/// The engine's sole externally observable contract.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutput {
    pub decision: Decision,
    pub engine_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<SignalType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<GateReason>>,
    pub gates: GatesSummary,
    pub audit: AuditTrail,
}

/// Gate evaluation and verdict assembly. Pure apart from the wall-clock
/// timestamp and request ID stamped into the audit record.
pub fn evaluate(
    candidate: &Candidate,
    context: &MarketContext,
    config: &EngineConfig,
    processing_time_ms: u64,
    active_timeframes: Vec<ActiveSignal>,
) -> DecisionOutput {
    let report = run_gates(candidate, context, &config.gates);

    let (decision, direction, confidence, reasons) = if report.all_passed() {
        let confidence = confidence::assemble(candidate, context, &config.confidence);
        (
            Decision::Approve,
            Some(candidate.signal_type),
            Some(confidence),
            None,
        )
    } else {
        (Decision::Reject, None, None, Some(report.reasons.clone()))
    };

    let audit = AuditTrail {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        symbol: candidate.symbol.clone(),
        session: candidate.market_session,
        candidate: candidate.clone(),
        context: context.clone(),
        gate_results: report.results,
        processing_time_ms,
        active_timeframes,
    };

    DecisionOutput {
        decision,
        engine_version: ENGINE_VERSION,
        direction,
        confidence,
        reasons,
        gates: GatesSummary {
            passed: report.passed,
            failed: report.failed,
        },
        audit,
    }
}

pub struct DecisionEngine {
    config: Arc<EngineConfig>,
    context_builder: Arc<MarketContextBuilder>,
    timeframe_store: Arc<TimeframeStore>,
    perf: Arc<PerformanceTracker>,
}

impl DecisionEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        context_builder: Arc<MarketContextBuilder>,
        timeframe_store: Arc<TimeframeStore>,
        perf: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            config,
            context_builder,
            timeframe_store,
            perf,
        }
    }

    /// Run the full pipeline for one raw webhook payload.
    pub async fn decide(&self, raw: &Value) -> Result<DecisionOutput, ValidationError> {
        let started = Instant::now();
        let now_ms = Utc::now().timestamp_millis();

        let candidate = normalize(raw, now_ms)?;

        let shared_deadline =
            Duration::from_millis(self.config.performance.request_deadline_ms);
        let build = self
            .context_builder
            .build(&candidate.symbol, shared_deadline)
            .await;
        for timing in &build.timings {
            self.perf
                .record_provider_latency(timing.name, timing.latency_ms);
        }

        let decision_started = Instant::now();
        let active_timeframes = self.timeframe_store.get_all_active(now_ms);
        let output = evaluate(
            &candidate,
            &build.context,
            &self.config,
            started.elapsed().as_millis() as u64,
            active_timeframes,
        );
        self.perf
            .record_decision_latency(decision_started.elapsed().as_millis() as u64);

        info!(
            request_id = %output.audit.id,
            symbol = %candidate.symbol,
            decision = %output.decision,
            fallbacks = build.context.fallback_count(),
            processing_time_ms = output.audit.processing_time_ms,
            "decision emitted"
        );

        Ok(output)
    }
}
