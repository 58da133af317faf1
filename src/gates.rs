// =============================================================================
// Gate Battery — five risk gates in fixed order
// =============================================================================
//
// Order: SPREAD -> VOLATILITY -> GAMMA -> PHASE -> SESSION.
//
// Every gate runs on every candidate, pass or fail, so the audit record
// always carries exactly five results and a REJECT can cite every violated
// gate at once. Evaluation is pure: (candidate, context, thresholds) in,
// results out, no clock, no I/O.
// =============================================================================

use serde::Serialize;

use crate::config::GateSettings;
use crate::context::MarketContext;
use crate::normalizer::Candidate;
use crate::types::{GammaBias, SignalType};

/// Identity of a gate, in canonical wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateName {
    #[serde(rename = "SPREAD_GATE")]
    Spread,
    #[serde(rename = "VOLATILITY_GATE")]
    Volatility,
    #[serde(rename = "GAMMA_GATE")]
    Gamma,
    #[serde(rename = "PHASE_GATE")]
    Phase,
    #[serde(rename = "SESSION_GATE")]
    Session,
}

/// The fixed evaluation order.
pub const GATE_ORDER: [GateName; 5] = [
    GateName::Spread,
    GateName::Volatility,
    GateName::Gamma,
    GateName::Phase,
    GateName::Session,
];

impl std::fmt::Display for GateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spread => write!(f, "SPREAD_GATE"),
            Self::Volatility => write!(f, "VOLATILITY_GATE"),
            Self::Gamma => write!(f, "GAMMA_GATE"),
            Self::Phase => write!(f, "PHASE_GATE"),
            Self::Session => write!(f, "SESSION_GATE"),
        }
    }
}

/// Canonical failure reason, one per gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateReason {
    SpreadTooWide,
    VolatilitySpike,
    GammaHeadwind,
    PhaseConfidenceLow,
    AfterhoursBlocked,
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SpreadTooWide => write!(f, "SPREAD_TOO_WIDE"),
            Self::VolatilitySpike => write!(f, "VOLATILITY_SPIKE"),
            Self::GammaHeadwind => write!(f, "GAMMA_HEADWIND"),
            Self::PhaseConfidenceLow => write!(f, "PHASE_CONFIDENCE_LOW"),
            Self::AfterhoursBlocked => write!(f, "AFTERHOURS_BLOCKED"),
        }
    }
}

/// Verdict of a single gate. `reason` is present iff the gate failed.
#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub gate: GateName,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<GateReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl GateResult {
    fn pass(gate: GateName, value: Option<f64>, threshold: Option<f64>) -> Self {
        Self {
            gate,
            passed: true,
            reason: None,
            value,
            threshold,
        }
    }

    fn fail(
        gate: GateName,
        reason: GateReason,
        value: Option<f64>,
        threshold: Option<f64>,
    ) -> Self {
        Self {
            gate,
            passed: false,
            reason: Some(reason),
            value,
            threshold,
        }
    }
}

/// Output of one battery run: all five results in order, plus the
/// passed/failed partition and the ordered failure reasons.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub results: Vec<GateResult>,
    pub passed: Vec<GateName>,
    pub failed: Vec<GateName>,
    pub reasons: Vec<GateReason>,
}

impl GateReport {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run all five gates in the fixed order.
pub fn run_gates(
    candidate: &Candidate,
    context: &MarketContext,
    settings: &GateSettings,
) -> GateReport {
    let results = vec![
        spread_gate(context, settings),
        volatility_gate(context, settings),
        gamma_gate(candidate, context),
        phase_gate(candidate, settings),
        session_gate(candidate),
    ];

    let passed = results
        .iter()
        .filter(|r| r.passed)
        .map(|r| r.gate)
        .collect();
    let failed: Vec<GateName> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.gate)
        .collect();
    let reasons = results.iter().filter_map(|r| r.reason).collect();

    GateReport {
        results,
        passed,
        failed,
        reasons,
    }
}

/// Pass iff the quoted spread is at or under the ceiling. The liquidity
/// fallback's 999 bps spread fails here by construction.
fn spread_gate(context: &MarketContext, settings: &GateSettings) -> GateResult {
    let spread = context.liquidity_data.spread_bps;
    if spread <= settings.max_spread_bps {
        GateResult::pass(GateName::Spread, Some(spread), Some(settings.max_spread_bps))
    } else {
        GateResult::fail(
            GateName::Spread,
            GateReason::SpreadTooWide,
            Some(spread),
            Some(settings.max_spread_bps),
        )
    }
}

/// Pass iff ATR(14)/RV(20) is at or under the ceiling. A zero or missing
/// RV reads as a neutral 1.0 ratio; NaN operands are treated as 0.
fn volatility_gate(context: &MarketContext, settings: &GateSettings) -> GateResult {
    let atr = zero_if_nan(context.market_stats.atr14);
    let rv = zero_if_nan(context.market_stats.rv20);

    let ratio = if rv > 0.0 { atr / rv } else { 1.0 };

    if ratio <= settings.max_volatility_ratio {
        GateResult::pass(
            GateName::Volatility,
            Some(ratio),
            Some(settings.max_volatility_ratio),
        )
    } else {
        GateResult::fail(
            GateName::Volatility,
            GateReason::VolatilitySpike,
            Some(ratio),
            Some(settings.max_volatility_ratio),
        )
    }
}

/// Fail iff market-maker positioning opposes the trade direction.
/// NEUTRAL always passes.
fn gamma_gate(candidate: &Candidate, context: &MarketContext) -> GateResult {
    let bias = context.options_data.gamma_bias;
    let headwind = matches!(
        (candidate.signal_type, bias),
        (SignalType::Long, GammaBias::Negative) | (SignalType::Short, GammaBias::Positive)
    );

    if headwind {
        GateResult::fail(GateName::Gamma, GateReason::GammaHeadwind, None, None)
    } else {
        GateResult::pass(GateName::Gamma, None, None)
    }
}

/// Pass iff the oscillator magnitude clears the confidence floor.
fn phase_gate(candidate: &Candidate, settings: &GateSettings) -> GateResult {
    let magnitude = candidate.saty_phase.abs() as f64;
    let floor = settings.min_phase_magnitude as f64;

    if magnitude >= floor {
        GateResult::pass(GateName::Phase, Some(magnitude), Some(floor))
    } else {
        GateResult::fail(
            GateName::Phase,
            GateReason::PhaseConfidenceLow,
            Some(magnitude),
            Some(floor),
        )
    }
}

/// Pass during regular sessions; afterhours entries are blocked.
fn session_gate(candidate: &Candidate) -> GateResult {
    if candidate.market_session.is_tradeable() {
        GateResult::pass(GateName::Session, None, None)
    } else {
        GateResult::fail(GateName::Session, GateReason::AfterhoursBlocked, None, None)
    }
}

fn zero_if_nan(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x
    }
}
