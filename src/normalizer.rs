// =============================================================================
// Candidate Normalizer — loose webhook JSON to a well-typed decision candidate
// =============================================================================
//
// The boundary hands the core a `serde_json::Value` because upstream webhook
// payloads are not trustworthy enough for strict serde shapes. Each field is
// extracted by hand and either clamped (with a warning) or rejected with a
// structured validation code:
//
//   signal.type       missing/invalid  -> reject
//   signal.ai_score   missing/non-num  -> reject; out-of-range -> clamp
//   signal.symbol     missing/empty    -> reject
//   signal.timestamp  missing/invalid  -> default to ingest clock
//   satyPhase.phase   missing/invalid  -> default 0; out-of-range -> clamp
//   marketSession     missing/invalid  -> default OPEN
//
// Normalisation is pure: identical (raw, now_ms) always yields the same
// candidate.
// =============================================================================

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{MarketSession, SignalType};

/// Inclusive ai_score domain after normalisation.
pub const AI_SCORE_MAX: f64 = 10.5;
/// Inclusive |saty_phase| bound after normalisation.
pub const SATY_PHASE_MAX: i32 = 100;

/// The normalized record handed to the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub signal_type: SignalType,
    pub ai_score: f64,
    pub saty_phase: i32,
    pub market_session: MarketSession,
    pub symbol: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

/// Structured validation failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingField,
    InvalidType,
    InvalidEnumValue,
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField => write!(f, "MISSING_FIELD"),
            Self::InvalidType => write!(f, "INVALID_TYPE"),
            Self::InvalidEnumValue => write!(f, "INVALID_ENUM_VALUE"),
        }
    }
}

/// A rejected candidate. Surfaced at the boundary as a 400-class error,
/// never as a REJECT verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(code: ValidationCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.code, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Normalize a raw webhook payload into a [`Candidate`].
///
/// `now_ms` is the ingest clock, injected so the function stays pure.
pub fn normalize(raw: &Value, now_ms: i64) -> Result<Candidate, ValidationError> {
    let signal = match raw.get("signal") {
        Some(Value::Object(_)) => &raw["signal"],
        Some(_) => {
            return Err(ValidationError::new(
                ValidationCode::InvalidType,
                "signal",
                "signal must be an object",
            ))
        }
        None => {
            return Err(ValidationError::new(
                ValidationCode::MissingField,
                "signal",
                "signal object is required",
            ))
        }
    };

    // ── signal.type ─────────────────────────────────────────────────────
    let signal_type = match signal.get("type") {
        Some(Value::String(s)) => SignalType::parse(s).ok_or_else(|| {
            ValidationError::new(
                ValidationCode::InvalidEnumValue,
                "signal.type",
                format!("unknown signal type '{s}' (expected LONG or SHORT)"),
            )
        })?,
        Some(_) => {
            return Err(ValidationError::new(
                ValidationCode::InvalidType,
                "signal.type",
                "signal type must be a string",
            ))
        }
        None => {
            return Err(ValidationError::new(
                ValidationCode::MissingField,
                "signal.type",
                "signal type is required",
            ))
        }
    };

    // ── signal.ai_score ─────────────────────────────────────────────────
    let ai_score = match signal.get("ai_score") {
        Some(v) => match v.as_f64() {
            Some(score) => clamp_ai_score(score),
            None => {
                return Err(ValidationError::new(
                    ValidationCode::InvalidType,
                    "signal.ai_score",
                    "ai_score must be a number",
                ))
            }
        },
        None => {
            return Err(ValidationError::new(
                ValidationCode::MissingField,
                "signal.ai_score",
                "ai_score is required",
            ))
        }
    };

    // ── signal.symbol ───────────────────────────────────────────────────
    let symbol = match signal.get("symbol") {
        Some(Value::String(s)) => {
            let upper = s.trim().to_uppercase();
            if upper.is_empty() {
                return Err(ValidationError::new(
                    ValidationCode::MissingField,
                    "signal.symbol",
                    "symbol must be non-empty",
                ));
            }
            upper
        }
        Some(_) => {
            return Err(ValidationError::new(
                ValidationCode::InvalidType,
                "signal.symbol",
                "symbol must be a string",
            ))
        }
        None => {
            return Err(ValidationError::new(
                ValidationCode::MissingField,
                "signal.symbol",
                "symbol is required",
            ))
        }
    };

    // ── signal.timestamp (defaulting) ───────────────────────────────────
    let timestamp = signal
        .get("timestamp")
        .and_then(Value::as_i64)
        .filter(|ts| *ts > 0)
        .unwrap_or(now_ms);

    // ── satyPhase.phase (defaulting + clamp) ────────────────────────────
    let saty_phase = raw
        .get("satyPhase")
        .and_then(|p| p.get("phase"))
        .and_then(Value::as_f64)
        .map(|phase| {
            if phase < -(SATY_PHASE_MAX as f64) || phase > SATY_PHASE_MAX as f64 {
                warn!(symbol = %symbol, phase, "saty phase out of range, clamping");
            }
            phase.clamp(-(SATY_PHASE_MAX as f64), SATY_PHASE_MAX as f64).round() as i32
        })
        .unwrap_or(0);

    // ── marketSession (defaulting) ──────────────────────────────────────
    let market_session = raw
        .get("marketSession")
        .and_then(Value::as_str)
        .and_then(MarketSession::parse)
        .unwrap_or_default();

    Ok(Candidate {
        signal_type,
        ai_score,
        saty_phase,
        market_session,
        symbol,
        timestamp,
    })
}

/// NaN maps to 0, +inf to the ceiling, everything else clamps to
/// [0, AI_SCORE_MAX].
fn clamp_ai_score(score: f64) -> f64 {
    if score.is_nan() {
        warn!("ai_score is NaN, normalising to 0");
        return 0.0;
    }
    if score < 0.0 || score > AI_SCORE_MAX {
        warn!(score, "ai_score out of range, clamping");
    }
    score.clamp(0.0, AI_SCORE_MAX)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn valid_payload() -> Value {
        json!({
            "signal": {
                "type": "LONG",
                "ai_score": 7.5,
                "symbol": "spy",
                "timestamp": 1_699_999_999_000_i64
            },
            "satyPhase": { "phase": 75 },
            "marketSession": "open"
        })
    }

    #[test]
    fn full_payload_normalises() {
        let c = normalize(&valid_payload(), NOW).unwrap();
        assert_eq!(c.signal_type, SignalType::Long);
        assert_eq!(c.ai_score, 7.5);
        assert_eq!(c.saty_phase, 75);
        assert_eq!(c.market_session, MarketSession::Open);
        assert_eq!(c.symbol, "SPY");
        assert_eq!(c.timestamp, 1_699_999_999_000);
    }

    #[test]
    fn missing_signal_object_rejects() {
        let err = normalize(&json!({}), NOW).unwrap_err();
        assert_eq!(err.code, ValidationCode::MissingField);
        assert_eq!(err.field, "signal");
    }

    #[test]
    fn missing_type_rejects() {
        let err = normalize(
            &json!({"signal": {"ai_score": 5.0, "symbol": "SPY"}}),
            NOW,
        )
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::MissingField);
        assert_eq!(err.field, "signal.type");
    }

    #[test]
    fn unknown_type_is_invalid_enum() {
        let err = normalize(
            &json!({"signal": {"type": "SIDEWAYS", "ai_score": 5.0, "symbol": "SPY"}}),
            NOW,
        )
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidEnumValue);
    }

    #[test]
    fn non_numeric_ai_score_rejects() {
        let err = normalize(
            &json!({"signal": {"type": "LONG", "ai_score": "high", "symbol": "SPY"}}),
            NOW,
        )
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidType);
        assert_eq!(err.field, "signal.ai_score");
    }

    #[test]
    fn ai_score_clamps_to_domain() {
        let mut payload = valid_payload();
        payload["signal"]["ai_score"] = json!(42.0);
        assert_eq!(normalize(&payload, NOW).unwrap().ai_score, AI_SCORE_MAX);

        payload["signal"]["ai_score"] = json!(-3.0);
        assert_eq!(normalize(&payload, NOW).unwrap().ai_score, 0.0);
    }

    #[test]
    fn nan_and_infinity_are_normalised() {
        assert_eq!(clamp_ai_score(f64::NAN), 0.0);
        assert_eq!(clamp_ai_score(f64::INFINITY), AI_SCORE_MAX);
        assert_eq!(clamp_ai_score(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn phase_defaults_and_clamps() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("satyPhase");
        assert_eq!(normalize(&payload, NOW).unwrap().saty_phase, 0);

        payload["satyPhase"] = json!({"phase": 250});
        assert_eq!(normalize(&payload, NOW).unwrap().saty_phase, 100);

        payload["satyPhase"] = json!({"phase": -250});
        assert_eq!(normalize(&payload, NOW).unwrap().saty_phase, -100);

        payload["satyPhase"] = json!({"phase": "deep"});
        assert_eq!(normalize(&payload, NOW).unwrap().saty_phase, 0);
    }

    #[test]
    fn session_defaults_to_open() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("marketSession");
        assert_eq!(
            normalize(&payload, NOW).unwrap().market_session,
            MarketSession::Open
        );

        payload["marketSession"] = json!("LUNCH_BREAK");
        assert_eq!(
            normalize(&payload, NOW).unwrap().market_session,
            MarketSession::Open
        );
    }

    #[test]
    fn timestamp_defaults_to_ingest_clock() {
        let mut payload = valid_payload();
        payload["signal"].as_object_mut().unwrap().remove("timestamp");
        assert_eq!(normalize(&payload, NOW).unwrap().timestamp, NOW);

        payload["signal"]["timestamp"] = json!(-5);
        assert_eq!(normalize(&payload, NOW).unwrap().timestamp, NOW);

        payload["signal"]["timestamp"] = json!("yesterday");
        assert_eq!(normalize(&payload, NOW).unwrap().timestamp, NOW);
    }

    #[test]
    fn symbol_is_uppercased() {
        let mut payload = valid_payload();
        payload["signal"]["symbol"] = json!("  qqq ");
        assert_eq!(normalize(&payload, NOW).unwrap().symbol, "QQQ");
    }

    #[test]
    fn normalisation_is_deterministic() {
        let a = normalize(&valid_payload(), NOW).unwrap();
        let b = normalize(&valid_payload(), NOW).unwrap();
        assert_eq!(a, b);
    }
}
