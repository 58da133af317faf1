// =============================================================================
// Validity Calculator — how long a stored signal or phase stays current
// =============================================================================
//
// Pure arithmetic, no clock. The timeframe store calls this on every insert;
// the diagnostic API exposes the full breakdown so operators can see why a
// signal got the window it did.
// =============================================================================

use serde::Serialize;

use crate::types::{MarketSession, QualityTier, Timeframe};

/// Upper clamp for any signal validity window, in minutes.
pub const VALIDITY_CAP_MINUTES: f64 = 720.0;

/// Which bound, if any, the raw product was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampReason {
    Min,
    Max,
    None,
}

/// Structured result of a validity computation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidityBreakdown {
    pub timeframe: Timeframe,
    pub base_minutes: f64,
    pub role_multiplier: f64,
    pub quality_multiplier: f64,
    pub session_multiplier: f64,
    /// base × role × quality × session, before clamping.
    pub raw_minutes: f64,
    pub validity_minutes: f64,
    pub clamped: bool,
    pub clamp_reason: ClampReason,
}

/// Validity window for a stored signal:
/// `clamp(base_tf × role × quality × session, [base_tf, 720])`.
pub fn signal_validity(
    timeframe: Timeframe,
    quality: QualityTier,
    session: MarketSession,
) -> ValidityBreakdown {
    let base_minutes = timeframe.minutes() as f64;
    let role_multiplier = role_multiplier(timeframe);
    let quality_multiplier = quality_multiplier(quality);
    let session_multiplier = session_multiplier(session);

    let raw_minutes = base_minutes * role_multiplier * quality_multiplier * session_multiplier;

    let (validity_minutes, clamp_reason) = if raw_minutes < base_minutes {
        (base_minutes, ClampReason::Min)
    } else if raw_minutes > VALIDITY_CAP_MINUTES {
        (VALIDITY_CAP_MINUTES, ClampReason::Max)
    } else {
        (raw_minutes, ClampReason::None)
    };

    ValidityBreakdown {
        timeframe,
        base_minutes,
        role_multiplier,
        quality_multiplier,
        session_multiplier,
        raw_minutes,
        validity_minutes,
        clamped: clamp_reason != ClampReason::None,
        clamp_reason,
    }
}

/// Higher timeframes anchor the hierarchy and stay valid longer.
fn role_multiplier(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::H4 => 2.0,
        Timeframe::H1 => 1.5,
        _ => 1.0,
    }
}

fn quality_multiplier(quality: QualityTier) -> f64 {
    match quality {
        QualityTier::Extreme => 1.5,
        QualityTier::High => 1.0,
        QualityTier::Medium => 0.75,
    }
}

fn session_multiplier(session: MarketSession) -> f64 {
    match session {
        MarketSession::Open => 0.8,
        MarketSession::Midday => 1.0,
        MarketSession::PowerHour => 0.7,
        MarketSession::Afterhours => 0.5,
    }
}

/// Decay window for a stored phase event, keyed by its event timeframe.
pub fn phase_decay_minutes(timeframe: Timeframe) -> u32 {
    match timeframe {
        Timeframe::H4 => 480,
        Timeframe::H1 => 240,
        Timeframe::M30 => 120,
        Timeframe::M15 => 60,
        Timeframe::M5 => 30,
        Timeframe::M3 => 15,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midday_high_15m_is_identity() {
        let b = signal_validity(Timeframe::M15, QualityTier::High, MarketSession::Midday);
        assert_eq!(b.validity_minutes, 15.0);
        assert_eq!(b.raw_minutes, 15.0);
        assert!(!b.clamped);
        assert_eq!(b.clamp_reason, ClampReason::None);
    }

    #[test]
    fn extreme_4h_midday_hits_the_cap_exactly() {
        // 240 × 2.0 × 1.5 × 1.0 = 720, sitting exactly at the maximum.
        let b = signal_validity(Timeframe::H4, QualityTier::Extreme, MarketSession::Midday);
        assert_eq!(b.raw_minutes, 720.0);
        assert_eq!(b.validity_minutes, 720.0);
        assert!(!b.clamped);
    }

    #[test]
    fn afterhours_medium_3m_clamps_to_base() {
        // 3 × 1.0 × 0.75 × 0.5 = 1.125, clamped up to the base timeframe.
        let b = signal_validity(Timeframe::M3, QualityTier::Medium, MarketSession::Afterhours);
        assert!((b.raw_minutes - 1.125).abs() < 1e-9);
        assert_eq!(b.validity_minutes, 3.0);
        assert!(b.clamped);
        assert_eq!(b.clamp_reason, ClampReason::Min);
    }

    #[test]
    fn extreme_4h_exceeding_cap_clamps_to_max() {
        // Only MIDDAY reaches exactly 720; anything above would clamp. An
        // EXTREME 4H in OPEN lands below: 240 × 2.0 × 1.5 × 0.8 = 576.
        let b = signal_validity(Timeframe::H4, QualityTier::Extreme, MarketSession::Open);
        assert_eq!(b.validity_minutes, 576.0);
        assert!(!b.clamped);
    }

    #[test]
    fn validity_stays_within_bounds_for_every_combination() {
        let qualities = [QualityTier::Medium, QualityTier::High, QualityTier::Extreme];
        let sessions = [
            MarketSession::Open,
            MarketSession::Midday,
            MarketSession::PowerHour,
            MarketSession::Afterhours,
        ];
        for tf in Timeframe::ALL {
            for q in qualities {
                for s in sessions {
                    let b = signal_validity(tf, q, s);
                    assert!(
                        b.validity_minutes >= tf.minutes() as f64,
                        "{tf} {q} {s}: below base"
                    );
                    assert!(
                        b.validity_minutes <= VALIDITY_CAP_MINUTES,
                        "{tf} {q} {s}: above cap"
                    );
                }
            }
        }
    }

    #[test]
    fn phase_decay_table_matches_roles() {
        assert_eq!(phase_decay_minutes(Timeframe::H4), 480);
        assert_eq!(phase_decay_minutes(Timeframe::H1), 240);
        assert_eq!(phase_decay_minutes(Timeframe::M30), 120);
        assert_eq!(phase_decay_minutes(Timeframe::M15), 60);
        assert_eq!(phase_decay_minutes(Timeframe::M5), 30);
        assert_eq!(phase_decay_minutes(Timeframe::M3), 15);
    }
}
