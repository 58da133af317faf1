// =============================================================================
// Confidence Assembler — bounded score for approved candidates
// =============================================================================
//
// Only runs when every gate passed. Boosts are additive and the cap is
// applied exactly once, at the end:
//
//   confidence = ai_score
//              + phase boost   (|saty_phase| >= 80)
//              + spread boost  (spread_bps   <= 5)
//   confidence = clamp(confidence, [0, 10])
// =============================================================================

use crate::config::ConfidenceSettings;
use crate::context::MarketContext;
use crate::normalizer::Candidate;

pub fn assemble(
    candidate: &Candidate,
    context: &MarketContext,
    settings: &ConfidenceSettings,
) -> f64 {
    let mut confidence = candidate.ai_score;

    if candidate.saty_phase.abs() >= settings.phase_boost_threshold {
        confidence += settings.phase_boost;
    }
    if context.liquidity_data.spread_bps <= settings.tight_spread_bps {
        confidence += settings.spread_boost;
    }

    confidence.clamp(0.0, settings.max_confidence)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LiquidityData, MarketStatsData, OptionsData};
    use crate::types::{DataSource, GammaBias, MarketSession, SignalType, TradeVelocity};

    fn candidate(ai_score: f64, saty_phase: i32) -> Candidate {
        Candidate {
            signal_type: SignalType::Long,
            ai_score,
            saty_phase,
            market_session: MarketSession::Open,
            symbol: "SPY".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    fn context(spread_bps: f64) -> MarketContext {
        MarketContext {
            options_data: OptionsData {
                put_call_ratio: 1.0,
                iv_percentile: 50.0,
                gamma_bias: GammaBias::Neutral,
                data_source: DataSource::Api,
            },
            market_stats: MarketStatsData {
                atr14: 1.0,
                rv20: 1.0,
                trend_slope: 0.0,
                data_source: DataSource::Api,
            },
            liquidity_data: LiquidityData {
                spread_bps,
                depth_score: 80.0,
                trade_velocity: TradeVelocity::Normal,
                data_source: DataSource::Api,
            },
        }
    }

    fn settings() -> ConfidenceSettings {
        ConfidenceSettings::default()
    }

    #[test]
    fn plain_score_passes_through() {
        let c = assemble(&candidate(7.5, 75), &context(8.0), &settings());
        assert_eq!(c, 7.5);
    }

    #[test]
    fn boosts_stack_additively() {
        // 6.0 + 0.5 (phase 85) + 0.3 (spread 3) = 6.8
        let c = assemble(&candidate(6.0, 85), &context(3.0), &settings());
        assert!((c - 6.8).abs() < 1e-9);
    }

    #[test]
    fn negative_phase_magnitude_earns_the_boost() {
        let c = assemble(&candidate(6.0, -85), &context(8.0), &settings());
        assert!((c - 6.5).abs() < 1e-9);
    }

    #[test]
    fn cap_applies_once_at_the_end() {
        // 10.0 + 0.5 + 0.3 would be 10.8.
        let c = assemble(&candidate(10.0, 85), &context(3.0), &settings());
        assert_eq!(c, 10.0);
    }

    #[test]
    fn zero_score_is_a_legal_confidence() {
        let c = assemble(&candidate(0.0, 75), &context(8.0), &settings());
        assert_eq!(c, 0.0);
    }

    #[test]
    fn boundary_thresholds_are_inclusive() {
        // Exactly 80 phase and exactly 5 bps both earn their boosts.
        let c = assemble(&candidate(5.0, 80), &context(5.0), &settings());
        assert!((c - 5.8).abs() < 1e-9);
    }
}
