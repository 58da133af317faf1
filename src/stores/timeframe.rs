// =============================================================================
// Timeframe Store — latest signal per chart timeframe
// =============================================================================
//
// One slot per timeframe. A live incumbent only yields to a strictly
// higher-quality signal; validity is recomputed from (timeframe, quality,
// session) on every accepted insert.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::types::{MarketSession, QualityTier, SignalType, Timeframe};
use crate::validity::{signal_validity, ValidityBreakdown};

use super::ttl::{PutOutcome, StoredEntry, SweeperHandle, TtlStore};

/// The enriched signal payload kept per timeframe slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub signal_type: SignalType,
    pub ai_score: f64,
    pub saty_phase: i32,
    pub quality: QualityTier,
    pub session: MarketSession,
    pub timestamp: i64,
}

/// Serialisable view of one live slot, for the diagnostic API.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSignal {
    pub timeframe: Timeframe,
    pub signal: SignalRecord,
    pub received_at: i64,
    pub expires_at: i64,
    pub validity_minutes: f64,
    pub remaining_ms: i64,
}

pub struct TimeframeStore {
    inner: Arc<TtlStore<Timeframe, SignalRecord>>,
}

impl TimeframeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TtlStore::new()),
        }
    }

    /// Insert a signal, resolving conflicts by quality. Returns the
    /// computed validity breakdown alongside the outcome.
    pub fn put(
        &self,
        timeframe: Timeframe,
        record: SignalRecord,
        now_ms: i64,
    ) -> (PutOutcome<SignalRecord>, ValidityBreakdown) {
        let breakdown = signal_validity(timeframe, record.quality, record.session);
        let rank = record.quality.rank();
        let outcome = self
            .inner
            .put(timeframe, record, rank, breakdown.validity_minutes, now_ms);

        match &outcome {
            PutOutcome::Inserted => {
                debug!(%timeframe, validity_min = breakdown.validity_minutes, "signal stored")
            }
            PutOutcome::Replaced => {
                debug!(%timeframe, "higher-quality signal replaced incumbent")
            }
            PutOutcome::Rejected(existing) => debug!(
                %timeframe,
                incumbent_quality = %existing.payload.quality,
                "signal discarded, incumbent retained"
            ),
        }

        (outcome, breakdown)
    }

    pub fn get(&self, timeframe: Timeframe, now_ms: i64) -> Option<StoredEntry<SignalRecord>> {
        self.inner.get(&timeframe, now_ms)
    }

    /// Live slots, ordered by timeframe.
    pub fn get_all_active(&self, now_ms: i64) -> Vec<ActiveSignal> {
        let mut active: Vec<ActiveSignal> = self
            .inner
            .get_all_active(now_ms)
            .into_iter()
            .map(|(timeframe, entry)| ActiveSignal {
                timeframe,
                remaining_ms: (entry.expires_at - now_ms).max(0),
                received_at: entry.received_at,
                expires_at: entry.expires_at,
                validity_minutes: entry.validity_minutes,
                signal: entry.payload,
            })
            .collect();
        active.sort_by_key(|s| s.timeframe.minutes());
        active
    }

    pub fn sweep(&self, now_ms: i64) -> usize {
        self.inner.sweep(now_ms)
    }

    pub fn remaining_ms(&self, timeframe: Timeframe, now_ms: i64) -> i64 {
        self.inner.remaining_ms(&timeframe, now_ms)
    }

    pub fn clear(&self) {
        self.inner.clear()
    }

    pub fn start_sweeper(&self, every: Duration) -> SweeperHandle {
        self.inner.start_sweeper(every, "timeframe")
    }
}

impl Default for TimeframeStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    fn record(quality: QualityTier) -> SignalRecord {
        SignalRecord {
            symbol: "SPY".to_string(),
            signal_type: SignalType::Long,
            ai_score: 8.0,
            saty_phase: 80,
            quality,
            session: MarketSession::Midday,
            timestamp: T0,
        }
    }

    #[test]
    fn extreme_incumbent_survives_medium_challenger() {
        let store = TimeframeStore::new();
        store.put(Timeframe::M15, record(QualityTier::Extreme), T0);
        let (outcome, _) = store.put(Timeframe::M15, record(QualityTier::Medium), T0 + 1);

        assert!(!outcome.accepted());
        assert_eq!(
            store.get(Timeframe::M15, T0 + 2).unwrap().payload.quality,
            QualityTier::Extreme
        );
    }

    #[test]
    fn high_challenger_replaces_medium_incumbent() {
        let store = TimeframeStore::new();
        store.put(Timeframe::M15, record(QualityTier::Medium), T0);
        let (outcome, _) = store.put(Timeframe::M15, record(QualityTier::High), T0 + 1);

        assert!(outcome.accepted());
        assert_eq!(
            store.get(Timeframe::M15, T0 + 2).unwrap().payload.quality,
            QualityTier::High
        );
    }

    #[test]
    fn equal_quality_keeps_the_first_entry() {
        let store = TimeframeStore::new();
        let mut first = record(QualityTier::High);
        first.ai_score = 7.0;
        let mut second = record(QualityTier::High);
        second.ai_score = 9.9;

        store.put(Timeframe::M15, first, T0);
        let (outcome, _) = store.put(Timeframe::M15, second, T0 + 1);

        assert!(!outcome.accepted());
        assert_eq!(
            store.get(Timeframe::M15, T0 + 2).unwrap().payload.ai_score,
            7.0
        );
    }

    #[test]
    fn expired_extreme_loses_to_fresh_medium() {
        let store = TimeframeStore::new();
        let (_, breakdown) = store.put(Timeframe::M15, record(QualityTier::Extreme), T0);
        let after_expiry = T0 + (breakdown.validity_minutes * 60_000.0) as i64;

        let (outcome, _) = store.put(Timeframe::M15, record(QualityTier::Medium), after_expiry);
        assert!(outcome.accepted());
        assert_eq!(
            store
                .get(Timeframe::M15, after_expiry + 1)
                .unwrap()
                .payload
                .quality,
            QualityTier::Medium
        );
    }

    #[test]
    fn validity_follows_the_multiplier_table() {
        let store = TimeframeStore::new();
        // 15 × 1.0 × 1.0 × 1.0 (MIDDAY, HIGH) = 15 minutes.
        let (_, breakdown) = store.put(Timeframe::M15, record(QualityTier::High), T0);
        assert_eq!(breakdown.validity_minutes, 15.0);

        let entry = store.get(Timeframe::M15, T0).unwrap();
        assert_eq!(entry.expires_at, T0 + 15 * MINUTE);
    }

    #[test]
    fn slots_are_independent_per_timeframe() {
        let store = TimeframeStore::new();
        store.put(Timeframe::M5, record(QualityTier::Medium), T0);
        store.put(Timeframe::H1, record(QualityTier::Extreme), T0);

        let active = store.get_all_active(T0 + 1);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].timeframe, Timeframe::M5);
        assert_eq!(active[1].timeframe, Timeframe::H1);
    }

    #[test]
    fn expired_slots_vanish_from_reads() {
        let store = TimeframeStore::new();
        let (_, breakdown) = store.put(Timeframe::M5, record(QualityTier::Medium), T0);
        let gone = T0 + (breakdown.validity_minutes * 60_000.0) as i64;

        assert!(store.get(Timeframe::M5, gone).is_none());
        assert!(store.get_all_active(gone).is_empty());
        assert_eq!(store.remaining_ms(Timeframe::M5, gone), 0);
    }
}
