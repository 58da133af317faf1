// =============================================================================
// Phase Store — latest regime/phase event per (role, event timeframe)
// =============================================================================
//
// Phase events describe state transitions, not competing signals, so a new
// event always takes its slot. Decay comes from the fixed per-timeframe
// table unless the event carries its own time_decay_minutes.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::normalizer::{ValidationCode, ValidationError};
use crate::types::{TfRole, Timeframe};
use crate::validity::phase_decay_minutes;

use super::ttl::{StoredEntry, SweeperHandle, TtlStore};

/// A regime/phase event from the upstream oscillator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub symbol: String,
    /// Oscillator state in [-100, 100].
    pub phase: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub tf_role: TfRole,
    pub event_tf: Timeframe,
    /// Overrides the decay table when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_decay_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_hints: Option<Value>,
    pub timestamp: i64,
}

impl PhaseRecord {
    /// Parse a raw phase-update payload:
    /// `{phase, confidence?, symbol, timestamp?, tf_role, event_tf, risk_hints?}`.
    pub fn from_payload(raw: &Value, now_ms: i64) -> Result<Self, ValidationError> {
        let phase = raw
            .get("phase")
            .and_then(Value::as_f64)
            .ok_or_else(|| ValidationError {
                code: ValidationCode::MissingField,
                field: "phase".to_string(),
                message: "phase is required and must be a number".to_string(),
            })?
            .clamp(-100.0, 100.0)
            .round() as i32;

        let symbol = raw
            .get("symbol")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError {
                code: ValidationCode::MissingField,
                field: "symbol".to_string(),
                message: "symbol is required".to_string(),
            })?;

        let tf_role = raw
            .get("tf_role")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError {
                code: ValidationCode::MissingField,
                field: "tf_role".to_string(),
                message: "tf_role is required".to_string(),
            })
            .and_then(|s| {
                TfRole::parse(s).ok_or_else(|| ValidationError {
                    code: ValidationCode::InvalidEnumValue,
                    field: "tf_role".to_string(),
                    message: format!("unknown tf_role '{s}'"),
                })
            })?;

        let event_tf = raw
            .get("event_tf")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError {
                code: ValidationCode::MissingField,
                field: "event_tf".to_string(),
                message: "event_tf is required".to_string(),
            })
            .and_then(|s| {
                Timeframe::parse(s).ok_or_else(|| ValidationError {
                    code: ValidationCode::InvalidEnumValue,
                    field: "event_tf".to_string(),
                    message: format!("unknown event_tf '{s}'"),
                })
            })?;

        let confidence = raw.get("confidence").and_then(Value::as_f64);
        let time_decay_minutes = raw
            .get("time_decay_minutes")
            .and_then(Value::as_u64)
            .map(|m| m as u32);
        let risk_hints = raw.get("risk_hints").cloned();
        let timestamp = raw
            .get("timestamp")
            .and_then(Value::as_i64)
            .filter(|ts| *ts > 0)
            .unwrap_or(now_ms);

        Ok(Self {
            symbol,
            phase,
            confidence,
            tf_role,
            event_tf,
            time_decay_minutes,
            risk_hints,
            timestamp,
        })
    }

    /// Effective decay window: explicit override, else the table.
    pub fn decay_minutes(&self) -> u32 {
        self.time_decay_minutes
            .unwrap_or_else(|| phase_decay_minutes(self.event_tf))
    }
}

/// Serialisable view of one live phase slot.
#[derive(Debug, Clone, Serialize)]
pub struct ActivePhase {
    pub tf_role: TfRole,
    pub event_tf: Timeframe,
    pub phase: PhaseRecord,
    pub received_at: i64,
    pub expires_at: i64,
    pub decay_minutes: f64,
    pub remaining_ms: i64,
}

pub struct PhaseStore {
    inner: Arc<TtlStore<(TfRole, Timeframe), PhaseRecord>>,
}

impl PhaseStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TtlStore::new()),
        }
    }

    /// Record a phase event; the newest event always wins its slot.
    pub fn put(&self, record: PhaseRecord, now_ms: i64) {
        let key = (record.tf_role, record.event_tf);
        let decay = record.decay_minutes() as f64;
        debug!(
            tf_role = %record.tf_role,
            event_tf = %record.event_tf,
            phase = record.phase,
            decay_min = decay,
            "phase event stored"
        );
        self.inner.replace(key, record, decay, now_ms);
    }

    pub fn get(
        &self,
        tf_role: TfRole,
        event_tf: Timeframe,
        now_ms: i64,
    ) -> Option<StoredEntry<PhaseRecord>> {
        self.inner.get(&(tf_role, event_tf), now_ms)
    }

    pub fn get_all_active(&self, now_ms: i64) -> Vec<ActivePhase> {
        let mut active: Vec<ActivePhase> = self
            .inner
            .get_all_active(now_ms)
            .into_iter()
            .map(|((tf_role, event_tf), entry)| ActivePhase {
                tf_role,
                event_tf,
                remaining_ms: (entry.expires_at - now_ms).max(0),
                received_at: entry.received_at,
                expires_at: entry.expires_at,
                decay_minutes: entry.validity_minutes,
                phase: entry.payload,
            })
            .collect();
        active.sort_by_key(|p| (p.event_tf.minutes(), p.tf_role.to_string()));
        active
    }

    pub fn sweep(&self, now_ms: i64) -> usize {
        self.inner.sweep(now_ms)
    }

    pub fn remaining_ms(&self, tf_role: TfRole, event_tf: Timeframe, now_ms: i64) -> i64 {
        self.inner.remaining_ms(&(tf_role, event_tf), now_ms)
    }

    pub fn clear(&self) {
        self.inner.clear()
    }

    pub fn start_sweeper(&self, every: Duration) -> SweeperHandle {
        self.inner.start_sweeper(every, "phase")
    }
}

impl Default for PhaseStore {
    fn default() -> Self {
        Self::new()
    }
}
