// =============================================================================
// TTL Store Core — keyed entries with per-entry expiry
// =============================================================================
//
// The pure core: every operation takes `now_ms` explicitly, so tests drive
// expiry with an injected clock and the background sweeper is nothing more
// than a timer calling `sweep` with the wall clock. Reads always re-check
// expiry themselves; the sweeper only reclaims memory.
//
// Puts are linearizable per key: the whole map sits behind one RwLock, so a
// reader sees either the old entry or the new one, never a partial write.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

/// One stored entry plus its expiry bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEntry<V> {
    pub payload: V,
    /// Ingest time, milliseconds since epoch.
    pub received_at: i64,
    /// `received_at` + validity window.
    pub expires_at: i64,
    pub validity_minutes: f64,
    /// Conflict-resolution priority; higher wins strictly.
    pub quality_rank: u8,
}

impl<V> StoredEntry<V> {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// What a rank-resolved put did.
#[derive(Debug, Clone)]
pub enum PutOutcome<V> {
    /// Slot was empty (or held an expired incumbent).
    Inserted,
    /// New entry strictly outranked a live incumbent.
    Replaced,
    /// Live incumbent outranked or tied the new entry; it is returned.
    Rejected(StoredEntry<V>),
}

impl<V> PutOutcome<V> {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

pub struct TtlStore<K, V> {
    entries: RwLock<HashMap<K, StoredEntry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert with quality-priority conflict resolution: an empty or
    /// expired slot always accepts; a live incumbent survives unless the
    /// new entry strictly outranks it. Validity is recomputed by the caller
    /// on every insert.
    pub fn put(
        &self,
        key: K,
        payload: V,
        quality_rank: u8,
        validity_minutes: f64,
        now_ms: i64,
    ) -> PutOutcome<V> {
        let entry = Self::make_entry(payload, quality_rank, validity_minutes, now_ms);
        let mut map = self.entries.write();

        let incumbent = map
            .get(&key)
            .filter(|existing| !existing.is_expired(now_ms))
            .cloned();

        match incumbent {
            Some(existing) => {
                if quality_rank > existing.quality_rank {
                    map.insert(key, entry);
                    PutOutcome::Replaced
                } else {
                    PutOutcome::Rejected(existing)
                }
            }
            None => {
                map.insert(key, entry);
                PutOutcome::Inserted
            }
        }
    }

    /// Unconditional insert: the newest entry always wins the slot.
    pub fn replace(&self, key: K, payload: V, validity_minutes: f64, now_ms: i64) {
        let entry = Self::make_entry(payload, 0, validity_minutes, now_ms);
        self.entries.write().insert(key, entry);
    }

    /// Live entry for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &K, now_ms: i64) -> Option<StoredEntry<V>> {
        let map = self.entries.read();
        map.get(key)
            .filter(|e| !e.is_expired(now_ms))
            .cloned()
    }

    /// Snapshot of every live entry.
    pub fn get_all_active(&self, now_ms: i64) -> Vec<(K, StoredEntry<V>)> {
        let map = self.entries.read();
        map.iter()
            .filter(|(_, e)| !e.is_expired(now_ms))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Drop every expired entry; returns how many were removed. Idempotent.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now_ms));
        before - map.len()
    }

    /// Milliseconds until `key` expires, or 0 if absent/expired.
    pub fn remaining_ms(&self, key: &K, now_ms: i64) -> i64 {
        self.get(key, now_ms)
            .map(|e| (e.expires_at - now_ms).max(0))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn make_entry(
        payload: V,
        quality_rank: u8,
        validity_minutes: f64,
        now_ms: i64,
    ) -> StoredEntry<V> {
        StoredEntry {
            payload,
            received_at: now_ms,
            expires_at: now_ms + (validity_minutes * 60_000.0).round() as i64,
            validity_minutes,
            quality_rank,
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Background sweeper
// =============================================================================

/// Handle to a running sweep loop. The sweeper is an optimisation only;
/// stopping it never affects read correctness.
pub struct SweeperHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Spawn a periodic sweep against the wall clock.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration, label: &'static str) -> SweeperHandle {
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = store.sweep(Utc::now().timestamp_millis());
                if removed > 0 {
                    debug!(store = label, removed, "expired entries swept");
                }
            }
        });
        SweeperHandle { handle }
    }
}
