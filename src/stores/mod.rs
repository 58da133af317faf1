// =============================================================================
// TTL Stores — latest signal/phase per logical slot, with background eviction
// =============================================================================

pub mod phase;
pub mod timeframe;
pub mod ttl;

pub use phase::{PhaseRecord, PhaseStore};
pub use timeframe::{SignalRecord, TimeframeStore};
pub use ttl::{PutOutcome, StoredEntry, SweeperHandle, TtlStore};
