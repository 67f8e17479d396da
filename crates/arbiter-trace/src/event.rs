//! Chained trace events and the sealed log.
//!
//! `ChainedEvent` wraps a kernel `TraceEvent` with sequence numbering and
//! the SHA-256 hashes that make tampering detectable. `TraceLog` is the
//! sealed record exported once recording is done.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbiter_contracts::trace::TraceEvent;

/// A single entry in the SHA-256 hash chain.
///
/// Each entry commits to the previous one via `prev_hash`, forming an
/// append-only chain. Modifying any field — including those of the embedded
/// event — invalidates `this_hash` and every subsequent `prev_hash`, which
/// `verify_chain` detects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedEvent {
    /// Monotonically increasing position in the chain, starting at 0.
    pub sequence: u64,

    /// The trace event as emitted by the router or harness.
    pub event: TraceEvent,

    /// SHA-256 hash (hex) of the previous entry, or `GENESIS_HASH` for the
    /// first.
    pub prev_hash: String,

    /// SHA-256 hash (hex) of this entry's canonical content.
    pub this_hash: String,
}

impl ChainedEvent {
    /// The sentinel `prev_hash` used for the first entry in every chain.
    ///
    /// 64 hex zeros — never the SHA-256 of real data, so genesis detection
    /// is unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A sealed trace log.
///
/// The `terminal_hash` is the `this_hash` of the last entry and serves as a
/// compact commitment to the entire log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLog {
    /// All entries in chain order (sequence 0 first).
    pub events: Vec<ChainedEvent>,

    /// Wall-clock time (UTC) the log was exported.
    pub finalized_at: DateTime<Utc>,

    /// The `this_hash` of the last entry. Empty string if the log is empty.
    pub terminal_hash: String,
}
