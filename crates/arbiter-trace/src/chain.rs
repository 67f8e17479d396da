//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. the event's execution_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of the trace event (serde_json, no pretty-printing)

use sha2::{Digest, Sha256};

use arbiter_contracts::trace::TraceEvent;

use crate::event::ChainedEvent;

/// Compute the SHA-256 hash for one chain entry.
///
/// Returns a lowercase 64-character hex string, or `None` when the event
/// cannot be serialized — the recorder drops such events rather than
/// aborting the run it observes.
pub fn hash_event(sequence: u64, event: &TraceEvent, prev_hash: &str) -> Option<String> {
    let event_json = serde_json::to_vec(event).ok()?;

    let mut hasher = Sha256::new();
    hasher.update(event.execution_id.to_string().as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&event_json);

    Some(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Returns `true` when the chain is valid under both rules:
///
/// 1. **Prev-hash linkage** — each entry's `prev_hash` equals the
///    `this_hash` of the preceding entry (or `GENESIS_HASH` for entry 0).
/// 2. **Hash correctness** — each entry's `this_hash` matches the value
///    recomputed from its own fields.
///
/// Returns `false` at the first mismatch. An empty chain is valid.
pub fn verify_chain(events: &[ChainedEvent]) -> bool {
    let mut expected_prev = ChainedEvent::GENESIS_HASH.to_string();

    for entry in events {
        if entry.prev_hash != expected_prev {
            return false;
        }

        match hash_event(entry.sequence, &entry.event, &entry.prev_hash) {
            Some(recomputed) if entry.this_hash == recomputed => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}
