//! Recorder implementations of the `TraceSink` boundary.
//!
//! The recorder is a pure observer: none of these implementations can abort
//! or alter the governed execution. `InMemoryRecorder` swallows its own
//! faults; `IsolatedSink` adds a panic boundary around any third-party
//! exporter.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use arbiter_contracts::state::ExecutionId;
use arbiter_contracts::trace::TraceEvent;
use arbiter_core::traits::TraceSink;

use crate::chain::{hash_event, verify_chain};
use crate::event::{ChainedEvent, TraceLog};

// ── In-memory recorder ───────────────────────────────────────────────────────

struct RecorderState {
    events: Vec<ChainedEvent>,
    sequence: u64,
    last_hash: String,
}

/// An in-memory, append-only recorder backed by a SHA-256 hash chain.
///
/// Events are chained in arrival order. `record` never fails from the
/// caller's perspective: a poisoned lock or unserializable event drops the
/// event, nothing more.
pub struct InMemoryRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                events: Vec::new(),
                sequence: 0,
                last_hash: ChainedEvent::GENESIS_HASH.to_string(),
            })),
        }
    }

    /// Export a sealed `TraceLog` with everything recorded so far.
    pub fn export_log(&self) -> TraceLog {
        let Ok(state) = self.state.lock() else {
            return TraceLog {
                events: Vec::new(),
                finalized_at: Utc::now(),
                terminal_hash: String::new(),
            };
        };

        let terminal_hash = state
            .events
            .last()
            .map(|e| e.this_hash.clone())
            .unwrap_or_default();

        info!(
            event_count = state.events.len(),
            terminal_hash = %terminal_hash,
            "trace log exported"
        );

        TraceLog {
            events: state.events.clone(),
            finalized_at: Utc::now(),
            terminal_hash,
        }
    }

    /// All entries belonging to one execution, in chain order.
    pub fn execution_trace(&self, execution_id: &ExecutionId) -> Vec<ChainedEvent> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .events
            .iter()
            .filter(|e| &e.event.execution_id == execution_id)
            .cloned()
            .collect()
    }

    /// Event-name counts for one execution — a quick audit digest.
    pub fn summary(&self, execution_id: &ExecutionId) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.execution_trace(execution_id) {
            *counts.entry(entry.event.name).or_insert(0) += 1;
        }
        counts
    }

    /// Verify that the in-memory chain has not been tampered with.
    pub fn verify_integrity(&self) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        verify_chain(&state.events)
    }

    #[cfg(test)]
    pub(crate) fn tamper_with(&self, index: usize, f: impl FnOnce(&mut ChainedEvent)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state.events[index]);
    }
}

impl TraceSink for InMemoryRecorder {
    fn record(&self, event: TraceEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let prev_hash = state.last_hash.clone();
        let sequence = state.sequence;

        let Some(this_hash) = hash_event(sequence, &event, &prev_hash) else {
            return;
        };

        state.events.push(ChainedEvent {
            sequence,
            event,
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.sequence += 1;
        state.last_hash = this_hash;
    }
}

// ── Fault isolation boundary ─────────────────────────────────────────────────

/// Wraps any sink in a panic boundary.
///
/// The recorder contract says exporter failures must never reach the
/// governed run; this wrapper enforces it even for sinks that panic,
/// counting dropped events instead of propagating.
pub struct IsolatedSink<S> {
    inner: S,
    dropped: AtomicU64,
}

impl<S: TraceSink> IsolatedSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events lost to inner-sink panics so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S: TraceSink> TraceSink for IsolatedSink<S> {
    fn record(&self, event: TraceEvent) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.record(event)));
        if outcome.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
