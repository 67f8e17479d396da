//! # arbiter-trace
//!
//! The flight data recorder: an immutable, append-only, SHA-256
//! hash-chained trace of every governed step and routing decision.
//!
//! ## Overview
//!
//! The router and harness emit `TraceEvent`s through the `TraceSink`
//! boundary; this crate's [`InMemoryRecorder`] chains each one to its
//! predecessor so tampering with any event — even a single byte — breaks
//! the chain and is detected by [`verify_chain`]. Recording is strictly
//! best-effort: a recorder fault drops events, never the run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbiter_trace::InMemoryRecorder;
//!
//! let recorder = Arc::new(InMemoryRecorder::new());
//! let router = Router::new(graph, harness, recorder.clone());
//! let report = router.run(initial);
//!
//! assert!(recorder.verify_integrity());
//! let log = recorder.export_log();
//! ```

pub mod chain;
pub mod event;
pub mod recorder;

pub use chain::{hash_event, verify_chain};
pub use event::{ChainedEvent, TraceLog};
pub use recorder::{InMemoryRecorder, IsolatedSink};

// ── Tests ─────────────────────────────────────────────────────────────────────
