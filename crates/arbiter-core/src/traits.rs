//! Trust-boundary trait definitions for the arbiter kernel.
//!
//! These traits define the complete seam between the kernel and its
//! external collaborators:
//!
//! - `SchemaValidator`           — the sanitizing firewall's check primitive
//! - `StructuredOutputProvider`  — retry-based schema enforcement
//! - `CheckpointStore`           — snapshot persistence for interrupt/resume
//! - `TraceSink`                 — the flight data recorder boundary
//!
//! The harness and router are written against these traits only; reference
//! implementations live in sibling crates and mocks in tests. Instruction
//! implementations themselves satisfy the separate `Invoke` capability in
//! arbiter-contracts — they are untrusted and never see these traits.

use std::sync::Arc;

use serde_json::Value;

use arbiter_contracts::error::ArbiterResult;
use arbiter_contracts::instruction::Invoke;
use arbiter_contracts::state::{ExecutionId, ManagedState};
use arbiter_contracts::trace::TraceEvent;

/// Validates a value against a JSON Schema document.
///
/// Implementations are **trusted** and must be deterministic. Validation
/// runs on every governed step — avoid I/O.
pub trait SchemaValidator: Send + Sync {
    /// Check `value` against `schema`.
    ///
    /// Returns `Ok(())` on success, or the full list of violation messages —
    /// callers want the complete picture in one pass, not the first failure.
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), Vec<String>>;
}

/// Retry-based structured-output enforcement for Cognitive and Memory
/// bindings.
///
/// Given an implementation handle, an output schema, and a retry budget,
/// the provider must return a schema-valid value or a typed enforcement
/// failure. How it biases retries (feeding prior validation errors back to
/// the implementation) is the provider's own affair.
pub trait StructuredOutputProvider: Send + Sync {
    /// Invoke `implementation` until its output satisfies `schema` or the
    /// budget of `1 + max_retries` attempts is spent.
    ///
    /// On success returns the valid output and the number of attempts
    /// consumed. Exhausted retries produce
    /// `ArbiterError::SchemaEnforcement`; an implementation fault produces
    /// `ArbiterError::Execution` and is not retried.
    fn invoke_structured(
        &self,
        implementation: &Arc<dyn Invoke>,
        input: &Value,
        schema: &Value,
        max_retries: u32,
        node: &str,
    ) -> ArbiterResult<(Value, u32)>;
}

/// Durable storage for state snapshots, keyed by `(execution_id, step)`.
///
/// Required only to support interrupt/resume and crash recovery. The router
/// calls `save` after every step and `load` on resume; both must be
/// idempotent.
pub trait CheckpointStore: Send + Sync {
    /// Persist one snapshot under its own `(execution_id, step)` key.
    fn save(&self, snapshot: &ManagedState) -> ArbiterResult<()>;

    /// Retrieve the snapshot stored under `(execution_id, step)`.
    fn load(&self, execution_id: &ExecutionId, step: u64) -> ArbiterResult<ManagedState>;
}

/// The flight data recorder boundary.
///
/// Recording is best-effort and must never influence control flow: the
/// method is infallible at the call site, and implementations isolate
/// their own faults.
pub trait TraceSink: Send + Sync {
    /// Record one trace event.
    fn record(&self, event: TraceEvent);
}

/// A sink that drops every event. Useful for recorder-less runs and tests.
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _event: TraceEvent) {}
}
