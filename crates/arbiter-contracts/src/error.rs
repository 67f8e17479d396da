//! Error types for the arbiter governance kernel.
//!
//! All fallible operations in the kernel return `ArbiterResult<T>`.
//! Every variant carries enough context to produce an actionable trace
//! entry; a governed run itself never unwinds — terminal failures are
//! surfaced as `RunStatus` data, with these variants as the payload.

use thiserror::Error;

/// The unified error type for the arbiter kernel.
#[derive(Debug, Clone, Error)]
pub enum ArbiterError {
    /// A schema check rejected data at the firewall boundary. Never retried —
    /// a malformed request or response is final for that step.
    #[error("validation failed at node '{node}': {reason}")]
    Validation { node: String, reason: String },

    /// Structured-output enforcement exhausted its retry budget on a
    /// Cognitive or Memory binding.
    #[error("schema enforcement failed at node '{node}' after {attempts} attempt(s): {reason}")]
    SchemaEnforcement {
        node: String,
        attempts: u32,
        reason: String,
    },

    /// The implementation returned an error or exceeded its timeout.
    ///
    /// Captured as data by the harness, never propagated as a panic.
    #[error("execution failed at node '{node}': {reason}")]
    Execution { node: String, reason: String },

    /// The arbiter issued a HALT. This is a first-class terminal outcome,
    /// not a fault; it carries the violated rule when one applies.
    #[error("governance halt: {reason}")]
    GovernanceHalt {
        reason: String,
        violated_rule_id: Option<String>,
    },

    /// Malformed policy or binding detected while building a graph.
    ///
    /// Compilation is the only point where bad configuration is rejected;
    /// this variant must never be produced mid-execution.
    #[error("compile error: {reason}")]
    Compile { reason: String },

    /// The checkpoint store could not save or load a state snapshot.
    #[error("persistence error: {reason}")]
    Persistence { reason: String },
}

/// Convenience alias used throughout the arbiter crates.
pub type ArbiterResult<T> = Result<T, ArbiterError>;
