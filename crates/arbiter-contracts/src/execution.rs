//! Step- and run-level outcomes.
//!
//! `StepOutcome` is what the harness hands back to the router after one
//! node execution. `RunStatus`/`RunReport` is what the router returns to
//! the caller — every failure path is data; a governed run has no
//! unhandled-fault exit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ArbiterError;
use crate::state::{ExecutionId, ManagedState};

/// The outcome of one node execution.
#[derive(Debug)]
pub enum StepOutcome {
    /// The implementation ran and its output passed the firewall.
    Success {
        /// The validated output, as merged into domain data.
        output: Value,
        /// Tokens the implementation reported spending, if any.
        tokens_used: u64,
        /// Wall time spent inside the invocation, in ms.
        elapsed_ms: u64,
        /// Invocation attempts consumed (1 unless enforcement retried).
        attempts: u32,
    },

    /// The step failed. Carries a `Validation`, `SchemaEnforcement`, or
    /// `Execution` error; the router decides whether a fallback absorbs it.
    Failure(ArbiterError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }
}

/// Terminal status of a governed run.
///
/// Callers pattern-match on this to decide what to do next:
/// - `Completed` → collect the final state
/// - `Halted` → surface the reason; the run is over
/// - `Interrupted` → persist the resume key, resume later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The graph ran to the end of its declared path.
    Completed,

    /// The arbiter (or an unabsorbed harness failure) terminated the run.
    Halted {
        reason: String,
        violated_rule_id: Option<String>,
    },

    /// The run is paused at an interrupt boundary. Resume with the
    /// `(execution_id, step)` key.
    Interrupted { execution_id: ExecutionId, step: u64 },
}

/// What a finished (or paused) run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The final state snapshot.
    pub state: ManagedState,
    /// How the run ended.
    pub status: RunStatus,
}
