//! Routing decisions and the evaluation context they are made from.
//!
//! The arbiter consumes an `EvaluationContext` plus a compiled policy and
//! produces a `RoutingDecision`. Both live here so every crate agrees on
//! the shape without depending on the policy machinery.

use serde::{Deserialize, Serialize};

use crate::instruction::InstructionCore;
use crate::state::ManagedState;

/// The decision emitted by one arbiter cycle.
///
/// `Halt` is a normal, first-class terminal outcome — the arbiter never
/// fails; it decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingDecision {
    /// Advance to the proposed next node.
    Proceed,

    /// Terminate the run.
    Halt {
        /// Machine-readable reason, e.g. "resource_limit_exceeded".
        reason: String,
        /// The rule that forced the halt, when one applies.
        violated_rule_id: Option<String>,
    },

    /// Advance to `target` instead of the proposed next node.
    Reroute {
        target: String,
        reason: String,
        violated_rule_id: Option<String>,
    },
}

impl RoutingDecision {
    /// Short action name used in decision records and trace attributes.
    pub fn action(&self) -> &'static str {
        match self {
            RoutingDecision::Proceed => "proceed",
            RoutingDecision::Halt { .. } => "halt",
            RoutingDecision::Reroute { .. } => "reroute",
        }
    }

    /// The rule behind the decision, if any.
    pub fn violated_rule_id(&self) -> Option<&str> {
        match self {
            RoutingDecision::Proceed => None,
            RoutingDecision::Halt {
                violated_rule_id, ..
            }
            | RoutingDecision::Reroute {
                violated_rule_id, ..
            } => violated_rule_id.as_deref(),
        }
    }
}

/// Everything one arbiter cycle may look at.
///
/// Built fresh by the router after each node execution. Borrows the current
/// snapshot so conditional rules can resolve field paths against it without
/// a copy.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// The node that just executed.
    pub previous_node: Option<&'a str>,
    /// The node the graph proposes to run next. `None` at the end of the
    /// declared path.
    pub proposed_next: Option<&'a str>,
    /// Core of the node that just executed.
    pub from_core: Option<InstructionCore>,
    /// Core of the proposed next node.
    pub to_core: Option<InstructionCore>,
    /// The current snapshot; verification outcome and resource counters are
    /// read through it.
    pub state: &'a ManagedState,
}
