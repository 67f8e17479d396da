//! The arbiter: the sole place a routing decision is made.
//!
//! `decide` is a pure function of `(EvaluationContext, CompiledPolicy)`.
//! Evaluation precedence is fixed and observable:
//!
//! 1. Resource limits — any exceeded ceiling halts the run.
//! 2. Conditional rules, in declaration order — first match wins.
//! 3. Transition rules — a forbidden `(from, to)` core pair halts.
//! 4. Default: proceed to the proposed next node.
//!
//! Given identical inputs the arbiter always returns an identical decision;
//! that determinism is what makes replay and audit meaningful. The arbiter
//! never mutates state — recording the decision is the router's job.

use tracing::{debug, warn};

use arbiter_contracts::decision::{EvaluationContext, RoutingDecision};

use crate::compile::{CompiledAction, CompiledPolicy};

/// Reason string for a resource-limit halt.
pub const REASON_RESOURCE_LIMIT: &str = "resource_limit_exceeded";

/// Reason string for a forbidden-transition halt.
pub const REASON_FORBIDDEN_TRANSITION: &str = "forbidden_transition";

/// Evaluate one governance cycle.
pub fn decide(ctx: &EvaluationContext<'_>, policy: &CompiledPolicy) -> RoutingDecision {
    let governance = &ctx.state.governance;

    debug!(
        execution_id = %governance.execution_id,
        step = governance.step,
        previous = ctx.previous_node.unwrap_or("-"),
        proposed = ctx.proposed_next.unwrap_or("-"),
        "arbiter cycle"
    );

    // ── 1. Resource limits ───────────────────────────────────────────────────
    //
    // Checked before any rule so a runaway loop cannot be kept alive by a
    // matching reroute rule.
    let limits = &policy.limits;

    if let Some(max_steps) = limits.max_steps {
        if governance.step >= max_steps {
            warn!(
                execution_id = %governance.execution_id,
                step = governance.step,
                max_steps,
                "step budget exhausted"
            );
            return RoutingDecision::Halt {
                reason: REASON_RESOURCE_LIMIT.to_string(),
                violated_rule_id: None,
            };
        }
    }

    if let Some(max_tokens) = limits.max_total_tokens {
        if governance.resources.total_tokens > max_tokens {
            warn!(
                execution_id = %governance.execution_id,
                total_tokens = governance.resources.total_tokens,
                max_tokens,
                "token budget exhausted"
            );
            return RoutingDecision::Halt {
                reason: REASON_RESOURCE_LIMIT.to_string(),
                violated_rule_id: None,
            };
        }
    }

    if let Some(max_elapsed) = limits.max_elapsed_ms {
        if governance.resources.elapsed_ms > max_elapsed {
            warn!(
                execution_id = %governance.execution_id,
                elapsed_ms = governance.resources.elapsed_ms,
                max_elapsed,
                "wall-time budget exhausted"
            );
            return RoutingDecision::Halt {
                reason: REASON_RESOURCE_LIMIT.to_string(),
                violated_rule_id: None,
            };
        }
    }

    // ── 2. Conditional rules, declaration order ──────────────────────────────
    for conditional in &policy.conditionals {
        if !conditional.matches(ctx.state) {
            continue;
        }

        debug!(
            rule_id = %conditional.rule_id,
            "conditional rule matched"
        );

        return match &conditional.action {
            CompiledAction::Halt => RoutingDecision::Halt {
                reason: conditional.description.clone(),
                violated_rule_id: Some(conditional.rule_id.clone()),
            },
            CompiledAction::Reroute { target } => RoutingDecision::Reroute {
                target: target.clone(),
                reason: conditional.description.clone(),
                violated_rule_id: Some(conditional.rule_id.clone()),
            },
        };
    }

    // ── 3. Transition rules ──────────────────────────────────────────────────
    //
    // Only meaningful when both endpoints of the proposed transition are
    // known; the final cycle of a run has no proposed next node.
    if let (Some(from), Some(to)) = (ctx.from_core, ctx.to_core) {
        if let Some(rule_id) = policy.transitions.forbidden(from, to) {
            warn!(
                rule_id = %rule_id,
                from = ?from,
                to = ?to,
                "forbidden transition"
            );
            return RoutingDecision::Halt {
                reason: REASON_FORBIDDEN_TRANSITION.to_string(),
                violated_rule_id: Some(rule_id.to_string()),
            };
        }
    }

    // ── 4. Default ───────────────────────────────────────────────────────────
    RoutingDecision::Proceed
}
