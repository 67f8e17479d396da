//! # arbiter-policy
//!
//! Declarative governance rules, the policy compiler, and the arbiter
//! decision engine.
//!
//! ## Overview
//!
//! Policies are declared in TOML ([`PolicyConfig`]), compiled exactly once
//! per graph build into an evaluation-ready [`CompiledPolicy`] (a fixed
//! `core × core` transition matrix plus precompiled predicate accessors),
//! and consumed by the pure [`engine::decide`] function on every governance
//! cycle.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use arbiter_policy::{CompiledPolicy, PolicyConfig};
//!
//! let config = PolicyConfig::from_file(Path::new("policies/pipeline.toml"))?;
//! let compiled = CompiledPolicy::compile(&config)?;
//! // Pass `compiled` (behind Arc) to the router at graph build.
//! ```
//!
//! ## Rule ordering
//!
//! Conditional rules are evaluated in declaration order and the first match
//! wins. Resource limits are always checked first, transition rules last.

pub mod compile;
pub mod engine;
pub mod rule;

pub use compile::CompiledPolicy;
pub use rule::{PolicyConfig, PolicyRule, ResourceLimits};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use arbiter_contracts::decision::{EvaluationContext, RoutingDecision};
    use arbiter_contracts::instruction::InstructionCore;
    use arbiter_contracts::state::{
        ManagedState, VerificationOutcome, VerificationStatus,
    };

    use crate::compile::CompiledPolicy;
    use crate::engine::{self, REASON_FORBIDDEN_TRANSITION, REASON_RESOURCE_LIMIT};
    use crate::rule::{ConditionOp, PolicyConfig, PolicyRule, RuleAction};

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// A state snapshot with the given counters and verification outcome.
    fn make_state(
        step: u64,
        tokens: u64,
        confidence: Option<f64>,
    ) -> ManagedState {
        let mut state = ManagedState::new(serde_json::Map::new());
        for _ in 0..step {
            state.note_node_executed("node");
        }
        state.charge_resources(tokens, 0);
        if let Some(confidence) = confidence {
            state.set_verification(VerificationOutcome {
                status: if confidence >= 0.5 {
                    VerificationStatus::Pass
                } else {
                    VerificationStatus::Fail
                },
                confidence: Some(confidence),
                details: None,
            });
        }
        state
    }

    fn ctx<'a>(
        state: &'a ManagedState,
        from: Option<InstructionCore>,
        to: Option<InstructionCore>,
    ) -> EvaluationContext<'a> {
        EvaluationContext {
            previous_node: Some("prev"),
            proposed_next: Some("next"),
            from_core: from,
            to_core: to,
            state,
        }
    }

    fn compiled(toml: &str) -> CompiledPolicy {
        let config = PolicyConfig::from_toml_str(toml).unwrap();
        CompiledPolicy::compile(&config).unwrap()
    }

    // ── TOML deserialization ─────────────────────────────────────────────────

    #[test]
    fn policy_toml_round_trip() {
        let toml = r#"
            policy_id = "pipeline-policy"
            description = "Governs the demo pipeline"

            [limits]
            max_steps = 20
            max_total_tokens = 50000

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "Generation may not feed a tool call directly"
            from_core = "cognitive"
            to_core = "execution"

            [[rules]]
            kind = "conditional"
            id = "low-confidence-review"
            description = "Route weak verifications to a human"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9
        "#;

        let config = PolicyConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.policy_id, "pipeline-policy");
        assert_eq!(config.limits.max_steps, Some(20));
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].id(), "no-cognitive-to-execution");

        match &config.rules[1] {
            PolicyRule::Conditional {
                conditions, action, ..
            } => {
                assert_eq!(*action, RuleAction::Reroute);
                assert_eq!(conditions.len(), 1);
                assert_eq!(conditions[0].op, ConditionOp::Lt);
                assert_eq!(conditions[0].value, json!(0.9));
            }
            other => panic!("expected conditional rule, got {:?}", other),
        }
    }

    #[test]
    fn malformed_toml_is_a_compile_error() {
        let result = PolicyConfig::from_toml_str("this is not [ toml");
        assert!(matches!(
            result,
            Err(arbiter_contracts::error::ArbiterError::Compile { .. })
        ));
    }

    // ── Compile-time rejection ───────────────────────────────────────────────

    #[test]
    fn unresolvable_governance_path_is_rejected() {
        let config = PolicyConfig::from_toml_str(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "r1"
            description = "bad path"
            action = "halt"

            [[rules.conditions]]
            field = "governance.no_such_field"
            op = "exists"
        "#,
        )
        .unwrap();

        let err = CompiledPolicy::compile(&config).unwrap_err();
        assert!(
            err.to_string().contains("governance.no_such_field"),
            "error should name the bad path: {err}"
        );
    }

    #[test]
    fn unknown_path_root_is_rejected() {
        let config = PolicyConfig::from_toml_str(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "r1"
            description = "bad root"
            action = "halt"

            [[rules.conditions]]
            field = "metadata.step"
            op = "exists"
        "#,
        )
        .unwrap();

        assert!(CompiledPolicy::compile(&config).is_err());
    }

    #[test]
    fn reroute_without_target_is_rejected() {
        let config = PolicyConfig::from_toml_str(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "r1"
            description = "no target"
            action = "reroute"

            [[rules.conditions]]
            field = "governance.step"
            op = "gt"
            value = 3
        "#,
        )
        .unwrap();

        let err = CompiledPolicy::compile(&config).unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let config = PolicyConfig::from_toml_str(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "transition"
            id = "dup"
            description = "first"
            from_core = "cognitive"
            to_core = "execution"

            [[rules]]
            kind = "transition"
            id = "dup"
            description = "second"
            from_core = "memory"
            to_core = "execution"
        "#,
        )
        .unwrap();

        let err = CompiledPolicy::compile(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn conditional_without_conditions_is_rejected() {
        let config = PolicyConfig::from_toml_str(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "r1"
            description = "vacuous"
            action = "halt"
            conditions = []
        "#,
        )
        .unwrap();

        assert!(CompiledPolicy::compile(&config).is_err());
    }

    // ── Determinism ──────────────────────────────────────────────────────────

    /// Invoking the arbiter twice with identical inputs must yield
    /// identical decisions.
    #[test]
    fn decide_is_deterministic() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [limits]
            max_steps = 10

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"

            [[rules]]
            kind = "conditional"
            id = "low-confidence"
            description = "reroute weak verifications"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9
        "#,
        );

        let state = make_state(3, 100, Some(0.8));
        let context = ctx(
            &state,
            Some(InstructionCore::Normative),
            Some(InstructionCore::Execution),
        );

        let first = engine::decide(&context, &policy);
        let second = engine::decide(&context, &policy);
        assert_eq!(first, second);
    }

    // ── Precedence ───────────────────────────────────────────────────────────

    /// A context violating a resource limit AND a transition rule must halt
    /// with the resource-limit reason — resource checks come first.
    #[test]
    fn resource_limit_outranks_transition_rule() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [limits]
            max_steps = 2

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"
        "#,
        );

        // step = 2 hits the budget AND the proposed transition is forbidden.
        let state = make_state(2, 0, None);
        let context = ctx(
            &state,
            Some(InstructionCore::Cognitive),
            Some(InstructionCore::Execution),
        );

        match engine::decide(&context, &policy) {
            RoutingDecision::Halt {
                reason,
                violated_rule_id,
            } => {
                assert_eq!(reason, REASON_RESOURCE_LIMIT);
                assert_eq!(violated_rule_id, None);
            }
            other => panic!("expected Halt, got {:?}", other),
        }
    }

    /// A matching conditional rule outranks a forbidden transition.
    #[test]
    fn conditional_rule_outranks_transition_rule() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "low-confidence"
            description = "reroute weak verifications"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"
        "#,
        );

        let state = make_state(1, 0, Some(0.5));
        let context = ctx(
            &state,
            Some(InstructionCore::Cognitive),
            Some(InstructionCore::Execution),
        );

        match engine::decide(&context, &policy) {
            RoutingDecision::Reroute { target, .. } => assert_eq!(target, "human_review"),
            other => panic!("expected Reroute, got {:?}", other),
        }
    }

    /// When several conditional rules match, the first declared wins.
    #[test]
    fn first_declared_conditional_wins() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "first"
            description = "declared first"
            action = "reroute"
            target = "a"

            [[rules.conditions]]
            field = "governance.step"
            op = "ge"
            value = 0

            [[rules]]
            kind = "conditional"
            id = "second"
            description = "declared second"
            action = "reroute"
            target = "b"

            [[rules.conditions]]
            field = "governance.step"
            op = "ge"
            value = 0
        "#,
        );

        let state = make_state(1, 0, None);
        let context = ctx(&state, None, None);

        match engine::decide(&context, &policy) {
            RoutingDecision::Reroute {
                target,
                violated_rule_id,
                ..
            } => {
                assert_eq!(target, "a");
                assert_eq!(violated_rule_id.as_deref(), Some("first"));
            }
            other => panic!("expected Reroute, got {:?}", other),
        }
    }

    // ── Forbidden transitions ────────────────────────────────────────────────

    /// Cognitive→Execution forbidden; proposing generate → call_api halts
    /// and names the forbidding rule.
    #[test]
    fn forbidden_transition_halts_with_rule_id() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"
        "#,
        );

        let state = make_state(1, 0, None);
        let context = ctx(
            &state,
            Some(InstructionCore::Cognitive),
            Some(InstructionCore::Execution),
        );

        match engine::decide(&context, &policy) {
            RoutingDecision::Halt {
                reason,
                violated_rule_id,
            } => {
                assert_eq!(reason, REASON_FORBIDDEN_TRANSITION);
                assert_eq!(
                    violated_rule_id.as_deref(),
                    Some("no-cognitive-to-execution")
                );
            }
            other => panic!("expected Halt, got {:?}", other),
        }
    }

    /// The same pair in the other direction stays allowed.
    #[test]
    fn transition_matrix_is_directional() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"
        "#,
        );

        let state = make_state(1, 0, None);
        let context = ctx(
            &state,
            Some(InstructionCore::Execution),
            Some(InstructionCore::Cognitive),
        );

        assert_eq!(engine::decide(&context, &policy), RoutingDecision::Proceed);
    }

    // ── Conditional thresholds ───────────────────────────────────────────────

    /// confidence 0.8 reroutes to human_review; confidence 0.95 proceeds.
    #[test]
    fn confidence_threshold_reroutes_below_and_proceeds_above() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "low-confidence-review"
            description = "reroute weak verifications"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9
        "#,
        );

        let weak = make_state(1, 0, Some(0.8));
        match engine::decide(&ctx(&weak, None, None), &policy) {
            RoutingDecision::Reroute { target, .. } => assert_eq!(target, "human_review"),
            other => panic!("expected Reroute, got {:?}", other),
        }

        let strong = make_state(1, 0, Some(0.95));
        assert_eq!(
            engine::decide(&ctx(&strong, None, None), &policy),
            RoutingDecision::Proceed
        );
    }

    /// With no verification recorded, the confidence path does not resolve
    /// and the rule must not fire.
    #[test]
    fn absent_field_never_satisfies_a_condition() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "low-confidence-review"
            description = "reroute weak verifications"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9
        "#,
        );

        let state = make_state(1, 0, None);
        assert_eq!(
            engine::decide(&ctx(&state, None, None), &policy),
            RoutingDecision::Proceed
        );
    }

    /// Conditions over domain data resolve through pre-split segments.
    #[test]
    fn domain_data_conditions_resolve_nested_paths() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [[rules]]
            kind = "conditional"
            id = "risky-order"
            description = "halt large orders"
            action = "halt"

            [[rules.conditions]]
            field = "data.order.amount"
            op = "gt"
            value = 1000
        "#,
        );

        let mut state = make_state(1, 0, None);
        state.merge_output(json!({ "order": { "amount": 2500 } }));

        match engine::decide(&ctx(&state, None, None), &policy) {
            RoutingDecision::Halt {
                violated_rule_id, ..
            } => assert_eq!(violated_rule_id.as_deref(), Some("risky-order")),
            other => panic!("expected Halt, got {:?}", other),
        }

        let mut small = make_state(1, 0, None);
        small.merge_output(json!({ "order": { "amount": 10 } }));
        assert_eq!(
            engine::decide(&ctx(&small, None, None), &policy),
            RoutingDecision::Proceed
        );
    }

    // ── Resource limits ──────────────────────────────────────────────────────

    /// max_steps = 5: after the fifth completed step the next cycle halts,
    /// regardless of other rules.
    #[test]
    fn step_budget_halts_after_fifth_step() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [limits]
            max_steps = 5
        "#,
        );

        let under = make_state(4, 0, None);
        assert_eq!(
            engine::decide(&ctx(&under, None, None), &policy),
            RoutingDecision::Proceed
        );

        let at_budget = make_state(5, 0, None);
        match engine::decide(&ctx(&at_budget, None, None), &policy) {
            RoutingDecision::Halt { reason, .. } => {
                assert_eq!(reason, REASON_RESOURCE_LIMIT)
            }
            other => panic!("expected Halt, got {:?}", other),
        }
    }

    #[test]
    fn token_budget_halts_when_exceeded() {
        let policy = compiled(
            r#"
            policy_id = "p"
            description = "d"

            [limits]
            max_total_tokens = 1000
        "#,
        );

        let at_limit = make_state(1, 1000, None);
        assert_eq!(
            engine::decide(&ctx(&at_limit, None, None), &policy),
            RoutingDecision::Proceed,
            "the ceiling itself is not exceeded"
        );

        let over = make_state(1, 1001, None);
        match engine::decide(&ctx(&over, None, None), &policy) {
            RoutingDecision::Halt { reason, .. } => {
                assert_eq!(reason, REASON_RESOURCE_LIMIT)
            }
            other => panic!("expected Halt, got {:?}", other),
        }
    }

    // ── Compilation equivalence ──────────────────────────────────────────────

    /// A naive interpreter over the declarative config, used to pin the
    /// compiled engine's behavior. Paths are re-split per call on purpose.
    fn naive_decide(
        ctx: &EvaluationContext<'_>,
        config: &PolicyConfig,
    ) -> RoutingDecision {
        let g = &ctx.state.governance;

        let over_limit = config
            .limits
            .max_steps
            .is_some_and(|m| g.step >= m)
            || config
                .limits
                .max_total_tokens
                .is_some_and(|m| g.resources.total_tokens > m)
            || config
                .limits
                .max_elapsed_ms
                .is_some_and(|m| g.resources.elapsed_ms > m);
        if over_limit {
            return RoutingDecision::Halt {
                reason: REASON_RESOURCE_LIMIT.to_string(),
                violated_rule_id: None,
            };
        }

        for rule in &config.rules {
            if let PolicyRule::Conditional {
                id,
                description,
                conditions,
                action,
                target,
            } = rule
            {
                let all_hold = conditions.iter().all(|c| {
                    let resolved: Option<serde_json::Value> = match c
                        .field
                        .split('.')
                        .collect::<Vec<_>>()
                        .as_slice()
                    {
                        ["governance", "step"] => Some(json!(g.step)),
                        ["governance", "resources", "total_tokens"] => {
                            Some(json!(g.resources.total_tokens))
                        }
                        ["governance", "last_verification", "confidence"] => g
                            .last_verification
                            .as_ref()
                            .and_then(|v| v.confidence)
                            .map(|c| json!(c)),
                        ["data", rest @ ..] => {
                            let mut current =
                                ctx.state.domain_data.get(rest[0]).cloned();
                            for segment in &rest[1..] {
                                current =
                                    current.and_then(|v| v.get(*segment).cloned());
                            }
                            current
                        }
                        _ => None,
                    };

                    let Some(actual) = resolved else {
                        return c.op == ConditionOp::Exists;
                    };
                    let (a, b) = (actual.as_f64(), c.value.as_f64());
                    match c.op {
                        ConditionOp::Exists => true,
                        ConditionOp::Eq => a == b && a.is_some() || actual == c.value,
                        ConditionOp::Ne => !(a == b && a.is_some() || actual == c.value),
                        ConditionOp::Lt => a.zip(b).is_some_and(|(x, y)| x < y),
                        ConditionOp::Le => a.zip(b).is_some_and(|(x, y)| x <= y),
                        ConditionOp::Gt => a.zip(b).is_some_and(|(x, y)| x > y),
                        ConditionOp::Ge => a.zip(b).is_some_and(|(x, y)| x >= y),
                    }
                });

                if all_hold {
                    return match action {
                        RuleAction::Halt => RoutingDecision::Halt {
                            reason: description.clone(),
                            violated_rule_id: Some(id.clone()),
                        },
                        RuleAction::Reroute => RoutingDecision::Reroute {
                            target: target.clone().unwrap(),
                            reason: description.clone(),
                            violated_rule_id: Some(id.clone()),
                        },
                    };
                }
            }
        }

        if let (Some(from), Some(to)) = (ctx.from_core, ctx.to_core) {
            for rule in &config.rules {
                if let PolicyRule::Transition {
                    id,
                    from_core,
                    to_core,
                    ..
                } = rule
                {
                    if *from_core == from && *to_core == to {
                        return RoutingDecision::Halt {
                            reason: REASON_FORBIDDEN_TRANSITION.to_string(),
                            violated_rule_id: Some(id.clone()),
                        };
                    }
                }
            }
        }

        RoutingDecision::Proceed
    }

    /// Compiled evaluation must agree with the naive interpretation of the
    /// same rules over a fixed sequence of contexts.
    #[test]
    fn compiled_evaluation_matches_naive_interpretation() {
        let toml = r#"
            policy_id = "equivalence"
            description = "d"

            [limits]
            max_steps = 6
            max_total_tokens = 500

            [[rules]]
            kind = "conditional"
            id = "low-confidence"
            description = "reroute weak verifications"
            action = "reroute"
            target = "human_review"

            [[rules.conditions]]
            field = "governance.last_verification.confidence"
            op = "lt"
            value = 0.9

            [[rules]]
            kind = "conditional"
            id = "deep-run"
            description = "halt long runs"
            action = "halt"

            [[rules.conditions]]
            field = "governance.step"
            op = "ge"
            value = 4

            [[rules]]
            kind = "transition"
            id = "no-cognitive-to-execution"
            description = "no direct tool call after generation"
            from_core = "cognitive"
            to_core = "execution"
        "#;

        let config = PolicyConfig::from_toml_str(toml).unwrap();
        let policy = CompiledPolicy::compile(&config).unwrap();

        let fixtures = [
            (0u64, 0u64, None, Some(InstructionCore::Cognitive), Some(InstructionCore::Execution)),
            (1, 0, Some(0.8), None, None),
            (1, 0, Some(0.95), Some(InstructionCore::Cognitive), Some(InstructionCore::Execution)),
            (4, 0, Some(0.95), None, None),
            (6, 0, None, None, None),
            (1, 501, Some(0.95), None, None),
            (2, 100, Some(0.95), Some(InstructionCore::Normative), Some(InstructionCore::Execution)),
        ];

        for (step, tokens, confidence, from, to) in fixtures {
            let state = make_state(step, tokens, confidence);
            let context = ctx(&state, from, to);
            assert_eq!(
                engine::decide(&context, &policy),
                naive_decide(&context, &config),
                "compiled and naive evaluation diverged at step={step} tokens={tokens} confidence={confidence:?}"
            );
        }
    }
}
