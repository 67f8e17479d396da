//! Policy compilation: declarative rules to O(1)-evaluable structures.
//!
//! Compilation happens exactly once per graph build. Transition rules land
//! in a fixed-size matrix indexed by core discriminant; conditional rules
//! have their field paths resolved to accessors up front so nothing is
//! re-parsed per arbiter cycle. Compilation is pure and deterministic —
//! identical configs compile to behaviorally identical policies — and a
//! field path that does not resolve against the state shape is rejected
//! here, never at runtime.

use serde_json::Value;

use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::instruction::InstructionCore;
use arbiter_contracts::state::{ManagedState, VerificationStatus};

use crate::rule::{ConditionOp, PolicyConfig, PolicyRule, ResourceLimits, RuleAction};

/// Fields of the governance metadata addressable from rule conditions.
///
/// This is the closed half of the field-path contract; anything not listed
/// here fails compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceField {
    Step,
    TotalTokens,
    ElapsedMs,
    VerificationStatus,
    VerificationConfidence,
    FallbackTriggered,
}

impl GovernanceField {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "step" => Some(Self::Step),
            "resources.total_tokens" => Some(Self::TotalTokens),
            "resources.elapsed_ms" => Some(Self::ElapsedMs),
            "last_verification.status" => Some(Self::VerificationStatus),
            "last_verification.confidence" => Some(Self::VerificationConfidence),
            "fallback_triggered" => Some(Self::FallbackTriggered),
            _ => None,
        }
    }

    fn resolve(self, state: &ManagedState) -> Option<Value> {
        let governance = &state.governance;
        match self {
            Self::Step => Some(Value::from(governance.step)),
            Self::TotalTokens => Some(Value::from(governance.resources.total_tokens)),
            Self::ElapsedMs => Some(Value::from(governance.resources.elapsed_ms)),
            Self::VerificationStatus => {
                governance.last_verification.as_ref().map(|v| {
                    Value::from(match v.status {
                        VerificationStatus::Pass => "pass",
                        VerificationStatus::Fail => "fail",
                    })
                })
            }
            Self::VerificationConfidence => governance
                .last_verification
                .as_ref()
                .and_then(|v| v.confidence)
                .map(Value::from),
            Self::FallbackTriggered => Some(Value::from(governance.fallback_triggered)),
        }
    }
}

/// A field path resolved once at compile time.
///
/// `Governance` paths dispatch through the closed enum above; `Domain`
/// paths keep their pre-split segments and walk the open application map.
#[derive(Debug, Clone)]
pub enum FieldAccessor {
    Governance(GovernanceField),
    Domain(Vec<String>),
}

impl FieldAccessor {
    /// Resolve a declared path, or reject it as a compile error.
    pub fn compile(path: &str) -> ArbiterResult<Self> {
        if let Some(rest) = path.strip_prefix("governance.") {
            return GovernanceField::from_path(rest)
                .map(Self::Governance)
                .ok_or_else(|| ArbiterError::Compile {
                    reason: format!("unresolvable field path '{}'", path),
                });
        }

        if let Some(rest) = path.strip_prefix("data.") {
            if rest.is_empty() || rest.split('.').any(str::is_empty) {
                return Err(ArbiterError::Compile {
                    reason: format!("malformed field path '{}'", path),
                });
            }
            return Ok(Self::Domain(
                rest.split('.').map(str::to_string).collect(),
            ));
        }

        Err(ArbiterError::Compile {
            reason: format!(
                "field path '{}' must be rooted at 'governance.' or 'data.'",
                path
            ),
        })
    }

    fn resolve(&self, state: &ManagedState) -> Option<Value> {
        match self {
            Self::Governance(field) => field.resolve(state),
            Self::Domain(segments) => {
                let (first, rest) = segments.split_first()?;
                let mut current = state.domain_data.get(first)?;
                for segment in rest {
                    current = current.get(segment)?;
                }
                if current.is_null() {
                    None
                } else {
                    Some(current.clone())
                }
            }
        }
    }
}

/// One precompiled condition.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    accessor: FieldAccessor,
    op: ConditionOp,
    value: Value,
}

impl CompiledCondition {
    /// Evaluate against a snapshot. An absent field never satisfies a
    /// condition, except under `Exists`.
    pub fn holds(&self, state: &ManagedState) -> bool {
        let resolved = self.accessor.resolve(state);

        if self.op == ConditionOp::Exists {
            return resolved.is_some();
        }

        let Some(actual) = resolved else {
            return false;
        };

        match self.op {
            ConditionOp::Eq => json_eq(&actual, &self.value),
            ConditionOp::Ne => !json_eq(&actual, &self.value),
            ConditionOp::Lt => numeric_cmp(&actual, &self.value, |o| o.is_lt()),
            ConditionOp::Le => numeric_cmp(&actual, &self.value, |o| o.is_le()),
            ConditionOp::Gt => numeric_cmp(&actual, &self.value, |o| o.is_gt()),
            ConditionOp::Ge => numeric_cmp(&actual, &self.value, |o| o.is_ge()),
            ConditionOp::Exists => unreachable!("handled above"),
        }
    }
}

/// Equality that treats 5 and 5.0 as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering comparison; false unless both sides are numeric.
fn numeric_cmp(a: &Value, b: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).map(&check).unwrap_or(false),
        _ => false,
    }
}

/// The resolved action of a compiled conditional rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledAction {
    Halt,
    Reroute { target: String },
}

/// A conditional rule with its conditions precompiled.
#[derive(Debug, Clone)]
pub struct CompiledConditional {
    pub rule_id: String,
    pub description: String,
    pub action: CompiledAction,
    conditions: Vec<CompiledCondition>,
}

impl CompiledConditional {
    /// True when every condition holds against the snapshot.
    pub fn matches(&self, state: &ManagedState) -> bool {
        self.conditions.iter().all(|c| c.holds(state))
    }
}

/// The `core × core` forbidden-transition lookup.
///
/// Each cell holds the id of the forbidding rule; lookup is a pair of array
/// indexes, never a scan.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    cells: [[Option<String>; InstructionCore::COUNT]; InstructionCore::COUNT],
}

impl TransitionMatrix {
    fn empty() -> Self {
        Self {
            cells: std::array::from_fn(|_| std::array::from_fn(|_| None)),
        }
    }

    /// The id of the rule forbidding `from → to`, if any.
    pub fn forbidden(&self, from: InstructionCore, to: InstructionCore) -> Option<&str> {
        self.cells[from.index()][to.index()].as_deref()
    }
}

/// The evaluation-ready form of a `PolicyConfig`.
///
/// Immutable after compilation; share one instance (behind `Arc`) across
/// arbitrarily many concurrent executions.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy_id: String,
    pub limits: ResourceLimits,
    pub transitions: TransitionMatrix,
    pub conditionals: Vec<CompiledConditional>,
}

impl CompiledPolicy {
    /// Compile a declarative policy.
    ///
    /// Rejects duplicate rule ids, reroute rules without a target,
    /// condition-less conditional rules, and unresolvable field paths.
    /// All failures are `ArbiterError::Compile`; nothing is deferred to
    /// evaluation time.
    pub fn compile(config: &PolicyConfig) -> ArbiterResult<Self> {
        let mut seen_ids = std::collections::HashSet::new();
        let mut transitions = TransitionMatrix::empty();
        let mut conditionals = Vec::new();

        for rule in &config.rules {
            if !seen_ids.insert(rule.id().to_string()) {
                return Err(ArbiterError::Compile {
                    reason: format!("duplicate rule id '{}'", rule.id()),
                });
            }

            match rule {
                PolicyRule::Transition {
                    id,
                    from_core,
                    to_core,
                    ..
                } => {
                    let cell = &mut transitions.cells[from_core.index()][to_core.index()];
                    // First declaration wins, matching conditional ordering.
                    if cell.is_none() {
                        *cell = Some(id.clone());
                    }
                }

                PolicyRule::Conditional {
                    id,
                    description,
                    conditions,
                    action,
                    target,
                } => {
                    if conditions.is_empty() {
                        return Err(ArbiterError::Compile {
                            reason: format!(
                                "conditional rule '{}' declares no conditions",
                                id
                            ),
                        });
                    }

                    let compiled_action = match action {
                        RuleAction::Halt => CompiledAction::Halt,
                        RuleAction::Reroute => {
                            let target = target.clone().ok_or_else(|| ArbiterError::Compile {
                                reason: format!(
                                    "reroute rule '{}' declares no target node",
                                    id
                                ),
                            })?;
                            CompiledAction::Reroute { target }
                        }
                    };

                    let compiled_conditions = conditions
                        .iter()
                        .map(|c| {
                            Ok(CompiledCondition {
                                accessor: FieldAccessor::compile(&c.field)?,
                                op: c.op,
                                value: c.value.clone(),
                            })
                        })
                        .collect::<ArbiterResult<Vec<_>>>()?;

                    conditionals.push(CompiledConditional {
                        rule_id: id.clone(),
                        description: description.clone(),
                        action: compiled_action,
                        conditions: compiled_conditions,
                    });
                }
            }
        }

        Ok(Self {
            policy_id: config.policy_id.clone(),
            limits: config.limits.clone(),
            transitions,
            conditionals,
        })
    }

    /// Node ids named as reroute targets, for graph-build cross-checking.
    pub fn reroute_targets(&self) -> impl Iterator<Item = &str> {
        self.conditionals.iter().filter_map(|c| match &c.action {
            CompiledAction::Reroute { target } => Some(target.as_str()),
            CompiledAction::Halt => None,
        })
    }
}
