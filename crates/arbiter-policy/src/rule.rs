//! Declarative policy schema.
//!
//! A `PolicyConfig` is deserialized from TOML and holds global resource
//! limits plus an ordered list of rules. Conditional rules are evaluated in
//! declaration order — the first matching rule wins, and that ordering is
//! the authoring contract: when two conditional rules could both match in
//! one cycle, the one declared first decides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::instruction::InstructionCore;

/// Global ceilings checked by the arbiter before any rule.
///
/// All limits are optional; an absent limit is never exceeded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Ceiling on cumulative tokens; exceeded when the counter goes above it.
    pub max_total_tokens: Option<u64>,
    /// Ceiling on cumulative in-node wall time, in ms.
    pub max_elapsed_ms: Option<u64>,
    /// Ceiling on completed steps; a run that has spent its budget halts on
    /// the next arbiter cycle.
    pub max_steps: Option<u64>,
}

/// Comparison operator in a rule condition.
///
/// Expressed in TOML as a plain string:
/// ```toml
/// op = "lt"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// True when the field resolves to a value at all. `value` is ignored.
    Exists,
}

/// One field-path condition inside a conditional rule.
///
/// `field` is a dot-separated path rooted at either `governance` (the
/// closed metadata shape, checked at compile time) or `data` (the open
/// application map). A field that does not resolve at evaluation time never
/// satisfies the condition, except under `exists`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

/// What a matching conditional rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    Halt,
    Reroute,
}

/// A single policy rule loaded from TOML.
///
/// ```toml
/// [[rules]]
/// kind = "transition"
/// id = "no-cognitive-to-execution"
/// description = "Generation may not feed a tool call directly"
/// from_core = "cognitive"
/// to_core = "execution"
///
/// [[rules]]
/// kind = "conditional"
/// id = "low-confidence-review"
/// description = "Route weak verifications to a human"
/// action = "reroute"
/// target = "human_review"
///
/// [[rules.conditions]]
/// field = "governance.last_verification.confidence"
/// op = "lt"
/// value = 0.9
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PolicyRule {
    /// Forbids any transition from `from_core` to `to_core`.
    Transition {
        id: String,
        description: String,
        from_core: InstructionCore,
        to_core: InstructionCore,
    },

    /// Fires when every condition holds; first match in declaration order
    /// wins. `target` is mandatory when `action` is `reroute`.
    Conditional {
        id: String,
        description: String,
        conditions: Vec<RuleCondition>,
        action: RuleAction,
        target: Option<String>,
    },
}

impl PolicyRule {
    /// Stable rule identifier, used in decisions and trace events.
    pub fn id(&self) -> &str {
        match self {
            PolicyRule::Transition { id, .. } | PolicyRule::Conditional { id, .. } => id,
        }
    }
}

/// The top-level structure deserialized from a TOML policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Stable identifier for this policy.
    pub policy_id: String,
    /// Policy version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Global resource ceilings.
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Ordered rules. Conditional rules: first match wins.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PolicyConfig {
    /// Parse `s` as a TOML policy document.
    ///
    /// Returns `ArbiterError::Compile` if the TOML is malformed or does not
    /// match the expected schema.
    pub fn from_toml_str(s: &str) -> ArbiterResult<Self> {
        toml::from_str(s).map_err(|e| ArbiterError::Compile {
            reason: format!("failed to parse policy TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as a TOML policy document.
    pub fn from_file(path: &Path) -> ArbiterResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ArbiterError::Compile {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// A policy with no limits and no rules; every decision is `Proceed`.
    pub fn permissive(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            version: default_version(),
            description: "permissive policy".to_string(),
            limits: ResourceLimits::default(),
            rules: Vec::new(),
        }
    }
}
