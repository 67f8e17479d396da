//! Instruction bindings: the formal contract that makes one step governable.
//!
//! A binding pairs an opaque implementation with the declarations the kernel
//! needs to police it — its type (and therefore its core), the schemas its
//! input and output must satisfy, and its retry/timeout budget. Bindings are
//! constructed and validated once at graph-build time and shared read-only
//! across concurrent executions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ArbiterError, ArbiterResult};

/// The closed set of instruction types a graph node may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructionType {
    /// Probabilistic text/plan generation.
    Generate,
    /// Context compression.
    Compress,
    /// Context filtering.
    Filter,
    /// Context loading.
    Load,
    /// External side effect (API call, tool invocation).
    ToolCall,
    /// Checks a prior output and reports pass/fail with confidence.
    Verify,
    /// Applies a hard constraint to state.
    Constrain,
    /// Designated recovery target for harness failures.
    Fallback,
    /// Pause boundary; routing into one suspends the run.
    Interrupt,
    /// Inspects cumulative resource usage.
    MonitorResources,
    /// Assesses progress toward the goal.
    EvaluateProgress,
    /// Produces a revised plan, typically closing a retry loop.
    Replan,
}

/// The five semantic domains instructions are governed under.
///
/// Every `InstructionType` maps to exactly one core; transition rules are
/// expressed over cores, not individual types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructionCore {
    Cognitive,
    Execution,
    Normative,
    Memory,
    Metacognitive,
}

impl InstructionCore {
    /// Number of cores; the policy compiler sizes its lookup matrix by this.
    pub const COUNT: usize = 5;

    /// Stable index used by the compiled transition matrix.
    pub fn index(self) -> usize {
        match self {
            InstructionCore::Cognitive => 0,
            InstructionCore::Execution => 1,
            InstructionCore::Normative => 2,
            InstructionCore::Memory => 3,
            InstructionCore::Metacognitive => 4,
        }
    }
}

impl InstructionType {
    /// The fixed mapping from instruction type to core.
    pub fn core(self) -> InstructionCore {
        match self {
            InstructionType::Generate => InstructionCore::Cognitive,
            InstructionType::Compress | InstructionType::Filter | InstructionType::Load => {
                InstructionCore::Memory
            }
            InstructionType::ToolCall => InstructionCore::Execution,
            InstructionType::Verify
            | InstructionType::Constrain
            | InstructionType::Fallback
            | InstructionType::Interrupt => InstructionCore::Normative,
            InstructionType::MonitorResources
            | InstructionType::EvaluateProgress
            | InstructionType::Replan => InstructionCore::Metacognitive,
        }
    }
}

/// Errors produced by instruction implementations.
///
/// Implementations are outside the trust boundary; whatever they raise is
/// captured by the harness and surfaced as an `Execution` outcome.
pub type InvokeError = Box<dyn std::error::Error + Send + Sync>;

/// The narrow capability an implementation must satisfy: one call,
/// JSON in, JSON out.
///
/// Implementations are **untrusted** — typically backed by an LLM or an
/// external tool. The harness is the only caller, and only after ingress
/// validation has passed.
pub trait Invoke: Send + Sync {
    /// Produce an output for the given validated input.
    fn invoke(&self, input: &Value) -> Result<Value, InvokeError>;
}

/// Adapter binding a plain closure to the `Invoke` capability.
pub struct FnInstruction<F>(F);

impl<F> FnInstruction<F>
where
    F: Fn(&Value) -> Result<Value, InvokeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Invoke for FnInstruction<F>
where
    F: Fn(&Value) -> Result<Value, InvokeError> + Send + Sync,
{
    fn invoke(&self, input: &Value) -> Result<Value, InvokeError> {
        (self.0)(input)
    }
}

/// Wrap a closure as a shareable implementation handle.
pub fn from_fn<F>(f: F) -> Arc<dyn Invoke>
where
    F: Fn(&Value) -> Result<Value, InvokeError> + Send + Sync + 'static,
{
    Arc::new(FnInstruction::new(f))
}

/// Retry, timeout, and provider configuration for one binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Extra attempts granted to structured-output enforcement. Zero means
    /// a single attempt.
    pub max_retries: u32,
    /// Per-invocation wall-time budget. `None` means unbounded.
    pub timeout_ms: Option<u64>,
    /// Opaque parameters forwarded to the structured-output provider.
    pub provider_params: Value,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: None,
            provider_params: Value::Null,
        }
    }
}

/// The formal contract for one graph node.
///
/// Immutable after registration; shared read-only across concurrent runs of
/// the same compiled graph.
#[derive(Clone)]
pub struct InstructionBinding {
    /// Unique node id within a graph.
    pub id: String,
    /// The declared instruction type; the core is derived from it.
    pub instruction_type: InstructionType,
    /// The domain-data keys this binding reads. Empty means the whole map.
    pub input_keys: Vec<String>,
    /// JSON Schema the extracted input must satisfy, if declared.
    pub input_schema: Option<Value>,
    /// JSON Schema the output must satisfy. Mandatory for Cognitive and
    /// Memory bindings — those cores produce untrusted, unstructured output.
    pub output_schema: Option<Value>,
    /// The implementation handle.
    pub implementation: Arc<dyn Invoke>,
    /// Retry/timeout budget.
    pub enforcement: EnforcementConfig,
}

impl std::fmt::Debug for InstructionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionBinding")
            .field("id", &self.id)
            .field("instruction_type", &self.instruction_type)
            .field("input_keys", &self.input_keys)
            .field("has_input_schema", &self.input_schema.is_some())
            .field("has_output_schema", &self.output_schema.is_some())
            .field("enforcement", &self.enforcement)
            .finish()
    }
}

impl InstructionBinding {
    /// Construct a binding with default enforcement and no schemas.
    pub fn new(
        id: impl Into<String>,
        instruction_type: InstructionType,
        implementation: Arc<dyn Invoke>,
    ) -> Self {
        Self {
            id: id.into(),
            instruction_type,
            input_keys: Vec::new(),
            input_schema: None,
            output_schema: None,
            implementation,
            enforcement: EnforcementConfig::default(),
        }
    }

    /// Declare the domain-data keys the implementation reads.
    pub fn with_input_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an ingress schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Attach an egress schema.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Override the enforcement budget.
    pub fn with_enforcement(mut self, enforcement: EnforcementConfig) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// The core this binding is governed under.
    pub fn core(&self) -> InstructionCore {
        self.instruction_type.core()
    }

    /// Registration-time contract check.
    ///
    /// Cognitive and Memory bindings must declare an output schema — their
    /// output is untrusted and the firewall has nothing to hold it against
    /// otherwise. This is rejected when the binding is registered, never at
    /// runtime.
    pub fn validate(&self) -> ArbiterResult<()> {
        if self.id.is_empty() {
            return Err(ArbiterError::Compile {
                reason: "instruction binding id must not be empty".to_string(),
            });
        }

        let core = self.core();
        if matches!(core, InstructionCore::Cognitive | InstructionCore::Memory)
            && self.output_schema.is_none()
        {
            return Err(ArbiterError::Compile {
                reason: format!(
                    "binding '{}' has {:?} core and must declare an output schema",
                    self.id, core
                ),
            });
        }

        Ok(())
    }
}
