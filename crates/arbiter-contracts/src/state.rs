//! Managed state: the serializable unit of truth flowing through every step.
//!
//! A `ManagedState` pairs application-owned `domain_data` with kernel-owned
//! `GovernanceMetadata`. Instruction implementations only ever see (and
//! produce) domain data; the governance side is written exclusively by the
//! execution harness and the router. That separation is carried as a method
//! contract — every mutation goes through a named method on `ManagedState`,
//! and those methods are called from kernel code only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a single governed execution.
///
/// Appears in every trace event and checkpoint key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    /// Create a new, unique execution ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of the most recent verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Pass,
    Fail,
}

/// The last verification result, as recorded by the harness when a
/// `Verify` binding completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    /// Confidence in [0, 1] when the verifier reports one.
    pub confidence: Option<f64>,
    pub details: Option<String>,
}

/// Cumulative resource counters for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Total tokens reported by instruction implementations so far.
    pub total_tokens: u64,
    /// Total wall time spent inside instruction implementations, in ms.
    pub elapsed_ms: u64,
}

/// One routing decision, as appended to the governance metadata by the
/// router after each arbiter cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// The step counter at the time the decision was made.
    pub step: u64,
    /// The decision's action ("proceed", "halt", "reroute").
    pub action: String,
    /// The rule that produced the decision, when one applies.
    pub rule_id: Option<String>,
    /// Wall-clock time the decision was recorded (UTC).
    pub timestamp: DateTime<Utc>,
}

/// Kernel-owned execution metadata.
///
/// Fields are public for reading (the policy engine resolves field paths
/// against this shape); mutation goes through `ManagedState` methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceMetadata {
    /// The execution this state belongs to.
    pub execution_id: ExecutionId,
    /// Monotonically increasing count of completed node executions.
    pub step: u64,
    /// Ordered list of executed node ids.
    pub history: Vec<String>,
    /// Outcome of the most recent `Verify` binding, if any ran.
    pub last_verification: Option<VerificationOutcome>,
    /// Cumulative resource counters.
    pub resources: ResourceUsage,
    /// The node the graph proposes to run next. Parked at an interrupt
    /// boundary so `resume` knows where to re-enter the loop.
    pub proposed_next: Option<String>,
    /// Every routing decision made so far, in order.
    pub decisions: Vec<DecisionRecord>,
    /// Set when a harness failure was absorbed by rerouting to a fallback.
    pub fallback_triggered: bool,
    /// Set while the execution is paused at an interrupt boundary.
    pub interrupt_reason: Option<String>,
    /// Wall-clock time the execution started (UTC).
    pub started_at: DateTime<Utc>,
    /// Wall-clock time of the most recent mutation (UTC).
    pub last_updated: DateTime<Utc>,
}

/// The snapshot passed between every step of a governed execution.
///
/// A new snapshot is derived (by clone) at every step; the final snapshot is
/// what the router returns to the caller. Snapshots serialize to JSON and
/// deserialize back to an identical value, which is what makes checkpointing
/// and resume correct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedState {
    /// Application-defined keys and values. Owned by instruction
    /// implementations; the kernel only merges validated outputs in.
    pub domain_data: Map<String, Value>,
    /// Kernel-owned metadata. Written only by the harness and the router.
    pub governance: GovernanceMetadata,
}

impl ManagedState {
    /// Create the step-0 state for a new execution.
    pub fn new(domain_data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            domain_data,
            governance: GovernanceMetadata {
                execution_id: ExecutionId::new(),
                step: 0,
                history: Vec::new(),
                last_verification: None,
                resources: ResourceUsage::default(),
                proposed_next: None,
                decisions: Vec::new(),
                fallback_triggered: false,
                interrupt_reason: None,
                started_at: now,
                last_updated: now,
            },
        }
    }

    fn touch(&mut self) {
        self.governance.last_updated = Utc::now();
    }

    /// Merge a validated instruction output into `domain_data`.
    ///
    /// Called by the harness after egress validation. A non-object output is
    /// stored under the `"result"` key.
    pub fn merge_output(&mut self, output: Value) {
        match output {
            Value::Object(map) => {
                for (key, value) in map {
                    self.domain_data.insert(key, value);
                }
            }
            other => {
                self.domain_data.insert("result".to_string(), other);
            }
        }
        self.touch();
    }

    /// Record that a node finished executing: bump the step counter and
    /// append to the history. Called by the harness on success.
    pub fn note_node_executed(&mut self, node_id: &str) {
        self.governance.step += 1;
        self.governance.history.push(node_id.to_string());
        self.touch();
    }

    /// Add to the cumulative resource counters. Called by the harness.
    pub fn charge_resources(&mut self, tokens: u64, elapsed_ms: u64) {
        self.governance.resources.total_tokens += tokens;
        self.governance.resources.elapsed_ms += elapsed_ms;
        self.touch();
    }

    /// Record the outcome of a `Verify` binding. Called by the harness.
    pub fn set_verification(&mut self, outcome: VerificationOutcome) {
        self.governance.last_verification = Some(outcome);
        self.touch();
    }

    /// Set (or clear) the node the graph proposes to run next.
    pub fn set_proposed_next(&mut self, node_id: Option<String>) {
        self.governance.proposed_next = node_id;
        self.touch();
    }

    /// Append a routing decision. Called by the router after each arbiter
    /// cycle; the arbiter itself never touches state.
    pub fn record_decision(&mut self, action: &str, rule_id: Option<String>) {
        self.governance.decisions.push(DecisionRecord {
            step: self.governance.step,
            action: action.to_string(),
            rule_id,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Mark that a harness failure was absorbed by a fallback reroute.
    pub fn mark_fallback(&mut self) {
        self.governance.fallback_triggered = true;
        self.touch();
    }

    /// Mark the execution as paused at an interrupt boundary.
    pub fn mark_interrupted(&mut self, reason: impl Into<String>) {
        self.governance.interrupt_reason = Some(reason.into());
        self.touch();
    }

    /// Clear the interrupt marker on resume.
    pub fn clear_interrupt(&mut self) {
        self.governance.interrupt_reason = None;
        self.touch();
    }

    /// Serialize the snapshot to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Reconstruct a snapshot from its JSON form.
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}
