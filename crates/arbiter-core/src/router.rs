//! The execution router: graph construction and the governed step loop.
//!
//! The router is the only component that knows the graph topology. Every
//! user-declared edge `A → B` is realized as "run A, then ask the arbiter
//! about B" — the loop structure itself is the rewiring; no instruction
//! ever transitions to another without an intervening governance decision.
//!
//! Run states: Running → {Completed, Halted, Interrupted}. `Interrupted` is
//! terminal for the invocation but re-enterable through `resume`, which is
//! an explicit state constructor keyed by `(execution_id, step)`, not a
//! continuation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use arbiter_contracts::decision::{EvaluationContext, RoutingDecision};
use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::execution::{RunReport, RunStatus, StepOutcome};
use arbiter_contracts::instruction::{InstructionBinding, InstructionType};
use arbiter_contracts::state::{ExecutionId, ManagedState};
use arbiter_contracts::trace::{SpanContext, TraceEvent};

use arbiter_policy::engine;
use arbiter_policy::rule::PolicyConfig;
use arbiter_policy::CompiledPolicy;

use crate::harness::Harness;
use crate::traits::{CheckpointStore, TraceSink};

// ── Graph construction ───────────────────────────────────────────────────────

/// Incremental builder for a governed graph.
///
/// All structural and policy problems are rejected here or in `compile` —
/// a compiled graph cannot fail for configuration reasons at runtime.
#[derive(Default)]
pub struct GraphBuilder {
    bindings: HashMap<String, Arc<InstructionBinding>>,
    registration_order: Vec<String>,
    edges: Vec<(String, String)>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding.
    ///
    /// Runs the binding's registration-time contract check (Cognitive and
    /// Memory cores must declare an output schema) and rejects duplicate
    /// ids.
    pub fn add_instruction(&mut self, binding: InstructionBinding) -> ArbiterResult<()> {
        binding.validate()?;

        if self.bindings.contains_key(&binding.id) {
            return Err(ArbiterError::Compile {
                reason: format!("duplicate instruction id '{}'", binding.id),
            });
        }

        self.registration_order.push(binding.id.clone());
        self.bindings.insert(binding.id.clone(), Arc::new(binding));
        Ok(())
    }

    /// Declare the edge `from → to`. Both endpoints must already be
    /// registered.
    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> ArbiterResult<()> {
        let (from, to) = (from.into(), to.into());
        for endpoint in [&from, &to] {
            if !self.bindings.contains_key(endpoint) {
                return Err(ArbiterError::Compile {
                    reason: format!("edge references unknown instruction '{}'", endpoint),
                });
            }
        }
        self.edges.push((from, to));
        Ok(())
    }

    /// Set the node the run starts at.
    pub fn set_entry(&mut self, id: impl Into<String>) -> ArbiterResult<()> {
        let id = id.into();
        if !self.bindings.contains_key(&id) {
            return Err(ArbiterError::Compile {
                reason: format!("entry point references unknown instruction '{}'", id),
            });
        }
        self.entry = Some(id);
        Ok(())
    }

    /// Compile the graph against a declarative policy.
    ///
    /// Compiles the policy exactly once, fixes the successor map (one
    /// declared successor per node), resolves the designated fallback node
    /// (the first `Fallback`-typed binding in registration order), and
    /// cross-checks that every conditional reroute target names a node.
    pub fn compile(self, policy: &PolicyConfig) -> ArbiterResult<GovernedGraph> {
        let entry = self.entry.ok_or_else(|| ArbiterError::Compile {
            reason: "graph has no entry point".to_string(),
        })?;

        let mut successors: HashMap<String, String> = HashMap::new();
        let mut seen_sources: HashSet<String> = HashSet::new();
        for (from, to) in self.edges {
            if !seen_sources.insert(from.clone()) {
                return Err(ArbiterError::Compile {
                    reason: format!("instruction '{}' declares more than one successor", from),
                });
            }
            successors.insert(from, to);
        }

        let compiled = CompiledPolicy::compile(policy)?;

        for target in compiled.reroute_targets() {
            if !self.bindings.contains_key(target) {
                return Err(ArbiterError::Compile {
                    reason: format!(
                        "policy rule reroutes to unknown instruction '{}'",
                        target
                    ),
                });
            }
        }

        let fallback = self
            .registration_order
            .iter()
            .find(|id| {
                self.bindings
                    .get(*id)
                    .is_some_and(|b| b.instruction_type == InstructionType::Fallback)
            })
            .cloned();

        info!(
            policy_id = %compiled.policy_id,
            nodes = self.bindings.len(),
            edges = successors.len(),
            fallback = fallback.as_deref().unwrap_or("-"),
            "graph compiled"
        );

        Ok(GovernedGraph {
            bindings: self.bindings,
            successors,
            entry,
            fallback,
            policy: Arc::new(compiled),
        })
    }
}

/// An immutable, compiled graph.
///
/// Shared read-only (behind `Arc`) by arbitrarily many concurrent runs;
/// nothing here is mutated after `compile`.
#[derive(Debug)]
pub struct GovernedGraph {
    bindings: HashMap<String, Arc<InstructionBinding>>,
    successors: HashMap<String, String>,
    entry: String,
    fallback: Option<String>,
    policy: Arc<CompiledPolicy>,
}

impl GovernedGraph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    pub fn binding(&self, id: &str) -> Option<&Arc<InstructionBinding>> {
        self.bindings.get(id)
    }
}

// ── The router ───────────────────────────────────────────────────────────────

/// Drives the step loop of one compiled graph.
pub struct Router {
    graph: Arc<GovernedGraph>,
    harness: Harness,
    sink: Arc<dyn TraceSink>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Router {
    pub fn new(graph: Arc<GovernedGraph>, harness: Harness, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            graph,
            harness,
            sink,
            checkpoints: None,
        }
    }

    /// Attach a checkpoint store; required for interrupt/resume.
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Run the graph from its entry point with the given initial domain
    /// data.
    ///
    /// Always returns a report — halts, unabsorbed step failures, and
    /// persistence faults all surface as `RunStatus`, never as `Err` or a
    /// panic.
    pub fn run(&self, initial_domain_data: Map<String, Value>) -> RunReport {
        let state = ManagedState::new(initial_domain_data);
        self.emit(
            &state,
            SpanContext::root(),
            "run_start",
            json!({ "entry": &self.graph.entry, "resumed": false }),
        );
        self.drive(state, self.graph.entry.clone())
    }

    /// Re-enter a run paused at an interrupt boundary.
    ///
    /// Loads the `(execution_id, step)` snapshot — or takes `override_state`
    /// for time-travel style resumption — clears the interrupt marker, and
    /// continues at the parked next node. Idempotent: resuming the same key
    /// twice replays from the same snapshot.
    pub fn resume(
        &self,
        execution_id: &ExecutionId,
        step: u64,
        override_state: Option<ManagedState>,
    ) -> ArbiterResult<RunReport> {
        let mut state = match override_state {
            Some(state) => state,
            None => {
                let store = self.checkpoints.as_ref().ok_or_else(|| {
                    ArbiterError::Persistence {
                        reason: "resume requires a checkpoint store".to_string(),
                    }
                })?;
                store.load(execution_id, step)?
            }
        };

        state.clear_interrupt();
        let parked = state.governance.proposed_next.clone();

        self.emit(
            &state,
            SpanContext::root(),
            "run_start",
            json!({ "entry": &parked, "resumed": true }),
        );

        match parked {
            Some(next) => Ok(self.drive(state, next)),
            // Nothing was parked: the interrupt sat at the end of the path.
            None => Ok(self.finish_completed(state)),
        }
    }

    // ── Step loop ────────────────────────────────────────────────────────────

    fn drive(&self, mut state: ManagedState, start: String) -> RunReport {
        let root = SpanContext::root();
        let mut span_seq: u64 = 0;
        let mut current = start;

        loop {
            let Some(binding) = self.graph.bindings.get(&current) else {
                // Only reachable through a resume snapshot referencing a node
                // the graph no longer has.
                return self.finish_halted(
                    state,
                    format!("unknown instruction '{}'", current),
                    None,
                );
            };

            // ── Interrupt boundary ───────────────────────────────────────────
            //
            // An Interrupt node is a marker, not an executable step; reaching
            // it (by edge, reroute, or entry) pauses the run before anything
            // else happens.
            if binding.instruction_type == InstructionType::Interrupt {
                return self.pause(state, &current);
            }

            // ── Node execution ───────────────────────────────────────────────
            span_seq += 1;
            let node_span = root.child(span_seq);
            let (next_state, outcome) = self.harness.execute(binding, &state, node_span);
            state = next_state;

            if let Some(store) = &self.checkpoints {
                if let Err(e) = store.save(&state) {
                    return self.finish_halted(
                        state,
                        format!("checkpoint save failed: {}", e),
                        None,
                    );
                }
            }

            if let StepOutcome::Failure(err) = outcome {
                match self.graph.fallback.clone() {
                    // A fallback absorbs the failure — unless it failed itself.
                    Some(fallback) if fallback != current => {
                        warn!(
                            execution_id = %state.governance.execution_id,
                            node = %current,
                            fallback = %fallback,
                            error = %err,
                            "step failed, rerouting to fallback"
                        );
                        state.mark_fallback();
                        self.emit(
                            &state,
                            root,
                            "fallback_reroute",
                            json!({
                                "from": &current,
                                "to": &fallback,
                                "error": err.to_string(),
                            }),
                        );
                        current = fallback;
                        continue;
                    }
                    _ => {
                        return self.finish_halted(
                            state,
                            format!("unrecoverable step failure: {}", err),
                            None,
                        );
                    }
                }
            }

            // ── Governor cycle ───────────────────────────────────────────────
            let proposed = self.graph.successors.get(&current).cloned();
            state.set_proposed_next(proposed.clone());

            let decision = {
                let context = EvaluationContext {
                    previous_node: Some(current.as_str()),
                    proposed_next: proposed.as_deref(),
                    from_core: Some(binding.core()),
                    to_core: proposed
                        .as_deref()
                        .and_then(|id| self.graph.bindings.get(id))
                        .map(|b| b.core()),
                    state: &state,
                };
                engine::decide(&context, &self.graph.policy)
            };

            state.record_decision(
                decision.action(),
                decision.violated_rule_id().map(str::to_string),
            );

            span_seq += 1;
            self.emit(
                &state,
                root.child(span_seq),
                "arbiter_decision",
                json!({
                    "previous": &current,
                    "proposed": &proposed,
                    "decision": &decision,
                }),
            );

            match decision {
                RoutingDecision::Proceed => match proposed {
                    Some(next) => current = next,
                    None => return self.finish_completed(state),
                },

                RoutingDecision::Halt {
                    reason,
                    violated_rule_id,
                } => return self.finish_halted(state, reason, violated_rule_id),

                RoutingDecision::Reroute { target, .. } => current = target,
            }
        }
    }

    // ── Terminal transitions ─────────────────────────────────────────────────

    fn pause(&self, mut state: ManagedState, interrupt_node: &str) -> RunReport {
        let parked = self.graph.successors.get(interrupt_node).cloned();
        state.set_proposed_next(parked);
        state.mark_interrupted(format!("interrupt boundary at '{}'", interrupt_node));

        if let Some(store) = &self.checkpoints {
            if let Err(e) = store.save(&state) {
                return self.finish_halted(
                    state,
                    format!("checkpoint save failed at interrupt: {}", e),
                    None,
                );
            }
        }

        let execution_id = state.governance.execution_id.clone();
        let step = state.governance.step;

        info!(
            execution_id = %execution_id,
            step,
            node = %interrupt_node,
            "run interrupted"
        );
        self.emit(
            &state,
            SpanContext::root(),
            "run_end",
            json!({ "status": "interrupted", "node": interrupt_node, "step": step }),
        );

        RunReport {
            state,
            status: RunStatus::Interrupted { execution_id, step },
        }
    }

    fn finish_completed(&self, state: ManagedState) -> RunReport {
        info!(
            execution_id = %state.governance.execution_id,
            steps = state.governance.step,
            "run completed"
        );
        self.emit(
            &state,
            SpanContext::root(),
            "run_end",
            json!({ "status": "completed", "steps": state.governance.step }),
        );
        RunReport {
            state,
            status: RunStatus::Completed,
        }
    }

    fn finish_halted(
        &self,
        state: ManagedState,
        reason: String,
        violated_rule_id: Option<String>,
    ) -> RunReport {
        warn!(
            execution_id = %state.governance.execution_id,
            reason = %reason,
            rule_id = violated_rule_id.as_deref().unwrap_or("-"),
            "run halted"
        );
        self.emit(
            &state,
            SpanContext::root(),
            "run_end",
            json!({
                "status": "halted",
                "reason": &reason,
                "rule_id": &violated_rule_id,
            }),
        );
        RunReport {
            state,
            status: RunStatus::Halted {
                reason,
                violated_rule_id,
            },
        }
    }

    fn emit(&self, state: &ManagedState, span: SpanContext, name: &str, attributes: Value) {
        debug!(event = name, "trace event");
        self.sink.record(TraceEvent::now(
            state.governance.execution_id.clone(),
            span,
            name,
            attributes,
        ));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
