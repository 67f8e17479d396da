//! The execution harness: makes an arbitrary implementation governable.
//!
//! Every node execution runs the same pipeline:
//!
//!   extract input → ingress validation → timed invocation
//!     → (Cognitive/Memory: structured-output enforcement)
//!     → (other cores: egress validation)
//!     → merge + metering
//!
//! A malformed input fails fast and never reaches the implementation. An
//! implementation fault or timeout is captured as data, never propagated as
//! a panic. The harness and the router are the only writers of governance
//! metadata.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::execution::StepOutcome;
use arbiter_contracts::instruction::{InstructionBinding, InstructionCore, InstructionType};
use arbiter_contracts::state::{ManagedState, VerificationOutcome, VerificationStatus};
use arbiter_contracts::trace::{SpanContext, TraceEvent};

use crate::traits::{SchemaValidator, StructuredOutputProvider, TraceSink};

/// The per-node execution pipeline.
///
/// One harness serves arbitrarily many concurrent runs: it holds only
/// shared, immutable collaborators.
pub struct Harness {
    validator: Arc<dyn SchemaValidator>,
    enforcer: Arc<dyn StructuredOutputProvider>,
    sink: Arc<dyn TraceSink>,
}

impl Harness {
    pub fn new(
        validator: Arc<dyn SchemaValidator>,
        enforcer: Arc<dyn StructuredOutputProvider>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            validator,
            enforcer,
            sink,
        }
    }

    /// Execute one binding against the current snapshot.
    ///
    /// Returns the derived snapshot and the step outcome. On failure the
    /// snapshot is returned unchanged — the step counter only advances on
    /// success.
    pub fn execute(
        &self,
        binding: &InstructionBinding,
        state: &ManagedState,
        span: SpanContext,
    ) -> (ManagedState, StepOutcome) {
        let mut next = state.clone();
        let execution_id = next.governance.execution_id.clone();

        debug!(
            execution_id = %execution_id,
            node = %binding.id,
            step = next.governance.step,
            "node execution starting"
        );
        self.sink.record(TraceEvent::now(
            execution_id.clone(),
            span,
            "node_start",
            json!({
                "node": &binding.id,
                "instruction_type": serde_json::to_value(binding.instruction_type)
                    .unwrap_or(Value::Null),
            }),
        ));

        // ── Ingress validation ───────────────────────────────────────────────
        //
        // A malformed request never reaches the implementation. No retry.
        let input = extract_input(binding, &next.domain_data);
        if let Some(schema) = &binding.input_schema {
            if let Err(violations) = self.validator.validate(&input, schema) {
                let err = ArbiterError::Validation {
                    node: binding.id.clone(),
                    reason: violations.join("; "),
                };
                warn!(node = %binding.id, error = %err, "ingress validation failed");
                self.record_node_end(&execution_id, span, binding, Err(&err), 0, 0);
                return (next, StepOutcome::Failure(err));
            }
        }

        // ── Invocation (timed) ───────────────────────────────────────────────
        let started = Instant::now();
        let invoked = self.invoke_stage(binding, input);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (output, attempts) = match invoked {
            Ok(pair) => pair,
            Err(err) => {
                warn!(node = %binding.id, error = %err, "invocation failed");
                self.record_node_end(&execution_id, span, binding, Err(&err), elapsed_ms, 0);
                return (next, StepOutcome::Failure(err));
            }
        };

        // ── Egress validation ────────────────────────────────────────────────
        //
        // Cognitive/Memory output was already constrained by the enforcement
        // provider; every other core is checked here when a schema exists.
        if !is_structured_core(binding.core()) {
            if let Some(schema) = &binding.output_schema {
                if let Err(violations) = self.validator.validate(&output, schema) {
                    let err = ArbiterError::Validation {
                        node: binding.id.clone(),
                        reason: violations.join("; "),
                    };
                    warn!(node = %binding.id, error = %err, "egress validation failed");
                    self.record_node_end(&execution_id, span, binding, Err(&err), elapsed_ms, attempts.into());
                    return (next, StepOutcome::Failure(err));
                }
            }
        }

        // ── Merge + metering ─────────────────────────────────────────────────
        let tokens_used = output
            .get("tokens_used")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        if binding.instruction_type == InstructionType::Verify {
            if let Some(outcome) = verification_from_output(&output) {
                next.set_verification(outcome);
            }
        }

        next.merge_output(output.clone());
        next.note_node_executed(&binding.id);
        next.charge_resources(tokens_used, elapsed_ms);

        info!(
            execution_id = %execution_id,
            node = %binding.id,
            elapsed_ms,
            attempts,
            "node execution completed"
        );
        self.record_node_end(&execution_id, span, binding, Ok(attempts), elapsed_ms, tokens_used);

        (
            next,
            StepOutcome::Success {
                output,
                tokens_used,
                elapsed_ms,
                attempts,
            },
        )
    }

    /// Run the implementation under the binding's timeout, routing
    /// Cognitive/Memory cores through the structured-output provider.
    fn invoke_stage(
        &self,
        binding: &InstructionBinding,
        input: Value,
    ) -> ArbiterResult<(Value, u32)> {
        let node = binding.id.clone();
        let implementation = Arc::clone(&binding.implementation);
        let timeout = binding.enforcement.timeout_ms.map(Duration::from_millis);

        if is_structured_core(binding.core()) {
            // Registration guarantees the schema exists for these cores.
            let Some(schema) = binding.output_schema.clone() else {
                return Err(ArbiterError::Validation {
                    node,
                    reason: "structured core binding has no output schema".to_string(),
                });
            };
            let enforcer = Arc::clone(&self.enforcer);
            let max_retries = binding.enforcement.max_retries;
            run_with_timeout(&binding.id, timeout, move || {
                enforcer.invoke_structured(&implementation, &input, &schema, max_retries, &node)
            })
        } else {
            run_with_timeout(&binding.id, timeout, move || {
                implementation
                    .invoke(&input)
                    .map(|output| (output, 1))
                    .map_err(|e| ArbiterError::Execution {
                        node: node.clone(),
                        reason: e.to_string(),
                    })
            })
        }
    }

    fn record_node_end(
        &self,
        execution_id: &arbiter_contracts::state::ExecutionId,
        span: SpanContext,
        binding: &InstructionBinding,
        result: Result<u32, &ArbiterError>,
        elapsed_ms: u64,
        tokens_used: u64,
    ) {
        let attributes = match result {
            Ok(attempts) => json!({
                "node": &binding.id,
                "status": "success",
                "attempts": attempts,
                "elapsed_ms": elapsed_ms,
                "tokens_used": tokens_used,
            }),
            Err(err) => json!({
                "node": &binding.id,
                "status": "failure",
                "error": err.to_string(),
                "elapsed_ms": elapsed_ms,
            }),
        };
        self.sink.record(TraceEvent::now(
            execution_id.clone(),
            span,
            "node_end",
            attributes,
        ));
    }
}

fn is_structured_core(core: InstructionCore) -> bool {
    matches!(core, InstructionCore::Cognitive | InstructionCore::Memory)
}

/// Extract the domain-data subset the binding declares. An empty
/// declaration means the whole map.
fn extract_input(binding: &InstructionBinding, domain: &Map<String, Value>) -> Value {
    if binding.input_keys.is_empty() {
        return Value::Object(domain.clone());
    }
    Value::Object(
        binding
            .input_keys
            .iter()
            .filter_map(|key| domain.get(key).map(|v| (key.clone(), v.clone())))
            .collect(),
    )
}

/// Read a verification outcome from a `Verify` binding's output.
///
/// Recognizes `passed` (bool, required), `confidence` (number), and
/// `reason`/`details` (string).
fn verification_from_output(output: &Value) -> Option<VerificationOutcome> {
    let passed = output.get("passed")?.as_bool()?;
    Some(VerificationOutcome {
        status: if passed {
            VerificationStatus::Pass
        } else {
            VerificationStatus::Fail
        },
        confidence: output.get("confidence").and_then(Value::as_f64),
        details: output
            .get("reason")
            .or_else(|| output.get("details"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Run `f` on a worker thread, bounding it by `timeout` when one is set.
///
/// On timeout the worker is left to finish in the background and its result
/// is discarded; the caller gets an `Execution` error immediately.
fn run_with_timeout<F>(
    node: &str,
    timeout: Option<Duration>,
    f: F,
) -> ArbiterResult<(Value, u32)>
where
    F: FnOnce() -> ArbiterResult<(Value, u32)> + Send + 'static,
{
    let Some(limit) = timeout else {
        return f();
    };

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(_) => Err(ArbiterError::Execution {
            node: node.to_string(),
            reason: format!("timed out after {}ms", limit.as_millis()),
        }),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use arbiter_contracts::error::{ArbiterError, ArbiterResult};
    use arbiter_contracts::execution::StepOutcome;
    use arbiter_contracts::instruction::{
        from_fn, EnforcementConfig, InstructionBinding, InstructionType, Invoke,
    };
    use arbiter_contracts::state::{ManagedState, VerificationStatus};
    use arbiter_contracts::trace::{SpanContext, TraceEvent};

    use crate::traits::{SchemaValidator, StructuredOutputProvider, TraceSink};

    use super::Harness;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// A validator that rejects any value missing the keys listed in the
    /// schema's `"required"` array, mirroring the shape of real reports.
    struct RequiredKeysValidator;

    impl SchemaValidator for RequiredKeysValidator {
        fn validate(
            &self,
            value: &serde_json::Value,
            schema: &serde_json::Value,
        ) -> Result<(), Vec<String>> {
            let required = schema
                .get("required")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let missing: Vec<String> = required
                .iter()
                .filter_map(|key| key.as_str())
                .filter(|key| value.get(key).is_none())
                .map(|key| format!("required field '{key}' is missing"))
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(missing)
            }
        }
    }

    /// An enforcement provider that invokes once and counts its calls.
    struct CountingEnforcer {
        calls: Arc<Mutex<u32>>,
    }

    impl StructuredOutputProvider for CountingEnforcer {
        fn invoke_structured(
            &self,
            implementation: &Arc<dyn Invoke>,
            input: &serde_json::Value,
            _schema: &serde_json::Value,
            _max_retries: u32,
            node: &str,
        ) -> ArbiterResult<(serde_json::Value, u32)> {
            *self.calls.lock().unwrap() += 1;
            implementation
                .invoke(input)
                .map(|output| (output, 1))
                .map_err(|e| ArbiterError::Execution {
                    node: node.to_string(),
                    reason: e.to_string(),
                })
        }
    }

    /// A sink that collects events for inspection.
    struct CollectingSink {
        events: Arc<Mutex<Vec<TraceEvent>>>,
    }

    impl TraceSink for CollectingSink {
        fn record(&self, event: TraceEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn harness_with_events() -> (Harness, Arc<Mutex<Vec<TraceEvent>>>, Arc<Mutex<u32>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let harness = Harness::new(
            Arc::new(RequiredKeysValidator),
            Arc::new(CountingEnforcer {
                calls: calls.clone(),
            }),
            Arc::new(CollectingSink {
                events: events.clone(),
            }),
        );
        (harness, events, calls)
    }

    fn state_with(data: serde_json::Value) -> ManagedState {
        let serde_json::Value::Object(map) = data else {
            panic!("state_with takes an object");
        };
        ManagedState::new(map)
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    /// A successful step merges the output, bumps the step counter, and
    /// charges the reported token spend.
    #[test]
    fn successful_step_merges_and_meters() {
        let (harness, events, _) = harness_with_events();

        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(|_input| Ok(json!({ "response": "ok", "tokens_used": 42 }))),
        );

        let state = state_with(json!({ "query": "weather" }));
        let (next, outcome) =
            harness.execute(&binding, &state, SpanContext::root().child(1));

        assert!(outcome.is_success());
        assert_eq!(next.governance.step, 1);
        assert_eq!(next.governance.history, vec!["call_api".to_string()]);
        assert_eq!(next.governance.resources.total_tokens, 42);
        assert_eq!(next.domain_data["response"], json!("ok"));
        // Untouched input keys survive the merge.
        assert_eq!(next.domain_data["query"], json!("weather"));

        let recorded = events.lock().unwrap();
        let names: Vec<&str> = recorded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["node_start", "node_end"]);
        assert_eq!(recorded[1].attributes["status"], json!("success"));
    }

    /// A failing ingress check returns Validation and never invokes the
    /// implementation.
    #[test]
    fn ingress_validation_fails_fast() {
        let (harness, _, _) = harness_with_events();

        let invoked = Arc::new(Mutex::new(false));
        let invoked_probe = invoked.clone();
        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(move |_input| {
                *invoked_probe.lock().unwrap() = true;
                Ok(json!({}))
            }),
        )
        .with_input_schema(json!({ "required": ["url"] }));

        let state = state_with(json!({ "other": 1 }));
        let (next, outcome) = harness.execute(&binding, &state, SpanContext::root());

        assert!(
            !*invoked.lock().unwrap(),
            "implementation must not run on malformed input"
        );
        assert_eq!(next.governance.step, 0, "failed steps do not advance");
        match outcome {
            StepOutcome::Failure(ArbiterError::Validation { node, reason }) => {
                assert_eq!(node, "call_api");
                assert!(reason.contains("url"));
            }
            other => panic!("expected Validation failure, got {:?}", other),
        }
    }

    /// Cognitive bindings are invoked through the structured-output
    /// provider, not directly.
    #[test]
    fn cognitive_binding_routes_through_enforcer() {
        let (harness, _, calls) = harness_with_events();

        let binding = InstructionBinding::new(
            "generate",
            InstructionType::Generate,
            from_fn(|_input| Ok(json!({ "answer": "4" }))),
        )
        .with_output_schema(json!({ "required": ["answer"] }));

        let state = state_with(json!({}));
        let (_, outcome) = harness.execute(&binding, &state, SpanContext::root());

        assert!(outcome.is_success());
        assert_eq!(*calls.lock().unwrap(), 1, "enforcer must be consulted once");
    }

    /// Non-structured cores get a plain egress check against the declared
    /// output schema.
    #[test]
    fn egress_validation_rejects_bad_tool_output() {
        let (harness, _, _) = harness_with_events();

        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(|_input| Ok(json!({ "unexpected": true }))),
        )
        .with_output_schema(json!({ "required": ["response"] }));

        let state = state_with(json!({}));
        let (_, outcome) = harness.execute(&binding, &state, SpanContext::root());

        match outcome {
            StepOutcome::Failure(ArbiterError::Validation { reason, .. }) => {
                assert!(reason.contains("response"));
            }
            other => panic!("expected Validation failure, got {:?}", other),
        }
    }

    /// An implementation error is captured as an Execution outcome.
    #[test]
    fn implementation_error_becomes_execution_failure() {
        let (harness, _, _) = harness_with_events();

        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(|_input| Err("connection refused".into())),
        );

        let state = state_with(json!({}));
        let (_, outcome) = harness.execute(&binding, &state, SpanContext::root());

        match outcome {
            StepOutcome::Failure(ArbiterError::Execution { reason, .. }) => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected Execution failure, got {:?}", other),
        }
    }

    /// An implementation that overruns its timeout is cut off with an
    /// Execution failure.
    #[test]
    fn timeout_is_captured_as_execution_failure() {
        let (harness, _, _) = harness_with_events();

        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(|_input| {
                std::thread::sleep(std::time::Duration::from_millis(300));
                Ok(json!({}))
            }),
        )
        .with_enforcement(EnforcementConfig {
            max_retries: 0,
            timeout_ms: Some(25),
            provider_params: serde_json::Value::Null,
        });

        let state = state_with(json!({}));
        let (_, outcome) = harness.execute(&binding, &state, SpanContext::root());

        match outcome {
            StepOutcome::Failure(ArbiterError::Execution { reason, .. }) => {
                assert!(reason.contains("timed out"), "got: {reason}");
            }
            other => panic!("expected Execution failure, got {:?}", other),
        }
    }

    /// A Verify binding's output populates the last-verification outcome.
    #[test]
    fn verify_binding_records_verification_outcome() {
        let (harness, _, _) = harness_with_events();

        let binding = InstructionBinding::new(
            "verify",
            InstructionType::Verify,
            from_fn(|_input| {
                Ok(json!({ "passed": true, "confidence": 0.87, "reason": "looks right" }))
            }),
        );

        let state = state_with(json!({}));
        let (next, outcome) = harness.execute(&binding, &state, SpanContext::root());

        assert!(outcome.is_success());
        let verification = next.governance.last_verification.unwrap();
        assert_eq!(verification.status, VerificationStatus::Pass);
        assert_eq!(verification.confidence, Some(0.87));
        assert_eq!(verification.details.as_deref(), Some("looks right"));
    }

    /// Declared input keys narrow what the implementation sees.
    #[test]
    fn declared_input_keys_narrow_the_input() {
        let (harness, _, _) = harness_with_events();

        let seen = Arc::new(Mutex::new(serde_json::Value::Null));
        let seen_probe = seen.clone();
        let binding = InstructionBinding::new(
            "call_api",
            InstructionType::ToolCall,
            from_fn(move |input| {
                *seen_probe.lock().unwrap() = input.clone();
                Ok(json!({}))
            }),
        )
        .with_input_keys(["query"]);

        let state = state_with(json!({ "query": "weather", "secret": "hidden" }));
        let (_, outcome) = harness.execute(&binding, &state, SpanContext::root());

        assert!(outcome.is_success());
        let observed = seen.lock().unwrap();
        assert_eq!(observed["query"], json!("weather"));
        assert!(observed.get("secret").is_none(), "undeclared keys must be withheld");
    }
}
