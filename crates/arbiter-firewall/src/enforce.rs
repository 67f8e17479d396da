//! Retry-based structured-output enforcement.
//!
//! `RetryEnforcer` implements the `StructuredOutputProvider` trait: it
//! invokes the implementation up to `1 + max_retries` times, validating
//! every candidate against the output schema. After a miss, the prior
//! validation errors are handed back to the implementation under a
//! `validation_feedback` key so the next attempt can be biased toward a
//! conforming answer.
//!
//! Only schema misses consume retry budget. An implementation fault during
//! enforcement is an `Execution` error and ends the attempt loop at once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::instruction::Invoke;
use arbiter_core::traits::{SchemaValidator, StructuredOutputProvider};

/// The input key carrying prior validation errors back to the
/// implementation on retry attempts.
pub const FEEDBACK_KEY: &str = "validation_feedback";

/// The reference structured-output provider.
pub struct RetryEnforcer {
    validator: Arc<dyn SchemaValidator>,
}

impl RetryEnforcer {
    pub fn new(validator: Arc<dyn SchemaValidator>) -> Self {
        Self { validator }
    }
}

impl StructuredOutputProvider for RetryEnforcer {
    fn invoke_structured(
        &self,
        implementation: &Arc<dyn Invoke>,
        input: &Value,
        schema: &Value,
        max_retries: u32,
        node: &str,
    ) -> ArbiterResult<(Value, u32)> {
        let budget = max_retries.saturating_add(1);
        let mut last_errors: Vec<String> = Vec::new();

        for attempt in 1..=budget {
            let attempt_input = if last_errors.is_empty() {
                input.clone()
            } else {
                with_feedback(input, &last_errors)
            };

            debug!(node, attempt, budget, "structured-output attempt");

            let candidate =
                implementation
                    .invoke(&attempt_input)
                    .map_err(|e| ArbiterError::Execution {
                        node: node.to_string(),
                        reason: e.to_string(),
                    })?;

            match self.validator.validate(&candidate, schema) {
                Ok(()) => return Ok((candidate, attempt)),
                Err(violations) => {
                    warn!(
                        node,
                        attempt,
                        violations = violations.len(),
                        "candidate output rejected by schema"
                    );
                    last_errors = violations;
                }
            }
        }

        Err(ArbiterError::SchemaEnforcement {
            node: node.to_string(),
            attempts: budget,
            reason: last_errors.join("; "),
        })
    }
}

/// Clone the input with the prior violations attached. A non-object input
/// is wrapped so the feedback has somewhere to live.
fn with_feedback(input: &Value, errors: &[String]) -> Value {
    let feedback = Value::from(errors.to_vec());
    match input {
        Value::Object(map) => {
            let mut augmented = map.clone();
            augmented.insert(FEEDBACK_KEY.to_string(), feedback);
            Value::Object(augmented)
        }
        other => serde_json::json!({ "input": other, FEEDBACK_KEY: feedback }),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
