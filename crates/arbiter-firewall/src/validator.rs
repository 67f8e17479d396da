//! JSON Schema validation for the sanitizing firewall.
//!
//! `SchemaFirewall` implements the `SchemaValidator` trait from
//! arbiter-core using the `jsonschema` crate. All violations are collected
//! before returning so callers see the full failure set in one pass.

use serde_json::Value;
use tracing::warn;

use arbiter_core::traits::SchemaValidator;

/// The kernel's schema check primitive.
///
/// Stateless; one instance serves every binding and every concurrent run.
#[derive(Debug, Default)]
pub struct SchemaFirewall;

impl SchemaFirewall {
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for SchemaFirewall {
    /// Validate `value` against `schema`.
    ///
    /// A JSON `null` schema means "no constraint" and always passes. A
    /// malformed schema document is reported as a single violation rather
    /// than crashing the run — the step still fails, but auditable.
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), Vec<String>> {
        if schema.is_null() {
            return Ok(());
        }

        let validator = match jsonschema::validator_for(schema) {
            Ok(validator) => validator,
            Err(e) => {
                let message = format!("invalid JSON Schema document: {e}");
                warn!(%message, "schema compilation failure");
                return Err(vec![message]);
            }
        };

        let violations: Vec<String> = validator
            .iter_errors(value)
            .map(|error| format!("schema violation at {}: {}", error.instance_path, error))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            warn!(count = violations.len(), "structural validation failure");
            Err(violations)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
