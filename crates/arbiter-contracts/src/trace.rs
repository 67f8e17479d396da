//! Trace event types for the flight data recorder.
//!
//! The router and harness emit `TraceEvent`s; recorder implementations
//! decide how to store or export them. The hierarchy is carried by
//! `SpanContext` — one root span per execution, with alternating
//! governor-cycle and node-execution child spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ExecutionId;

/// Position of an event in the span hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// The span this event belongs to. Span 0 is the execution root.
    pub span_id: u64,
    /// The enclosing span, absent for the root.
    pub parent_span_id: Option<u64>,
}

impl SpanContext {
    /// The root span of an execution.
    pub fn root() -> Self {
        Self {
            span_id: 0,
            parent_span_id: None,
        }
    }

    /// A child of this span.
    pub fn child(&self, span_id: u64) -> Self {
        Self {
            span_id,
            parent_span_id: Some(self.span_id),
        }
    }
}

/// One structured trace event.
///
/// Events are ordered by the recorder, not by the producer; the kernel's
/// obligation ends at emitting well-formed events in causal order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// The execution this event belongs to.
    pub execution_id: ExecutionId,
    /// Where in the span hierarchy the event sits.
    pub span: SpanContext,
    /// Event name, e.g. "node_start", "arbiter_decision".
    pub name: String,
    /// Structured key/value attributes (rule ids, attempt counts, errors).
    pub attributes: Value,
    /// Wall-clock time the event was produced (UTC).
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    /// Build an event stamped with the current time.
    pub fn now(
        execution_id: ExecutionId,
        span: SpanContext,
        name: impl Into<String>,
        attributes: Value,
    ) -> Self {
        Self {
            execution_id,
            span,
            name: name.into(),
            attributes,
            timestamp: Utc::now(),
        }
    }
}
