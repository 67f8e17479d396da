//! Parallel fan-out inside a single binding.
//!
//! An `EnsembleInstruction` runs several member implementations against the
//! same input and merges their results into one output before it returns.
//! The parallel region lives entirely inside the `Invoke` call — the
//! harness, arbiter, and router see one instruction like any other.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use arbiter_contracts::instruction::{Invoke, InvokeError};

/// How an ensemble reduces its members' results to one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The first successful member result wins, in member order.
    FirstSuccess,
    /// The value produced by a strict majority of members wins. Results are
    /// compared by their canonical JSON form.
    MajorityVote,
}

/// An `Invoke` adapter fanning out to several member implementations.
///
/// All members run to completion (each on its own thread) before the merge
/// is applied; a member failure or panic counts against the vote but does
/// not abort the others.
pub struct EnsembleInstruction {
    members: Vec<Arc<dyn Invoke>>,
    strategy: MergeStrategy,
}

impl EnsembleInstruction {
    pub fn new(members: Vec<Arc<dyn Invoke>>, strategy: MergeStrategy) -> Self {
        Self { members, strategy }
    }
}

impl Invoke for EnsembleInstruction {
    fn invoke(&self, input: &Value) -> Result<Value, InvokeError> {
        if self.members.is_empty() {
            return Err("ensemble has no members".into());
        }

        let results: Vec<Result<Value, String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter()
                .map(|member| {
                    scope.spawn(move || member.invoke(input).map_err(|e| e.to_string()))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err("ensemble member panicked".to_string()))
                })
                .collect()
        });

        let successes: Vec<&Value> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        debug!(
            members = self.members.len(),
            successes = successes.len(),
            strategy = ?self.strategy,
            "ensemble fan-out complete"
        );

        match self.strategy {
            MergeStrategy::FirstSuccess => successes
                .first()
                .map(|v| (*v).clone())
                .ok_or_else(|| join_errors(&results).into()),

            MergeStrategy::MajorityVote => {
                let mut tally: Vec<(String, &Value, usize)> = Vec::new();
                for value in &successes {
                    let key = value.to_string();
                    match tally.iter_mut().find(|(k, _, _)| *k == key) {
                        Some((_, _, count)) => *count += 1,
                        None => tally.push((key, *value, 1)),
                    }
                }

                let winner = tally.iter().max_by_key(|(_, _, count)| *count);
                match winner {
                    Some((_, value, count)) if count * 2 > self.members.len() => {
                        Ok((*value).clone())
                    }
                    _ => Err(format!(
                        "no majority among {} member result(s)",
                        successes.len()
                    )
                    .into()),
                }
            }
        }
    }
}

fn join_errors(results: &[Result<Value, String>]) -> String {
    let errors: Vec<&str> = results
        .iter()
        .filter_map(|r| r.as_ref().err().map(String::as_str))
        .collect();
    format!("all ensemble members failed: {}", errors.join("; "))
}

// ── Tests ────────────────────────────────────────────────────────────────────
