//! In-memory implementation of `CheckpointStore`.
//!
//! `MemoryCheckpointStore` is the reference implementation used by the
//! router tests and the demo. Snapshots are stored as their JSON form, so
//! every save/load exercises the same round trip a durable backend would.

use std::collections::HashMap;
use std::sync::Mutex;

use arbiter_contracts::error::{ArbiterError, ArbiterResult};
use arbiter_contracts::state::{ExecutionId, ManagedState};

use crate::traits::CheckpointStore;

/// An in-memory checkpoint store keyed by `(execution_id, step)`.
///
/// Safe to share across threads; both operations take an internal lock.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<(String, u64), String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots currently held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots
            .lock()
            .map(|snapshots| snapshots.len())
            .unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, snapshot: &ManagedState) -> ArbiterResult<()> {
        let encoded = snapshot.to_json().map_err(|e| ArbiterError::Persistence {
            reason: format!("failed to encode snapshot: {}", e),
        })?;

        let key = (
            snapshot.governance.execution_id.to_string(),
            snapshot.governance.step,
        );

        let mut snapshots = self.snapshots.lock().map_err(|e| ArbiterError::Persistence {
            reason: format!("checkpoint lock poisoned: {}", e),
        })?;
        snapshots.insert(key, encoded);
        Ok(())
    }

    fn load(&self, execution_id: &ExecutionId, step: u64) -> ArbiterResult<ManagedState> {
        let snapshots = self.snapshots.lock().map_err(|e| ArbiterError::Persistence {
            reason: format!("checkpoint lock poisoned: {}", e),
        })?;

        let encoded = snapshots
            .get(&(execution_id.to_string(), step))
            .ok_or_else(|| ArbiterError::Persistence {
                reason: format!("no checkpoint for execution '{execution_id}' at step {step}"),
            })?;

        ManagedState::from_json(encoded).map_err(|e| ArbiterError::Persistence {
            reason: format!("failed to decode snapshot: {}", e),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
