//! Rollback attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempt to restore a snapshot's before-state for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollback {
    /// Unique identifier for this attempt
    pub id: Uuid,

    /// The run being rolled back
    pub run_id: Uuid,

    /// The snapshot being restored (always belongs to `run_id`)
    pub snapshot_id: Uuid,

    /// How the rollback was initiated
    pub kind: RollbackKind,

    /// Current status
    pub status: RollbackStatus,

    /// Who triggered the rollback
    pub triggered_by: String,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When restoration finished (successfully or not)
    pub executed_at: Option<DateTime<Utc>>,

    /// Restoration result, or the error on failure
    #[serde(default)]
    pub result: serde_json::Value,
}

impl Rollback {
    /// Create a pending manual rollback
    pub fn manual(run_id: Uuid, snapshot_id: Uuid, triggered_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            snapshot_id,
            kind: RollbackKind::Manual,
            status: RollbackStatus::Pending,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
            executed_at: None,
            result: serde_json::Value::Null,
        }
    }
}

/// How a rollback was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    Manual,
}

/// Status of a rollback attempt
///
/// `Pending -> {Completed | Failed}`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    Completed,
    Failed,
}

impl Default for RollbackStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Structured result of one `execute_rollback` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub rollback_id: Uuid,
    pub error: Option<String>,
}
