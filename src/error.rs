//! Error taxonomy for the engine boundary.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::RunStatus;

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No connector registered for provider '{provider}'")]
    ConnectorNotFound { provider: String },

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Run {0} has no snapshot to roll back to")]
    NoSnapshotAvailable(Uuid),

    #[error("Snapshot {snapshot_id} belongs to run {owner}, not run {run_id}")]
    SnapshotRunMismatch {
        snapshot_id: Uuid,
        run_id: Uuid,
        owner: Uuid,
    },

    #[error("Run {run_id} is still {status:?} and cannot be rolled back")]
    RunNotTerminal { run_id: Uuid, status: RunStatus },

    #[error("Step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Plan execution failed: {0}")]
    OrchestratorFatal(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
