//! Persistence for plans, runs, snapshots, rollbacks and audit events.
//!
//! The engine only needs create/read/partial-update keyed by id, plus an
//! append-only audit log. Updates merge the supplied fields over the stored
//! record (last writer wins per field); nothing is ever deleted.

pub mod jsonl;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuditEvent, Connection, Plan, PlanStatus, Rollback, RollbackStatus, Run, RunStatus,
    Snapshot, StepStatus,
};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Partial update for a plan
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub status: Option<PlanStatus>,
    pub dry_run_result: Option<serde_json::Value>,
}

impl PlanUpdate {
    pub fn status(status: PlanStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, plan: &mut Plan) {
        if let Some(status) = self.status {
            plan.status = status;
        }
        if let Some(result) = self.dry_run_result {
            plan.dry_run_result = Some(result);
        }
    }
}

/// Partial update for a run
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub snapshot_id: Option<Uuid>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(snapshot_id) = self.snapshot_id {
            run.snapshot_id = Some(snapshot_id);
        }
        if let Some(ended_at) = self.ended_at {
            run.ended_at = Some(ended_at);
        }
        if let Some(error) = self.error {
            run.error = Some(error);
        }
        if let Some(metadata) = self.metadata {
            run.metadata = metadata;
        }
    }
}

/// Partial update for a rollback
#[derive(Debug, Clone, Default)]
pub struct RollbackUpdate {
    pub status: Option<RollbackStatus>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl RollbackUpdate {
    pub fn apply(self, rollback: &mut Rollback) {
        if let Some(status) = self.status {
            rollback.status = status;
        }
        if let Some(executed_at) = self.executed_at {
            rollback.executed_at = Some(executed_at);
        }
        if let Some(result) = self.result {
            rollback.result = result;
        }
    }
}

/// Storage backend used by the engine
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_plan(&self, plan: &Plan) -> Result<()>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>>;
    async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> Result<()>;
    async fn update_step_status(&self, plan_id: Uuid, step_id: Uuid, status: StepStatus)
        -> Result<()>;
    async fn list_plans(&self) -> Result<Vec<Plan>>;

    async fn create_connection(&self, connection: &Connection) -> Result<()>;
    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>>;

    async fn create_run(&self, run: &Run) -> Result<()>;
    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>>;
    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> Result<()>;
    async fn list_runs(&self, plan_id: Uuid) -> Result<Vec<Run>>;

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>>;
    async fn attach_after_state(&self, snapshot_id: Uuid, after_state: serde_json::Value)
        -> Result<()>;

    async fn create_rollback(&self, rollback: &Rollback) -> Result<()>;
    async fn get_rollback(&self, rollback_id: Uuid) -> Result<Option<Rollback>>;
    async fn update_rollback(&self, rollback_id: Uuid, update: RollbackUpdate) -> Result<()>;
    async fn list_rollbacks(&self, run_id: Uuid) -> Result<Vec<Rollback>>;

    async fn append_audit(&self, event: &AuditEvent) -> Result<()>;

    /// Audit events in append order, optionally only those for one run
    async fn list_audit(&self, run_id: Option<Uuid>) -> Result<Vec<AuditEvent>>;
}

/// Apply a step status change to a plan in place
pub(crate) fn set_step_status(plan: &mut Plan, step_id: Uuid, status: StepStatus) -> Result<()> {
    let step = plan
        .steps
        .iter_mut()
        .find(|s| s.id == step_id)
        .ok_or_else(|| anyhow::anyhow!("Step {} not found in plan {}", step_id, plan.id))?;
    step.status = status;
    Ok(())
}
