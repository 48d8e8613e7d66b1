//! In-memory store for tests and embedding.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{set_step_status, PlanUpdate, RollbackUpdate, RunUpdate, Store};
use crate::domain::{AuditEvent, Connection, Plan, Rollback, Run, Snapshot, StepStatus};

#[derive(Default)]
struct Tables {
    plans: HashMap<Uuid, Plan>,
    connections: HashMap<String, Connection>,
    runs: HashMap<Uuid, Run>,
    snapshots: HashMap<Uuid, Snapshot>,
    rollbacks: HashMap<Uuid, Rollback>,
    audit: Vec<AuditEvent>,
}

/// Store holding everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots stored
    pub async fn snapshot_count(&self) -> usize {
        self.tables.read().await.snapshots.len()
    }

    /// Number of rollback records stored
    pub async fn rollback_count(&self) -> usize {
        self.tables.read().await.rollbacks.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        self.tables.write().await.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(&plan_id).cloned())
    }

    async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> Result<()> {
        let mut tables = self.tables.write().await;
        let plan = tables
            .plans
            .get_mut(&plan_id)
            .with_context(|| format!("Plan {} not found", plan_id))?;
        update.apply(plan);
        Ok(())
    }

    async fn update_step_status(
        &self,
        plan_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let plan = tables
            .plans
            .get_mut(&plan_id)
            .with_context(|| format!("Plan {} not found", plan_id))?;
        set_step_status(plan, step_id, status)
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.tables.read().await.plans.values().cloned().collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn create_connection(&self, connection: &Connection) -> Result<()> {
        self.tables
            .write()
            .await
            .connections
            .insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        Ok(self.tables.read().await.connections.get(connection_id).cloned())
    }

    async fn create_run(&self, run: &Run) -> Result<()> {
        self.tables.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.tables.read().await.runs.get(&run_id).cloned())
    }

    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> Result<()> {
        let mut tables = self.tables.write().await;
        let run = tables
            .runs
            .get_mut(&run_id)
            .with_context(|| format!("Run {} not found", run_id))?;
        update.apply(run);
        Ok(())
    }

    async fn list_runs(&self, plan_id: Uuid) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .tables
            .read()
            .await
            .runs
            .values()
            .filter(|r| r.plan_id == plan_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.tables
            .write()
            .await
            .snapshots
            .insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self.tables.read().await.snapshots.get(&snapshot_id).cloned())
    }

    async fn attach_after_state(
        &self,
        snapshot_id: Uuid,
        after_state: serde_json::Value,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let snapshot = tables
            .snapshots
            .get_mut(&snapshot_id)
            .with_context(|| format!("Snapshot {} not found", snapshot_id))?;
        snapshot.after_state = Some(after_state);
        Ok(())
    }

    async fn create_rollback(&self, rollback: &Rollback) -> Result<()> {
        self.tables
            .write()
            .await
            .rollbacks
            .insert(rollback.id, rollback.clone());
        Ok(())
    }

    async fn get_rollback(&self, rollback_id: Uuid) -> Result<Option<Rollback>> {
        Ok(self.tables.read().await.rollbacks.get(&rollback_id).cloned())
    }

    async fn update_rollback(&self, rollback_id: Uuid, update: RollbackUpdate) -> Result<()> {
        let mut tables = self.tables.write().await;
        let rollback = tables
            .rollbacks
            .get_mut(&rollback_id)
            .with_context(|| format!("Rollback {} not found", rollback_id))?;
        update.apply(rollback);
        Ok(())
    }

    async fn list_rollbacks(&self, run_id: Uuid) -> Result<Vec<Rollback>> {
        let mut rollbacks: Vec<Rollback> = self
            .tables
            .read()
            .await
            .rollbacks
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        rollbacks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rollbacks)
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        self.tables.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn list_audit(&self, run_id: Option<Uuid>) -> Result<Vec<AuditEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| run_id.is_none() || e.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskLevel, RunStatus, Step};

    #[tokio::test]
    async fn test_plan_step_status_update() {
        let store = MemoryStore::new();
        let plan = Plan::new("p", RiskLevel::Low).with_step(Step::new("a", 1));
        let step_id = plan.steps[0].id;
        store.create_plan(&plan).await.unwrap();

        store
            .update_step_status(plan.id, step_id, StepStatus::Completed)
            .await
            .unwrap();

        let loaded = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(loaded.steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_missing_run_fails() {
        let store = MemoryStore::new();
        let result = store
            .update_run(Uuid::new_v4(), RunUpdate::status(RunStatus::Failed))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_audit_filter_by_run() {
        use crate::domain::{Actor, AuditEvent, AuditResult};

        let store = MemoryStore::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        for run_id in [run_a, run_b, run_a] {
            let event = AuditEvent::new(
                Actor::System,
                "plan.execute",
                "plan:x",
                RiskLevel::Low,
                AuditResult::Success,
            )
            .with_run(run_id);
            store.append_audit(&event).await.unwrap();
        }

        assert_eq!(store.list_audit(None).await.unwrap().len(), 3);
        assert_eq!(store.list_audit(Some(run_a)).await.unwrap().len(), 2);
    }
}
