//! Shared fixtures for integration tests: a scripted connector and a store
//! that fails on demand.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use plangate::connectors::{
    ActionContext, ActionOutcome, ActionRequest, CapabilitySet, Connector, ConnectorRegistry,
    TokenGrant,
};
use plangate::core::{Engine, ExecutionPolicy};
use plangate::domain::{
    AffectedResource, AuditEvent, AuthLevel, Connection, Plan, RiskLevel, Rollback, Run,
    Snapshot, Step, StepStatus,
};
use plangate::store::{MemoryStore, PlanUpdate, RollbackUpdate, RunUpdate, Store};

pub const PROVIDER: &str = "github";

/// What `compensate` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    Unsupported,
    Succeeds,
    Fails,
}

/// Connector that fails a fixed set of actions and records every call
pub struct ScriptedConnector {
    failing: HashSet<String>,
    compensation: Compensation,
    calls: Mutex<Vec<(String, Value, bool)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            compensation: Compensation::Unsupported,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, action_id: &str) -> Self {
        self.failing.insert(action_id.to_string());
        self
    }

    pub fn with_compensation(mut self, compensation: Compensation) -> Self {
        self.compensation = compensation;
        self
    }

    /// Action ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }

    /// Inputs in call order
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap().iter().map(|c| c.1.clone()).collect()
    }

    /// dry_run flags in call order
    pub fn dry_run_flags(&self) -> Vec<bool> {
        self.calls.lock().unwrap().iter().map(|c| c.2).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn discover_capabilities(&self, _access_token: &str) -> Result<CapabilitySet> {
        Ok(CapabilitySet::default())
    }

    async fn execute_action(&self, action_id: &str, request: ActionRequest) -> Result<ActionOutcome> {
        self.calls.lock().unwrap().push((
            action_id.to_string(),
            request.input.clone(),
            request.dry_run,
        ));

        if self.failing.contains(action_id) {
            anyhow::bail!("{} rejected by provider", action_id);
        }

        Ok(ActionOutcome::new(json!({ "action": action_id, "dry_run": request.dry_run }))
            .with_evidence(json!({ "trace_id": request.context.trace_id })))
    }

    async fn exchange_token(&self, code: &str, _redirect_uri: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            access_token: format!("token-for-{}", code),
            refresh_token: None,
            expires_in: Some(3600),
            scopes: vec!["repo".to_string()],
        })
    }

    async fn compensate(
        &self,
        _context: &ActionContext,
        snapshot: &Snapshot,
    ) -> Result<Option<Value>> {
        match self.compensation {
            Compensation::Unsupported => Ok(None),
            Compensation::Succeeds => Ok(Some(json!({ "reverted": snapshot.target }))),
            Compensation::Fails => anyhow::bail!("provider refused to revert {}", snapshot.target),
        }
    }
}

/// Store wrapper that fails selected operations
pub struct FaultyStore {
    inner: MemoryStore,
    failing_ops: Mutex<HashSet<&'static str>>,
    failing_audit: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_ops: Mutex::new(HashSet::new()),
            failing_audit: Mutex::new(HashSet::new()),
        }
    }

    /// Fail every call to the named store operation
    pub fn fail_op(&self, op: &'static str) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    /// Fail appends of audit events with this action
    pub fn fail_audit(&self, action: &str) {
        self.failing_audit.lock().unwrap().insert(action.to_string());
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing_ops.lock().unwrap().contains(op) {
            anyhow::bail!("store unavailable during {}", op);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        self.check("create_plan")?;
        self.inner.create_plan(plan).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        self.inner.get_plan(plan_id).await
    }

    async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> Result<()> {
        self.check("update_plan")?;
        self.inner.update_plan(plan_id, update).await
    }

    async fn update_step_status(
        &self,
        plan_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
    ) -> Result<()> {
        self.check("update_step_status")?;
        self.inner.update_step_status(plan_id, step_id, status).await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.inner.list_plans().await
    }

    async fn create_connection(&self, connection: &Connection) -> Result<()> {
        self.inner.create_connection(connection).await
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        self.inner.get_connection(connection_id).await
    }

    async fn create_run(&self, run: &Run) -> Result<()> {
        self.check("create_run")?;
        self.inner.create_run(run).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        self.inner.get_run(run_id).await
    }

    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> Result<()> {
        self.check("update_run")?;
        self.inner.update_run(run_id, update).await
    }

    async fn list_runs(&self, plan_id: Uuid) -> Result<Vec<Run>> {
        self.inner.list_runs(plan_id).await
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check("create_snapshot")?;
        self.inner.create_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        self.inner.get_snapshot(snapshot_id).await
    }

    async fn attach_after_state(&self, snapshot_id: Uuid, after_state: Value) -> Result<()> {
        self.check("attach_after_state")?;
        self.inner.attach_after_state(snapshot_id, after_state).await
    }

    async fn create_rollback(&self, rollback: &Rollback) -> Result<()> {
        self.check("create_rollback")?;
        self.inner.create_rollback(rollback).await
    }

    async fn get_rollback(&self, rollback_id: Uuid) -> Result<Option<Rollback>> {
        self.inner.get_rollback(rollback_id).await
    }

    async fn update_rollback(&self, rollback_id: Uuid, update: RollbackUpdate) -> Result<()> {
        self.check("update_rollback")?;
        self.inner.update_rollback(rollback_id, update).await
    }

    async fn list_rollbacks(&self, run_id: Uuid) -> Result<Vec<Rollback>> {
        self.inner.list_rollbacks(run_id).await
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        if self.failing_audit.lock().unwrap().contains(&event.action) {
            anyhow::bail!("audit log unavailable for {}", event.action);
        }
        self.inner.append_audit(event).await
    }

    async fn list_audit(&self, run_id: Option<Uuid>) -> Result<Vec<AuditEvent>> {
        self.inner.list_audit(run_id).await
    }
}

/// Plan touching one repository, with steps given as (action, order)
pub fn plan(risk: RiskLevel, steps: &[(&str, u32)]) -> Plan {
    let mut plan = Plan::new("Tighten branch protection", risk).with_resource(
        AffectedResource::new("github", "acme", "platform-api"),
    );
    for (action, order) in steps {
        plan = plan.with_step(Step::new(*action, *order));
    }
    plan
}

pub fn connection() -> Connection {
    Connection::new("gh-main", PROVIDER, AuthLevel::ReadWrite, "ghp_secret")
}

/// Engine over a scripted connector; plan and connection already stored
pub async fn engine_with<S: Store + 'static>(
    store: Arc<S>,
    connector: Arc<ScriptedConnector>,
    plan: &Plan,
) -> Engine {
    store.create_plan(plan).await.unwrap();
    store.create_connection(&connection()).await.unwrap();

    Engine::new(
        ConnectorRegistry::new().with(connector),
        store,
        ExecutionPolicy::default(),
    )
}
