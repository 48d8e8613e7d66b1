//! Engine facade.
//!
//! Owns the injected connector registry, store and policy. Each
//! `spawn_*` call runs one plan execution or rollback as its own tokio task
//! and hands back a `JoinHandle` as the result channel. Steps inside one
//! execution are never run in parallel.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connectors::{CapabilitySet, ConnectorRegistry, TokenGrant};
use crate::domain::{AuditEvent, Connection, ExecutionResult, Plan, RollbackResult, Run};
use crate::error::{EngineError, EngineResult};
use crate::store::Store;

use super::orchestrator::Orchestrator;
use super::policy::ExecutionPolicy;
use super::rollback::RollbackExecutor;

/// Entry point for executing and rolling back plans
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ConnectorRegistry>,
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    rollbacks: Arc<RollbackExecutor>,
}

impl Engine {
    pub fn new(registry: ConnectorRegistry, store: Arc<dyn Store>, policy: ExecutionPolicy) -> Self {
        let registry = Arc::new(registry);
        Self {
            orchestrator: Arc::new(Orchestrator::new(registry.clone(), store.clone(), policy)),
            rollbacks: Arc::new(RollbackExecutor::new(registry.clone(), store.clone())),
            registry,
            store,
        }
    }

    /// The store this engine writes to
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Execute a persisted plan in the current task
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        connection: &Connection,
        dry_run: bool,
    ) -> ExecutionResult {
        self.orchestrator.execute_plan(plan, connection, dry_run).await
    }

    /// Execute a persisted plan on its own task
    pub fn spawn_execute_plan(
        &self,
        plan: Plan,
        connection: Connection,
        dry_run: bool,
    ) -> JoinHandle<ExecutionResult> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.execute_plan(&plan, &connection, dry_run).await })
    }

    /// Load a plan and connection by id, then execute
    pub async fn execute_stored_plan(
        &self,
        plan_id: Uuid,
        connection_id: &str,
        dry_run: bool,
    ) -> EngineResult<ExecutionResult> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or(EngineError::PlanNotFound(plan_id))?;
        let connection = self.connection(connection_id).await?;

        Ok(self.execute_plan(&plan, &connection, dry_run).await)
    }

    /// Roll back a run in the current task
    pub async fn execute_rollback(
        &self,
        run_id: Uuid,
        triggered_by: &str,
    ) -> EngineResult<RollbackResult> {
        self.rollbacks.execute_rollback(run_id, triggered_by).await
    }

    /// Roll back a run on its own task
    pub fn spawn_execute_rollback(
        &self,
        run_id: Uuid,
        triggered_by: String,
    ) -> JoinHandle<EngineResult<RollbackResult>> {
        let rollbacks = Arc::clone(&self.rollbacks);
        tokio::spawn(async move { rollbacks.execute_rollback(run_id, &triggered_by).await })
    }

    /// Current state of a run
    pub async fn run_status(&self, run_id: Uuid) -> EngineResult<Run> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    /// Stored plans, most recent first
    pub async fn plans(&self) -> EngineResult<Vec<Plan>> {
        Ok(self.store.list_plans().await?)
    }

    /// Runs of a plan, most recent first
    pub async fn runs_for_plan(&self, plan_id: Uuid) -> EngineResult<Vec<Run>> {
        Ok(self.store.list_runs(plan_id).await?)
    }

    /// Audit events, optionally for one run, in append order
    pub async fn audit_trail(&self, run_id: Option<Uuid>) -> EngineResult<Vec<AuditEvent>> {
        Ok(self.store.list_audit(run_id).await?)
    }

    /// Ask a connection's connector what it can do
    pub async fn capabilities(&self, connection_id: &str) -> EngineResult<CapabilitySet> {
        let connection = self.connection(connection_id).await?;
        let connector = self.registry.resolve(&connection.provider)?;

        let capabilities = connector
            .discover_capabilities(&connection.access_token)
            .await
            .with_context(|| format!("Capability discovery failed for {}", connection.id))?;
        Ok(capabilities)
    }

    /// Exchange an OAuth code through a provider's connector
    pub async fn exchange_token(
        &self,
        provider: &str,
        code: &str,
        redirect_uri: &str,
    ) -> EngineResult<TokenGrant> {
        let connector = self.registry.resolve(provider)?;
        let grant = connector
            .exchange_token(code, redirect_uri)
            .await
            .with_context(|| format!("Token exchange failed for provider '{}'", provider))?;
        Ok(grant)
    }

    async fn connection(&self, connection_id: &str) -> EngineResult<Connection> {
        self.store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| EngineError::ConnectionNotFound(connection_id.to_string()))
    }
}
