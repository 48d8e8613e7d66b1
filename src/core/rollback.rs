//! Rollback executor.
//!
//! Restores a run's snapshot. Preconditions (run, snapshot, connection and
//! connector all resolvable, run terminal, snapshot owned by the run) are
//! checked before anything is written and surface as errors. Once the
//! Rollback record exists every outcome is recorded on it, and a failed
//! restoration leaves the run's status untouched.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::connectors::{ActionContext, Connector, ConnectorRegistry};
use crate::domain::{
    actions, Actor, AuditEvent, AuditResult, Connection, Rollback, RollbackResult,
    RollbackStatus, Run, RunStatus, Snapshot,
};
use crate::error::{EngineError, EngineResult};
use crate::store::{RollbackUpdate, RunUpdate, Store};

use super::audit::AuditRecorder;

/// Everything a rollback needs, resolved up front
struct Target {
    run: Run,
    snapshot: Snapshot,
    connection: Connection,
    connector: Arc<dyn Connector>,
}

/// Restores snapshots for finished runs
pub struct RollbackExecutor {
    registry: Arc<ConnectorRegistry>,
    store: Arc<dyn Store>,
    audit: AuditRecorder,
}

impl RollbackExecutor {
    pub fn new(registry: Arc<ConnectorRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            registry,
            store,
        }
    }

    /// Roll back a run to its snapshot
    #[instrument(skip(self))]
    pub async fn execute_rollback(
        &self,
        run_id: Uuid,
        triggered_by: &str,
    ) -> EngineResult<RollbackResult> {
        let target = self.resolve(run_id).await?;

        let rollback = Rollback::manual(target.run.id, target.snapshot.id, triggered_by);
        self.store.create_rollback(&rollback).await?;
        info!(rollback_id = %rollback.id, snapshot_id = %target.snapshot.id, "Rollback started");

        match self.attempt(&target, &rollback).await {
            Ok(()) => {
                info!(rollback_id = %rollback.id, "Rollback completed");
                Ok(RollbackResult {
                    success: true,
                    rollback_id: rollback.id,
                    error: None,
                })
            }
            Err(e) => {
                let error_msg = format!("{:#}", e);
                error!(rollback_id = %rollback.id, error = %error_msg, "Rollback failed");
                self.record_failure(&target, &rollback, &error_msg).await?;
                Ok(RollbackResult {
                    success: false,
                    rollback_id: rollback.id,
                    error: Some(error_msg),
                })
            }
        }
    }

    async fn resolve(&self, run_id: Uuid) -> EngineResult<Target> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;

        if !run.status.allows_rollback() {
            return Err(EngineError::RunNotTerminal {
                run_id,
                status: run.status,
            });
        }

        let snapshot_id = run
            .snapshot_id
            .ok_or(EngineError::NoSnapshotAvailable(run_id))?;
        let snapshot = self
            .store
            .get_snapshot(snapshot_id)
            .await?
            .ok_or(EngineError::SnapshotNotFound(snapshot_id))?;

        if snapshot.run_id != run.id {
            return Err(EngineError::SnapshotRunMismatch {
                snapshot_id,
                run_id,
                owner: snapshot.run_id,
            });
        }

        let connection = self
            .store
            .get_connection(&snapshot.connection_id)
            .await?
            .ok_or_else(|| EngineError::ConnectionNotFound(snapshot.connection_id.clone()))?;
        let connector = self.registry.resolve(&connection.provider)?;

        Ok(Target {
            run,
            snapshot,
            connection,
            connector,
        })
    }

    /// Restore, then record success on the rollback, snapshot, run and audit log
    async fn attempt(&self, target: &Target, rollback: &Rollback) -> Result<()> {
        let result = self.restore(target).await?;

        self.store
            .update_rollback(
                rollback.id,
                RollbackUpdate {
                    status: Some(RollbackStatus::Completed),
                    executed_at: Some(Utc::now()),
                    result: Some(result.clone()),
                },
            )
            .await?;
        self.store
            .attach_after_state(target.snapshot.id, result["restored_state"].clone())
            .await?;
        self.store
            .update_run(target.run.id, RunUpdate::status(RunStatus::RolledBack))
            .await?;

        // The run is rolled back from here on; nothing below may fail the rollback
        self.audit
            .record_best_effort(
                self.event(target, rollback, AuditResult::Success)
                    .with_payload(json!({
                        "rollback_id": rollback.id,
                        "compensated": result["compensated"],
                        "previous_status": target.run.status,
                    })),
            )
            .await;
        Ok(())
    }

    /// Verify the snapshot and ask the connector to compensate
    async fn restore(&self, target: &Target) -> Result<Value> {
        let snapshot = &target.snapshot;
        if !snapshot.verify() {
            anyhow::bail!(
                "Snapshot {} failed integrity check: checksum does not match before-state",
                snapshot.id
            );
        }

        let context = ActionContext::for_connection(&target.connection, &target.run.trace_id);
        let compensation = target.connector.compensate(&context, snapshot).await?;

        Ok(json!({
            "restored_state": snapshot.before_state,
            "checksum": snapshot.checksum,
            "compensated": compensation.is_some(),
            "compensation": compensation,
        }))
    }

    async fn record_failure(
        &self,
        target: &Target,
        rollback: &Rollback,
        error_msg: &str,
    ) -> EngineResult<()> {
        self.store
            .update_rollback(
                rollback.id,
                RollbackUpdate {
                    status: Some(RollbackStatus::Failed),
                    executed_at: Some(Utc::now()),
                    result: Some(json!({ "error": error_msg })),
                },
            )
            .await?;

        self.audit
            .record_best_effort(
                self.event(target, rollback, AuditResult::Failure)
                    .with_payload(json!({
                        "rollback_id": rollback.id,
                        "error": error_msg,
                    })),
            )
            .await;
        Ok(())
    }

    fn event(&self, target: &Target, rollback: &Rollback, result: AuditResult) -> AuditEvent {
        let actor = if rollback.triggered_by == "system" {
            Actor::System
        } else {
            Actor::User(rollback.triggered_by.clone())
        };

        AuditEvent::new(
            actor,
            actions::RUN_ROLLBACK,
            format!("run:{}", target.run.id),
            target.run.risk_level,
            result,
        )
        .with_plan(target.run.plan_id)
        .with_run(target.run.id)
        .with_snapshot(Some(target.snapshot.id))
        .with_trace(&target.run.trace_id)
    }
}
