//! Risk-gated orchestrator for plan execution.
//!
//! Creates the run, snapshots live runs, executes steps strictly in
//! ascending `order`, applies the abort policy and records the outcome on
//! the run, the plan and the audit log. Every failure, including storage
//! failures and unknown connectors, is folded into the returned
//! `ExecutionResult`; the run is never left RUNNING.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::connectors::{ActionContext, ConnectorRegistry};
use crate::domain::{
    actions, Actor, AuditEvent, AuditResult, Connection, ExecutionResult, Plan, PlanStatus, Run,
    RunStatus, StepResult, StepStatus,
};
use crate::store::{PlanUpdate, RunUpdate, Store};

use super::audit::AuditRecorder;
use super::policy::{should_abort, ExecutionPolicy};
use super::snapshot::SnapshotCapturer;
use super::step_runner::{derive_step_input, StepRunner};
use super::trace::generate_trace_id;

/// What has happened so far, kept for the fatal path
#[derive(Debug, Default)]
struct Progress {
    snapshot_id: Option<Uuid>,
    step_results: Vec<StepResult>,
}

/// Main plan orchestrator
pub struct Orchestrator {
    registry: Arc<ConnectorRegistry>,
    store: Arc<dyn Store>,
    policy: ExecutionPolicy,
    audit: AuditRecorder,
    snapshots: SnapshotCapturer,
    runner: StepRunner,
}

impl Orchestrator {
    /// Create an orchestrator over an explicit registry and store
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        store: Arc<dyn Store>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            snapshots: SnapshotCapturer::new(store.clone()),
            runner: StepRunner::new(policy.step_timeout()),
            registry,
            store,
            policy,
        }
    }

    /// Execute a persisted plan against a connection.
    ///
    /// Never returns an error: fatal problems are reported through
    /// `ExecutionResult::error` with `success == false`.
    #[instrument(skip(self, plan, connection), fields(plan_id = %plan.id, connection = %connection.id))]
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        connection: &Connection,
        dry_run: bool,
    ) -> ExecutionResult {
        let trace_id = generate_trace_id();
        let run = Run::start(Uuid::new_v4(), plan, &connection.id, &trace_id, dry_run);
        info!(run_id = %run.id, %trace_id, dry_run, risk = %plan.risk_level, "Starting plan execution");

        let mut progress = Progress::default();
        match self.drive(plan, connection, &run, &mut progress).await {
            Ok(result) => result,
            Err(e) => self.handle_fatal(plan, &run, progress, e).await,
        }
    }

    async fn drive(
        &self,
        plan: &Plan,
        connection: &Connection,
        run: &Run,
        progress: &mut Progress,
    ) -> Result<ExecutionResult> {
        self.store
            .create_run(run)
            .await
            .context("Failed to create run")?;
        self.audit
            .record(
                self.event(plan, run, actions::RUN_START, AuditResult::Success)
                    .with_payload(json!({ "connection_id": connection.id })),
            )
            .await?;

        let connector = self.registry.resolve(&connection.provider)?;

        if !run.dry_run {
            let snapshot = self.snapshots.take_snapshot(run.id, connection, plan).await?;
            self.store
                .update_run(
                    run.id,
                    RunUpdate {
                        snapshot_id: Some(snapshot.id),
                        ..Default::default()
                    },
                )
                .await
                .context("Failed to attach snapshot to run")?;
            progress.snapshot_id = Some(snapshot.id);

            self.audit
                .record(
                    self.event(plan, run, actions::SNAPSHOT_CREATE, AuditResult::Success)
                        .with_snapshot(Some(snapshot.id))
                        .with_payload(json!({
                            "scope": snapshot.scope,
                            "target": snapshot.target,
                            "checksum": snapshot.checksum,
                        })),
                )
                .await?;
        }

        let context = ActionContext::for_connection(connection, &run.trace_id);
        let steps = plan.ordered_steps();
        let mut aborted = false;

        for step in &steps {
            self.store
                .update_step_status(plan.id, step.id, StepStatus::Running)
                .await?;

            let input = derive_step_input(plan, step, &self.policy.default_branch);
            let result = self
                .runner
                .run(connector.as_ref(), step, input, context.clone(), run.dry_run)
                .await;

            let (status, outcome) = if result.is_completed() {
                (StepStatus::Completed, AuditResult::Success)
            } else {
                (StepStatus::Failed, AuditResult::Failure)
            };
            self.store
                .update_step_status(plan.id, step.id, status)
                .await?;
            self.audit
                .record(
                    self.event(plan, run, actions::STEP_EXECUTE, outcome)
                        .with_snapshot(progress.snapshot_id)
                        .with_payload(json!({
                            "step_id": step.id,
                            "order": step.order,
                            "action_id": step.action_id,
                            "error": result.error,
                        })),
                )
                .await?;

            let failed = !result.is_completed();
            progress.step_results.push(result);

            if failed && should_abort(run.dry_run, run.risk_level) {
                warn!(
                    step = %step.action_id,
                    order = step.order,
                    remaining = steps.len() - progress.step_results.len(),
                    "Step failed on a live {} risk plan, aborting",
                    run.risk_level
                );
                aborted = true;
                break;
            }
        }

        let success = progress.step_results.iter().all(StepResult::is_completed);
        let step_results = progress.step_results.clone();
        let results_json = serde_json::to_value(&step_results)
            .context("Failed to serialize step results")?;

        self.store
            .update_run(
                run.id,
                RunUpdate {
                    status: Some(if success {
                        RunStatus::Completed
                    } else {
                        RunStatus::Failed
                    }),
                    ended_at: Some(Utc::now()),
                    error: (!success).then(|| failure_summary(&step_results)),
                    metadata: Some(json!({
                        "step_results": results_json,
                        "aborted": aborted,
                    })),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to finalize run")?;

        let plan_status = match (run.dry_run, success) {
            (true, _) => PlanStatus::DryRunCompleted,
            (false, true) => PlanStatus::Executed,
            (false, false) => PlanStatus::Failed,
        };
        let plan_update = PlanUpdate {
            status: Some(plan_status),
            dry_run_result: run.dry_run.then(|| {
                json!({
                    "trace_id": run.trace_id,
                    "run_id": run.id,
                    "success": success,
                    "step_results": results_json,
                })
            }),
        };
        self.store
            .update_plan(plan.id, plan_update)
            .await
            .context("Failed to update plan status")?;

        let action = if run.dry_run {
            actions::PLAN_DRY_RUN
        } else {
            actions::PLAN_EXECUTE
        };
        let completed = step_results.iter().filter(|r| r.is_completed()).count();
        self.audit
            .record(
                self.event(
                    plan,
                    run,
                    action,
                    if success {
                        AuditResult::Success
                    } else {
                        AuditResult::Failure
                    },
                )
                .with_snapshot(progress.snapshot_id)
                .with_payload(json!({
                    "step_count": steps.len(),
                    "steps_completed": completed,
                    "steps_failed": step_results.len() - completed,
                    "aborted": aborted,
                    "dry_run": run.dry_run,
                })),
            )
            .await?;

        info!(run_id = %run.id, success, steps = step_results.len(), "Plan execution finished");

        Ok(ExecutionResult {
            success,
            run_id: run.id,
            step_results,
            snapshot_id: progress.snapshot_id,
            error: None,
        })
    }

    /// Fold an escaped error into a FAILED run and an error audit event
    async fn handle_fatal(
        &self,
        plan: &Plan,
        run: &Run,
        progress: Progress,
        error: anyhow::Error,
    ) -> ExecutionResult {
        let error_msg = format!("{:#}", error);
        error!(run_id = %run.id, error = %error_msg, "Plan execution failed");

        let metadata = json!({
            "step_results": serde_json::to_value(&progress.step_results).unwrap_or_default(),
            "fatal": true,
        });
        let update = RunUpdate {
            status: Some(RunStatus::Failed),
            ended_at: Some(Utc::now()),
            error: Some(error_msg.clone()),
            metadata: Some(metadata),
            ..Default::default()
        };
        if let Err(e) = self.store.update_run(run.id, update).await {
            warn!(run_id = %run.id, error = %e, "Failed to mark run as failed");
        }

        self.audit
            .record_best_effort(
                self.event(plan, run, actions::PLAN_EXECUTE_ERROR, AuditResult::Error)
                    .with_snapshot(progress.snapshot_id)
                    .with_payload(json!({
                        "error": error_msg,
                        "dry_run": run.dry_run,
                        "steps_attempted": progress.step_results.len(),
                    })),
            )
            .await;

        ExecutionResult {
            success: false,
            run_id: run.id,
            step_results: progress.step_results,
            snapshot_id: progress.snapshot_id,
            error: Some(error_msg),
        }
    }

    fn event(&self, plan: &Plan, run: &Run, action: &str, result: AuditResult) -> AuditEvent {
        AuditEvent::new(
            Actor::System,
            action,
            format!("plan:{}", plan.id),
            run.risk_level,
            result,
        )
        .with_plan(plan.id)
        .with_run(run.id)
        .with_trace(&run.trace_id)
    }
}

/// First failed step's error, used as the run's terminal error
fn failure_summary(results: &[StepResult]) -> String {
    results
        .iter()
        .find(|r| !r.is_completed())
        .map(|r| {
            format!(
                "Step '{}' failed: {}",
                r.action_id,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .unwrap_or_else(|| "Plan execution failed".to_string())
}
