//! Run state and step results.
//!
//! A Run represents a single execution attempt of a plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::{ExecutionMode, Plan, RiskLevel};
use crate::error::{EngineError, EngineResult};

/// One execution attempt of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// The plan being executed
    pub plan_id: Uuid,

    /// Connection the run executes against
    pub connection_id: String,

    /// Current status of the run
    pub status: RunStatus,

    /// Plan risk level, frozen at run creation
    pub risk_level: RiskLevel,

    /// Execution mode, frozen at run creation (PLAN_ONLY for dry runs)
    pub execution_mode: ExecutionMode,

    /// Whether this run is a dry run
    pub dry_run: bool,

    /// Correlates the run, its steps, audit events and connector logs
    pub trace_id: String,

    /// Snapshot captured before a live run
    pub snapshot_id: Option<Uuid>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,

    /// Terminal error message, if failed
    pub error: Option<String>,

    /// Step results and other run metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Run {
    /// Create a running run for a plan, freezing its risk and mode
    pub fn start(
        id: Uuid,
        plan: &Plan,
        connection_id: impl Into<String>,
        trace_id: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        let execution_mode = if dry_run {
            ExecutionMode::PlanOnly
        } else {
            plan.execution_mode
        };

        Self {
            id,
            plan_id: plan.id,
            connection_id: connection_id.into(),
            status: RunStatus::Running,
            risk_level: plan.risk_level,
            execution_mode,
            dry_run,
            trace_id: trace_id.into(),
            snapshot_id: None,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Pending | RunStatus::Running)
    }
}

/// Status of a run
///
/// `Pending -> Running -> {Completed | Failed} -> [RolledBack]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    /// Whether a rollback may target a run in this status
    pub fn allows_rollback(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::RolledBack
        )
    }
}

/// Outcome of one attempted step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step this result belongs to
    pub step_id: Uuid,

    /// Connector action that was invoked
    pub action_id: String,

    /// Terminal status of the attempt
    pub status: StepResultStatus,

    /// Connector output (completed steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Connector evidence (completed steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,

    /// Error message (failed steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time taken in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    /// A completed step result
    pub fn completed(
        step_id: Uuid,
        action_id: impl Into<String>,
        output: serde_json::Value,
        evidence: serde_json::Value,
    ) -> Self {
        Self {
            step_id,
            action_id: action_id.into(),
            status: StepResultStatus::Completed,
            output: Some(output),
            evidence: Some(evidence),
            error: None,
            duration_ms: 0,
        }
    }

    /// A failed step result
    pub fn failed(step_id: Uuid, action_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id,
            action_id: action_id.into(),
            status: StepResultStatus::Failed,
            output: None,
            evidence: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Attach duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepResultStatus::Completed
    }
}

/// Terminal status of one step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Completed,
    Failed,
}

/// Structured result of one `execute_plan` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff every recorded step result completed
    pub success: bool,

    /// The run created for this invocation
    pub run_id: Uuid,

    /// Results of attempted steps, in execution order
    pub step_results: Vec<StepResult>,

    /// Snapshot captured for a live run
    pub snapshot_id: Option<Uuid>,

    /// Fatal error, if the execution could not proceed
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Turn an unsuccessful result into the error that ended it
    pub fn ensure_success(&self) -> EngineResult<()> {
        if self.success {
            return Ok(());
        }
        if let Some(error) = &self.error {
            return Err(EngineError::OrchestratorFatal(error.clone()));
        }

        match self.step_results.iter().find(|r| !r.is_completed()) {
            Some(failed) => Err(EngineError::StepExecution {
                step: failed.action_id.clone(),
                message: failed.error.clone().unwrap_or_default(),
            }),
            None => Err(EngineError::OrchestratorFatal(format!(
                "run {} did not succeed",
                self.run_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::RiskLevel;

    #[test]
    fn test_run_freezes_plan_fields() {
        let plan = Plan::new("freeze", RiskLevel::High);
        let run = Run::start(Uuid::new_v4(), &plan, "conn-1", "trace-1", false);

        assert_eq!(run.plan_id, plan.id);
        assert_eq!(run.risk_level, RiskLevel::High);
        assert_eq!(run.execution_mode, ExecutionMode::Auto);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.is_running());
    }

    #[test]
    fn test_dry_run_forces_plan_only() {
        let plan = Plan::new("dry", RiskLevel::Low);
        let run = Run::start(Uuid::new_v4(), &plan, "conn-1", "trace-1", true);

        assert_eq!(run.execution_mode, ExecutionMode::PlanOnly);
        assert!(run.dry_run);
    }

    #[test]
    fn test_rollback_allowed_only_from_terminal_status() {
        assert!(!RunStatus::Pending.allows_rollback());
        assert!(!RunStatus::Running.allows_rollback());
        assert!(RunStatus::Completed.allows_rollback());
        assert!(RunStatus::Failed.allows_rollback());
        assert!(RunStatus::RolledBack.allows_rollback());
    }

    #[test]
    fn test_step_result_serialization_omits_empty_fields() {
        let result = StepResult::failed(Uuid::new_v4(), "github.push", "denied");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "denied");
        assert!(json.get("output").is_none());
    }

    #[test]
    fn test_ensure_success_prefers_fatal_error() {
        let mut result = ExecutionResult {
            success: false,
            run_id: Uuid::new_v4(),
            step_results: vec![StepResult::failed(Uuid::new_v4(), "github.push", "denied")],
            snapshot_id: None,
            error: None,
        };

        let err = result.ensure_success().unwrap_err();
        assert!(matches!(err, EngineError::StepExecution { ref step, .. } if step == "github.push"));
        assert_eq!(err.to_string(), "Step 'github.push' failed: denied");

        result.error = Some("store offline".to_string());
        assert!(matches!(
            result.ensure_success(),
            Err(EngineError::OrchestratorFatal(_))
        ));

        result.success = true;
        result.error = None;
        assert!(result.ensure_success().is_ok());
    }
}
