//! Audit events.
//!
//! Audit events are append-only and never mutated. They are the source of
//! truth for what the engine did, and to whom.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::RiskLevel;

/// Action names emitted by the engine
pub mod actions {
    pub const RUN_START: &str = "run.start";
    pub const SNAPSHOT_CREATE: &str = "snapshot.create";
    pub const STEP_EXECUTE: &str = "step.execute";
    pub const PLAN_DRY_RUN: &str = "plan.dry_run";
    pub const PLAN_EXECUTE: &str = "plan.execute";
    pub const PLAN_EXECUTE_ERROR: &str = "plan.execute.error";
    pub const RUN_ROLLBACK: &str = "run.rollback";
}

/// A single immutable record of one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// Who performed the action
    pub actor: Actor,

    /// Dotted action name (e.g. "plan.execute")
    pub action: String,

    /// What the action was performed on (e.g. "plan:<id>")
    pub target: String,

    /// Risk level of the plan involved
    pub risk_level: RiskLevel,

    /// Outcome of the action
    pub result: AuditResult,

    pub plan_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub snapshot_id: Option<Uuid>,
    pub trace_id: Option<String>,

    /// Action-specific details (NO secrets)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        actor: Actor,
        action: impl Into<String>,
        target: impl Into<String>,
        risk_level: RiskLevel,
        result: AuditResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor,
            action: action.into(),
            target: target.into(),
            risk_level,
            result,
            plan_id: None,
            run_id: None,
            snapshot_id: None,
            trace_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: Option<Uuid>) -> Self {
        self.snapshot_id = snapshot_id;
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Who performed an audited action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Actor {
    /// A human operator
    User(String),

    /// The engine itself
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::System => f.write_str("system"),
        }
    }
}

/// Outcome of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let run_id = Uuid::new_v4();
        let event = AuditEvent::new(
            Actor::User("ops@example.com".to_string()),
            actions::RUN_ROLLBACK,
            format!("run:{}", run_id),
            RiskLevel::High,
            AuditResult::Success,
        )
        .with_run(run_id)
        .with_trace("trace-1");

        let json = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.action, "run.rollback");
        assert_eq!(parsed.actor, Actor::User("ops@example.com".to_string()));
        assert_eq!(parsed.result, AuditResult::Success);
        assert_eq!(parsed.run_id, Some(run_id));
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::System.to_string(), "system");
        assert_eq!(Actor::User("alice".to_string()).to_string(), "user:alice");
    }
}
