//! Domain types for the plangate engine.
//!
//! This module contains the core data structures:
//! - Plan: Approved ordered steps with declared risk
//! - Run: One execution attempt of a plan
//! - Snapshot: Captured before-state with integrity checksum
//! - Rollback: One attempt to restore a snapshot
//! - Audit: Immutable records of what happened
//! - Connection: Authorized link to an external platform

pub mod audit;
pub mod connection;
pub mod plan;
pub mod rollback;
pub mod run;
pub mod snapshot;

// Re-export commonly used types
pub use audit::{actions, Actor, AuditEvent, AuditResult};
pub use connection::{AuthLevel, Connection};
pub use plan::{
    AffectedResource, ExecutionMode, Plan, PlanStatus, RiskLevel, Rollbackability, Step,
    StepStatus,
};
pub use rollback::{Rollback, RollbackKind, RollbackResult, RollbackStatus};
pub use run::{ExecutionResult, Run, RunStatus, StepResult, StepResultStatus};
pub use snapshot::Snapshot;
