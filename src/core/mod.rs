//! Core execution logic.
//!
//! This module contains:
//! - Orchestrator: Risk-gated step execution
//! - SnapshotCapturer: Before-state capture for live runs
//! - StepRunner: Single-step execution against a connector
//! - RollbackExecutor: Snapshot restoration
//! - AuditRecorder: Immutable audit events
//! - Engine: Facade owning the injected registry, store and policy

pub mod audit;
pub mod engine;
pub mod orchestrator;
pub mod policy;
pub mod rollback;
pub mod snapshot;
pub mod step_runner;
pub mod trace;

// Re-export commonly used types
pub use audit::AuditRecorder;
pub use engine::Engine;
pub use orchestrator::Orchestrator;
pub use policy::{should_abort, ExecutionPolicy};
pub use rollback::RollbackExecutor;
pub use snapshot::SnapshotCapturer;
pub use step_runner::{derive_step_input, StepRunner};
pub use trace::generate_trace_id;
