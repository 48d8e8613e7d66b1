//! plangate - Risk-gated plan execution with snapshots and rollback
//!
//! Executes approved, ordered plans against external platforms through
//! pluggable connectors.
//!
//! # Architecture
//!
//! - A live run captures a before-state snapshot, then executes steps in
//!   ascending order. Plans above LOW risk stop at the first failed step.
//! - Dry runs never snapshot and always attempt every step.
//! - Every action is recorded as an immutable audit event.
//! - A finished run can be rolled back to its snapshot.
//!
//! # Modules
//!
//! - `connectors`: Connector contract, registry, process and HTTP transports
//! - `core`: Orchestrator, snapshots, step runner, rollback, audit, engine
//! - `domain`: Data structures (Plan, Run, Snapshot, Rollback, AuditEvent)
//! - `store`: Persistence (in-memory and JSONL)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Store an approved plan and a connection
//! plangate plan import plan.yaml
//! GITHUB_TOKEN=... plangate connection add gh-main --provider github --token-env GITHUB_TOKEN
//!
//! # Simulate, then execute
//! plangate execute <plan-id> --connection gh-main --dry-run
//! plangate execute <plan-id> --connection gh-main
//!
//! # Undo a run
//! plangate rollback <run-id>
//! ```

pub mod cli;
pub mod config;
pub mod connectors;
pub mod core;
pub mod domain;
pub mod error;
pub mod store;

// Re-export main types at crate root for convenience
pub use connectors::{Connector, ConnectorRegistry};
pub use core::{Engine, ExecutionPolicy, Orchestrator, RollbackExecutor};
pub use domain::{ExecutionResult, Plan, RiskLevel, RollbackResult, Run, RunStatus};
pub use error::{EngineError, EngineResult};
pub use store::{JsonlStore, MemoryStore, Store};
