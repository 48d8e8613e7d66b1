//! Execution policy and the abort rule.
//!
//! A live run of a plan whose risk is above LOW stops at its first failed
//! step. Dry runs and LOW-risk live runs attempt every step.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RiskLevel;

/// Tunables for plan execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Branch used when deriving step input (default: "main")
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Per-step timeout in seconds (default: none, a step may block forever)
    #[serde(default)]
    pub step_timeout_seconds: Option<u64>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            step_timeout_seconds: None,
        }
    }
}

impl ExecutionPolicy {
    /// Per-step timeout, if configured
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_seconds.map(Duration::from_secs)
    }
}

/// Whether a failed step halts the remaining steps
pub fn should_abort(dry_run: bool, risk_level: RiskLevel) -> bool {
    !dry_run && risk_level != RiskLevel::Low
}
