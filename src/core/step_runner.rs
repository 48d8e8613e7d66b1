//! Step runner.
//!
//! Executes one step against a connector and folds whatever happens into a
//! terminal `StepResult`. Connector errors and timeouts become failed
//! results; nothing escapes as an error.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::connectors::{ActionContext, ActionRequest, Connector};
use crate::domain::{Plan, Step, StepResult};

/// Runs single steps
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    /// Per-step timeout; `None` waits for the connector indefinitely
    timeout: Option<Duration>,
}

impl StepRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Execute a step and return its terminal result
    pub async fn run(
        &self,
        connector: &dyn Connector,
        step: &Step,
        input: Value,
        context: ActionContext,
        dry_run: bool,
    ) -> StepResult {
        let started = Instant::now();
        let request = ActionRequest {
            context,
            input,
            dry_run,
        };

        let call = connector.execute_action(&step.action_id, request);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("step timed out after {:?}", limit)),
            },
            None => call.await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                if let Some(reason) = &outcome.degrade_reason {
                    warn!(action = %step.action_id, %reason, "Connector degraded execution");
                }
                debug!(action = %step.action_id, duration_ms, "Step completed");
                StepResult::completed(step.id, &step.action_id, outcome.output, outcome.evidence)
                    .with_duration(duration_ms)
            }
            Err(e) => {
                // {:#} keeps the anyhow context chain in one line
                let message = format!("{:#}", e);
                warn!(action = %step.action_id, error = %message, "Step failed");
                StepResult::failed(step.id, &step.action_id, message).with_duration(duration_ms)
            }
        }
    }
}

/// Derive connector input for a step.
///
/// The base input comes from the plan's first affected resource, with the
/// configured default branch. Keys of the step's own `input` object, if any,
/// override the base.
pub fn derive_step_input(plan: &Plan, step: &Step, default_branch: &str) -> Value {
    let mut input = match plan.affected_resources.first() {
        Some(resource) => json!({
            "organization": resource.organization,
            "project": resource.project,
            "repository": resource.resource,
            "branch": default_branch,
        }),
        None => json!({ "branch": default_branch }),
    };

    if let (Some(Value::Object(overrides)), Value::Object(base)) = (&step.input, &mut input) {
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
    }

    input
}
