//! Plans and their steps.
//!
//! A Plan is authored upstream and handed to the engine already approved.
//! The engine only mutates step statuses, the plan status and the dry-run
//! result; it never adds, removes or reorders steps.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An approved, ordered set of privileged actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier for this plan
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Short human-readable title
    pub title: String,

    /// Declared risk of executing this plan
    pub risk_level: RiskLevel,

    /// How the plan may be executed
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// How much of the plan can be undone
    #[serde(default)]
    pub rollbackability: Rollbackability,

    /// Current lifecycle status
    #[serde(default)]
    pub status: PlanStatus,

    /// Steps to execute, ordered by `order` (stored order is not trusted)
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Resources this plan will touch
    #[serde(default)]
    pub affected_resources: Vec<AffectedResource>,

    /// Result of the most recent dry run (step results plus trace id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_result: Option<serde_json::Value>,

    /// When the plan was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create an empty plan with the given title and risk
    pub fn new(title: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            risk_level,
            execution_mode: ExecutionMode::default(),
            rollbackability: Rollbackability::default(),
            status: PlanStatus::default(),
            steps: Vec::new(),
            affected_resources: Vec::new(),
            dry_run_result: None,
            created_at: Utc::now(),
        }
    }

    /// Append a step (builder style)
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append an affected resource (builder style)
    pub fn with_resource(mut self, resource: AffectedResource) -> Self {
        self.affected_resources.push(resource);
        self
    }

    /// Load a plan from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a plan from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plan YAML")
    }

    /// Validate the plan definition
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            anyhow::bail!("Plan title cannot be empty");
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        if let Some(pair) = orders.windows(2).find(|w| w[0] == w[1]) {
            anyhow::bail!("Duplicate step order {} in plan '{}'", pair[0], self.title);
        }

        for step in &self.steps {
            if step.action_id.trim().is_empty() {
                anyhow::bail!("Step {} has an empty action id", step.order);
            }
        }

        Ok(())
    }

    /// Steps sorted ascending by `order`
    pub fn ordered_steps(&self) -> Vec<Step> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Get a step by id
    pub fn step(&self, step_id: Uuid) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Comma-joined resource names, used as the snapshot target
    pub fn resource_names(&self) -> String {
        self.affected_resources
            .iter()
            .map(|r| r.resource.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A single privileged action inside a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier for this step
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Connector action to invoke (e.g. "github.create_branch")
    pub action_id: String,

    /// What this step does, for humans
    #[serde(default)]
    pub description: String,

    /// Execution order, unique within the plan
    pub order: u32,

    /// Current status
    #[serde(default)]
    pub status: StepStatus,

    /// Extra input merged over the input derived from the plan's resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

impl Step {
    /// Create a pending step
    pub fn new(action_id: impl Into<String>, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_id: action_id.into(),
            description: String::new(),
            order,
            status: StepStatus::Pending,
            input: None,
        }
    }

    /// Set the description (builder style)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set explicit step input (builder style)
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// A resource a plan declares it will touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedResource {
    /// Platform identifier (e.g. "github")
    pub platform: String,

    /// Organization or owner
    pub organization: String,

    /// Project within the organization (optional on most platforms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Resource name (e.g. repository)
    pub resource: String,
}

impl AffectedResource {
    pub fn new(
        platform: impl Into<String>,
        organization: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            organization: organization.into(),
            project: None,
            resource: resource.into(),
        }
    }
}

/// Declared risk level of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Med => "MED",
            RiskLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// How a plan may be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Execute live without further confirmation
    Auto,

    /// Simulate only
    PlanOnly,

    /// Read-only actions
    ReadOnly,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// How much of a plan's effect can be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rollbackability {
    Yes,
    Partial,
    No,
}

impl Default for Rollbackability {
    fn default() -> Self {
        Self::Partial
    }
}

/// Lifecycle status of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Authored, awaiting approval
    Draft,

    /// Approved for execution
    Approved,

    /// A dry run finished
    DryRunCompleted,

    /// A live execution finished successfully
    Executed,

    /// The last execution failed
    Failed,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Approved
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet attempted
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_yaml_parsing() {
        let yaml = r#"
title: Protect main branch
risk_level: HIGH
execution_mode: AUTO
rollbackability: YES
affected_resources:
  - platform: github
    organization: acme
    resource: api
steps:
  - action_id: github.set_branch_protection
    description: Require reviews on main
    order: 2
  - action_id: github.read_branch
    order: 1
"#;

        let plan = Plan::from_yaml(yaml).unwrap();
        assert_eq!(plan.risk_level, RiskLevel::High);
        assert_eq!(plan.rollbackability, Rollbackability::Yes);
        assert_eq!(plan.status, PlanStatus::Approved);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
        plan.validate().unwrap();
    }

    #[test]
    fn test_ordered_steps_sorts_by_order() {
        let plan = Plan::new("reorder", RiskLevel::Low)
            .with_step(Step::new("a", 2))
            .with_step(Step::new("b", 1))
            .with_step(Step::new("c", 3));

        let order: Vec<String> = plan
            .ordered_steps()
            .into_iter()
            .map(|s| s.action_id)
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_validate_rejects_duplicate_order() {
        let plan = Plan::new("dupes", RiskLevel::Med)
            .with_step(Step::new("a", 1))
            .with_step(Step::new("b", 1));

        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate step order 1"));
    }

    #[test]
    fn test_resource_names() {
        let plan = Plan::new("names", RiskLevel::Low)
            .with_resource(AffectedResource::new("github", "acme", "api"))
            .with_resource(AffectedResource::new("github", "acme", "web"));

        assert_eq!(plan.resource_names(), "api,web");
    }

    #[test]
    fn test_risk_level_serialization() {
        assert_eq!(serde_json::to_string(&RiskLevel::Med).unwrap(), "\"MED\"");
        assert_eq!(
            serde_json::to_string(&ExecutionMode::PlanOnly).unwrap(),
            "\"PLAN_ONLY\""
        );
        assert_eq!(
            serde_json::to_string(&PlanStatus::DryRunCompleted).unwrap(),
            "\"dry_run_completed\""
        );
    }
}
