//! Command-line interface for plangate.
//!
//! Provides commands for importing plans, registering connections,
//! executing and rolling back plans, and inspecting runs and the audit log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config;
use crate::core::Engine;
use crate::domain::{AuditResult, AuthLevel, Connection, Plan, Run};
use crate::store::{JsonlStore, Store};

/// plangate - Risk-gated plan execution with snapshots and rollback
#[derive(Parser, Debug)]
#[command(name = "plangate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Manage connections
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },

    /// Execute a stored plan
    Execute {
        /// Plan ID (UUID)
        plan_id: String,

        /// Connection to execute against
        #[arg(short, long)]
        connection: String,

        /// Simulate without changing external state
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back a run to its snapshot
    Rollback {
        /// Run ID (UUID)
        run_id: String,

        /// Who triggered the rollback
        #[arg(long, default_value = "system", env = "USER")]
        by: String,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List runs of a plan
    Runs {
        /// Plan ID (UUID)
        plan_id: String,
    },

    /// Show audit events
    Audit {
        /// Only events of this run
        #[arg(short, long)]
        run: Option<String>,
    },

    /// Ask a connection's connector what it can do
    Capabilities {
        /// Connection ID
        #[arg(short, long)]
        connection: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// Import an approved plan from a YAML file
    Import {
        /// Path to the plan file
        file: PathBuf,
    },

    /// List stored plans
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConnectionCommands {
    /// Register a connection to a provider
    Add {
        /// Connection ID
        id: String,

        /// Provider id (must have a configured connector)
        #[arg(short, long)]
        provider: String,

        /// Environment variable holding the access token
        #[arg(long)]
        token_env: Option<String>,

        /// Granted authorization level
        #[arg(long, default_value = "read_write")]
        auth_level: AuthLevel,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Plan {
                command: PlanCommands::Import { file },
            } => import_plan(&file).await,
            Commands::Plan {
                command: PlanCommands::List,
            } => list_plans().await,
            Commands::Connection {
                command:
                    ConnectionCommands::Add {
                        id,
                        provider,
                        token_env,
                        auth_level,
                    },
            } => add_connection(&id, &provider, token_env.as_deref(), auth_level).await,
            Commands::Execute {
                plan_id,
                connection,
                dry_run,
            } => execute_plan(&plan_id, &connection, dry_run).await,
            Commands::Rollback { run_id, by } => rollback_run(&run_id, &by).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { plan_id } => list_runs(&plan_id).await,
            Commands::Audit { run } => show_audit(run.as_deref()).await,
            Commands::Capabilities { connection } => show_capabilities(&connection).await,
            Commands::Config => show_config().await,
        }
    }
}

/// List stored plans
async fn list_plans() -> Result<()> {
    let plans = engine().await?.plans().await?;

    if plans.is_empty() {
        println!("No plans found");
        return Ok(());
    }

    println!("{:<38} {:<18} {:<5} {:<6} {}", "PLAN ID", "STATUS", "RISK", "STEPS", "TITLE");
    println!("{}", "-".repeat(90));

    for plan in plans {
        println!(
            "{:<38} {:<18} {:<5} {:<6} {}",
            plan.id,
            format!("{:?}", plan.status),
            plan.risk_level.to_string(),
            plan.steps.len(),
            plan.title
        );
    }

    Ok(())
}

/// Build an engine over the configured connectors and the JSONL store
async fn engine() -> Result<Engine> {
    let cfg = config::config()?;
    let store = JsonlStore::open_default().await?;

    Ok(Engine::new(
        cfg.registry(),
        Arc::new(store),
        cfg.execution.clone(),
    ))
}

fn parse_id(kind: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID: {}", kind, value))
}

/// Store a plan authored upstream
async fn import_plan(path: &Path) -> Result<()> {
    let plan = Plan::from_file(path)?;
    plan.validate()?;

    let store = JsonlStore::open_default().await?;
    store.create_plan(&plan).await?;

    println!("Imported plan {}", plan.id);
    println!("  Title: {}", plan.title);
    println!("  Risk:  {}", plan.risk_level);
    println!("  Steps: {}", plan.steps.len());

    Ok(())
}

/// Register a connection
async fn add_connection(
    id: &str,
    provider: &str,
    token_env: Option<&str>,
    auth_level: AuthLevel,
) -> Result<()> {
    let token = match token_env {
        Some(var) => std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var))?,
        None => String::new(),
    };

    let store = JsonlStore::open_default().await?;
    store
        .create_connection(&Connection::new(id, provider, auth_level, token))
        .await?;

    println!("Added connection {} ({})", id, provider);
    Ok(())
}

/// Execute a stored plan
async fn execute_plan(plan_id: &str, connection_id: &str, dry_run: bool) -> Result<()> {
    let plan_id = parse_id("plan", plan_id)?;
    let engine = engine().await?;

    let result = engine
        .execute_stored_plan(plan_id, connection_id, dry_run)
        .await?;

    for step in &result.step_results {
        match &step.error {
            None => println!("  ok    {} ({}ms)", step.action_id, step.duration_ms),
            Some(error) => println!("  FAIL  {}: {}", step.action_id, error),
        }
    }
    if let Some(snapshot_id) = result.snapshot_id {
        println!("Snapshot: {}", snapshot_id);
    }

    match result.ensure_success() {
        Ok(()) => {
            eprintln!("\n[Run {} completed successfully]", result.run_id);
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[Run {} failed: {}]", result.run_id, e);
            std::process::exit(1);
        }
    }
}

/// Roll back a run
async fn rollback_run(run_id: &str, triggered_by: &str) -> Result<()> {
    let run_id = parse_id("run", run_id)?;
    let engine = engine().await?;

    let result = engine.execute_rollback(run_id, triggered_by).await?;
    if result.success {
        eprintln!("[Rollback {} completed]", result.rollback_id);
        Ok(())
    } else {
        eprintln!(
            "[Rollback {} failed: {}]",
            result.rollback_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

/// Show the status of a run
async fn show_status(run_id: &str) -> Result<()> {
    let run_id = parse_id("run", run_id)?;
    let run = engine().await?.run_status(run_id).await?;

    println!("Run ID: {}", run.id);
    println!("Plan: {}", run.plan_id);
    println!("Connection: {}", run.connection_id);
    println!("Status: {:?}", run.status);
    println!("Risk: {}", run.risk_level);
    println!("Dry run: {}", run.dry_run);
    println!("Trace: {}", run.trace_id);
    println!("Started: {}", run.started_at);
    if let Some(ended) = run.ended_at {
        println!("Ended: {}", ended);
    }
    if let Some(snapshot_id) = run.snapshot_id {
        println!("Snapshot: {}", snapshot_id);
    }
    if let Some(error) = &run.error {
        println!("Error: {}", error);
    }

    Ok(())
}

/// List runs of a plan
async fn list_runs(plan_id: &str) -> Result<()> {
    let plan_id = parse_id("plan", plan_id)?;
    let runs = engine().await?.runs_for_plan(plan_id).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<6} {:<25}", "RUN ID", "STATUS", "DRY", "STARTED");
    println!("{}", "-".repeat(83));

    for run in runs {
        println!(
            "{:<38} {:<12} {:<6} {:<25}",
            run.id,
            status_label(&run),
            run.dry_run,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn status_label(run: &Run) -> String {
    serde_json::to_value(run.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", run.status))
}

/// Show audit events in append order
async fn show_audit(run_id: Option<&str>) -> Result<()> {
    let run_id = run_id.map(|id| parse_id("run", id)).transpose()?;
    let events = engine().await?.audit_trail(run_id).await?;

    if events.is_empty() {
        println!("No audit events found");
        return Ok(());
    }

    for event in events {
        let marker = match event.result {
            AuditResult::Success => "ok",
            AuditResult::Failure => "FAIL",
            AuditResult::Error => "ERR",
        };
        println!(
            "{}  {:<4}  {:<20} {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            marker,
            event.action,
            event.actor,
            event.target
        );
    }

    Ok(())
}

/// Show connector capabilities for a connection
async fn show_capabilities(connection_id: &str) -> Result<()> {
    let capabilities = engine().await?.capabilities(connection_id).await?;

    println!("Connection: {}", connection_id);
    println!("Actions:");
    for action in &capabilities.actions {
        let kind = if action.mutating { "write" } else { "read" };
        println!("  {:<30} {:<6} {}", action.id, kind, action.description);
    }
    if !capabilities.missing_scopes.is_empty() {
        println!("Missing scopes: {}", capabilities.missing_scopes.join(", "));
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  State: {}", cfg.state_dir().display());
    println!();
    println!("Execution:");
    println!("  Default branch: {}", cfg.execution.default_branch);
    match cfg.execution.step_timeout_seconds {
        Some(secs) => println!("  Step timeout:   {}s", secs),
        None => println!("  Step timeout:   (none)"),
    }
    println!();
    println!("Connectors:");
    if cfg.connectors.is_empty() {
        println!("  (none configured)");
    } else {
        for provider in cfg.registry().providers() {
            println!("  {}", provider);
        }
    }

    Ok(())
}
