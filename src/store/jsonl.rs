//! Append-only store with file-based persistence.
//!
//! Each collection is a newline-delimited JSON (JSONL) file under the state
//! directory. Every create or update appends the full record; the current
//! state of an entity is the last record with its id. Audit events are
//! appended once and never rewritten.
//!
//! Appends take an exclusive file lock so that several processes sharing a
//! state directory never interleave partial lines.

use std::collections::HashMap;
use std::fs::OpenOptions as StdOpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{set_step_status, PlanUpdate, RollbackUpdate, RunUpdate, Store};
use crate::domain::{AuditEvent, Connection, Plan, Rollback, Run, Snapshot, StepStatus};

/// Files making up the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Plans,
    Connections,
    Runs,
    Snapshots,
    Rollbacks,
    Audit,
}

impl Collection {
    fn file_name(&self) -> &'static str {
        match self {
            Collection::Plans => "plans.jsonl",
            Collection::Connections => "connections.jsonl",
            Collection::Runs => "runs.jsonl",
            Collection::Snapshots => "snapshots.jsonl",
            Collection::Rollbacks => "rollbacks.jsonl",
            Collection::Audit => "audit.jsonl",
        }
    }
}

/// One line in a collection file
#[derive(Debug, Serialize, Deserialize)]
struct Record<T> {
    ts: DateTime<Utc>,
    id: String,
    body: T,
}

/// File-based store using JSONL format
pub struct JsonlStore {
    /// Directory holding the collection files
    root: PathBuf,

    /// Serializes read-modify-write updates within this process
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Create or open a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create state directory: {}", root.display()))?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Open the store in the configured state directory ($PLANGATE_HOME/state)
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::state_dir()?).await
    }

    /// Get the state directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.file_name())
    }

    /// Append a record to a collection
    async fn append<T: Serialize>(&self, collection: Collection, id: &str, body: &T) -> Result<()> {
        let record = Record {
            ts: Utc::now(),
            id: id.to_string(),
            body,
        };
        let line = serde_json::to_string(&record).context("Failed to serialize record")?;
        let path = self.path(collection);

        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .context("Append task panicked")?
    }

    /// Replay all records of a collection in order
    async fn replay<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<Record<T>>> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open store file: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record<T> = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse record in {}", path.display()))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Current state of every entity, in first-seen order
    async fn latest<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>> {
        let mut order = Vec::new();
        let mut current: HashMap<String, T> = HashMap::new();

        for record in self.replay::<T>(collection).await? {
            if !current.contains_key(&record.id) {
                order.push(record.id.clone());
            }
            current.insert(record.id, record.body);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| current.remove(&id))
            .collect())
    }

    /// Current state of one entity
    async fn find<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<Option<T>> {
        let found = self
            .replay::<T>(collection)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.id == id)
            .map(|r| r.body);
        Ok(found)
    }

    /// Load an entity, change it and append the new version
    async fn modify<T, F>(&self, collection: Collection, id: &str, change: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;

        let mut entity: T = self
            .find(collection, id)
            .await?
            .with_context(|| format!("{} not found in {}", id, collection.file_name()))?;
        change(&mut entity)?;
        self.append(collection, id, &entity).await
    }

    async fn put<T: Serialize>(&self, collection: Collection, id: &str, body: &T) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append(collection, id, body).await
    }
}

/// Append one line with an exclusive file lock
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = StdOpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open store file: {}", path.display()))?;

    file.lock_exclusive()
        .with_context(|| format!("Failed to acquire file lock on {}", path.display()))?;

    writeln!(file, "{}", line).context("Failed to write record")?;
    file.flush().context("Failed to flush record")?;

    // Lock is released when file is dropped
    Ok(())
}

#[async_trait]
impl Store for JsonlStore {
    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        self.put(Collection::Plans, &plan.id.to_string(), plan).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        self.find(Collection::Plans, &plan_id.to_string()).await
    }

    async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> Result<()> {
        self.modify(Collection::Plans, &plan_id.to_string(), |plan: &mut Plan| {
            update.apply(plan);
            Ok(())
        })
        .await
    }

    async fn update_step_status(
        &self,
        plan_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
    ) -> Result<()> {
        self.modify(Collection::Plans, &plan_id.to_string(), |plan: &mut Plan| {
            set_step_status(plan, step_id, status)
        })
        .await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.latest(Collection::Plans).await?;
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn create_connection(&self, connection: &Connection) -> Result<()> {
        self.put(Collection::Connections, &connection.id, connection)
            .await
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        self.find(Collection::Connections, connection_id).await
    }

    async fn create_run(&self, run: &Run) -> Result<()> {
        self.put(Collection::Runs, &run.id.to_string(), run).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        self.find(Collection::Runs, &run_id.to_string()).await
    }

    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> Result<()> {
        self.modify(Collection::Runs, &run_id.to_string(), |run: &mut Run| {
            update.apply(run);
            Ok(())
        })
        .await
    }

    async fn list_runs(&self, plan_id: Uuid) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .latest::<Run>(Collection::Runs)
            .await?
            .into_iter()
            .filter(|r| r.plan_id == plan_id)
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.put(Collection::Snapshots, &snapshot.id.to_string(), snapshot)
            .await
    }

    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        self.find(Collection::Snapshots, &snapshot_id.to_string())
            .await
    }

    async fn attach_after_state(
        &self,
        snapshot_id: Uuid,
        after_state: serde_json::Value,
    ) -> Result<()> {
        self.modify(
            Collection::Snapshots,
            &snapshot_id.to_string(),
            |snapshot: &mut Snapshot| {
                snapshot.after_state = Some(after_state);
                Ok(())
            },
        )
        .await
    }

    async fn create_rollback(&self, rollback: &Rollback) -> Result<()> {
        self.put(Collection::Rollbacks, &rollback.id.to_string(), rollback)
            .await
    }

    async fn get_rollback(&self, rollback_id: Uuid) -> Result<Option<Rollback>> {
        self.find(Collection::Rollbacks, &rollback_id.to_string())
            .await
    }

    async fn update_rollback(&self, rollback_id: Uuid, update: RollbackUpdate) -> Result<()> {
        self.modify(
            Collection::Rollbacks,
            &rollback_id.to_string(),
            |rollback: &mut Rollback| {
                update.apply(rollback);
                Ok(())
            },
        )
        .await
    }

    async fn list_rollbacks(&self, run_id: Uuid) -> Result<Vec<Rollback>> {
        let mut rollbacks: Vec<Rollback> = self
            .latest::<Rollback>(Collection::Rollbacks)
            .await?
            .into_iter()
            .filter(|r| r.run_id == run_id)
            .collect();
        rollbacks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rollbacks)
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        self.put(Collection::Audit, &event.id.to_string(), event)
            .await
    }

    async fn list_audit(&self, run_id: Option<Uuid>) -> Result<Vec<AuditEvent>> {
        Ok(self
            .replay::<AuditEvent>(Collection::Audit)
            .await?
            .into_iter()
            .map(|r| r.body)
            .filter(|e| run_id.is_none() || e.run_id == run_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskLevel, RunStatus, Step};
    use tempfile::TempDir;

    async fn create_test_store() -> (JsonlStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlStore::open(temp_dir.path().join("state")).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_update_appends_new_version() {
        let (store, _temp) = create_test_store().await;
        let plan = Plan::new("p", RiskLevel::Med);
        let run = Run::start(Uuid::new_v4(), &plan, "c1", "trace", false);
        store.create_run(&run).await.unwrap();

        store
            .update_run(run.id, RunUpdate::status(RunStatus::Completed))
            .await
            .unwrap();

        let loaded = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);

        // Two lines: the create and the update
        let content = std::fs::read_to_string(store.root().join("runs.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_latest_keeps_first_seen_order() {
        let (store, _temp) = create_test_store().await;
        let first = Plan::new("first", RiskLevel::Low).with_step(Step::new("a", 1));
        let second = Plan::new("second", RiskLevel::Low);
        store.create_plan(&first).await.unwrap();
        store.create_plan(&second).await.unwrap();
        store
            .update_step_status(first.id, first.steps[0].id, StepStatus::Completed)
            .await
            .unwrap();

        let plans: Vec<Plan> = store.latest(Collection::Plans).await.unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].title, "first");
        assert_eq!(plans[0].steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let (store, _temp) = create_test_store().await;

        assert!(store.list_audit(None).await.unwrap().is_empty());
        assert!(store.get_plan(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_modify_missing_entity_fails() {
        let (store, _temp) = create_test_store().await;
        let err = store
            .attach_after_state(Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not found in snapshots.jsonl"));
    }
}
