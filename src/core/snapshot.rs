//! Snapshot capturer.
//!
//! Captures the before-state of a live run: the plan id, the plan's affected
//! resources and the capture time. The snapshot is scoped to the
//! connection's provider and targets the comma-joined resource names.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{Connection, Plan, Snapshot};
use crate::store::Store;

/// Captures and persists before-state snapshots
#[derive(Clone)]
pub struct SnapshotCapturer {
    store: Arc<dyn Store>,
}

impl SnapshotCapturer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Capture and persist the before-state for a run
    #[instrument(skip(self, connection, plan), fields(plan_id = %plan.id))]
    pub async fn take_snapshot(
        &self,
        run_id: Uuid,
        connection: &Connection,
        plan: &Plan,
    ) -> Result<Snapshot> {
        let before_state = json!({
            "captured_at": Utc::now().to_rfc3339(),
            "plan_id": plan.id,
            "resources": plan.affected_resources,
        });

        let snapshot = Snapshot::new(
            run_id,
            connection.id.clone(),
            connection.provider.clone(),
            plan.resource_names(),
            before_state,
        );

        self.store
            .create_snapshot(&snapshot)
            .await
            .context("Failed to persist snapshot")?;

        debug!(snapshot_id = %snapshot.id, checksum = %snapshot.checksum, "Snapshot captured");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AffectedResource, AuthLevel, RiskLevel};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_snapshot_scope_and_target() {
        let store = Arc::new(MemoryStore::new());
        let capturer = SnapshotCapturer::new(store.clone());
        let plan = Plan::new("snap", RiskLevel::High)
            .with_resource(AffectedResource::new("github", "acme", "api"))
            .with_resource(AffectedResource::new("github", "acme", "web"));
        let connection = Connection::new("c1", "github", AuthLevel::Admin, "t");
        let run_id = Uuid::new_v4();

        let snapshot = capturer.take_snapshot(run_id, &connection, &plan).await.unwrap();

        assert_eq!(snapshot.scope, "github");
        assert_eq!(snapshot.target, "api,web");
        assert_eq!(snapshot.run_id, run_id);
        assert_eq!(snapshot.before_state["plan_id"], plan.id.to_string());
        assert_eq!(snapshot.before_state["resources"][1]["resource"], "web");

        let stored = store.get_snapshot(snapshot.id).await.unwrap().unwrap();
        assert!(stored.verify());
    }
}
