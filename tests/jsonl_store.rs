//! JSONL Store Integration Tests
//!
//! Tests for file persistence, replay after reopening, and the append-only
//! audit log.

mod common;

use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use common::{engine_with, plan, ScriptedConnector};
use plangate::core::{Engine, ExecutionPolicy};
use plangate::domain::{actions, PlanStatus, RiskLevel, RunStatus, StepStatus};
use plangate::store::{JsonlStore, Store};
use plangate::ConnectorRegistry;

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let plan = plan(RiskLevel::Med, &[("a", 1), ("b", 2)]);

    let run_id = {
        let store = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
        let engine = engine_with(store, Arc::new(ScriptedConnector::new()), &plan).await;
        engine
            .execute_plan(&plan, &common::connection(), false)
            .await
            .run_id
    };

    let store = JsonlStore::open(temp.path()).await.unwrap();

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.snapshot_id.is_some());

    let stored = store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PlanStatus::Executed);
    assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));

    let connection = store.get_connection("gh-main").await.unwrap().unwrap();
    assert_eq!(connection.access_token, "ghp_secret");

    assert_eq!(store.list_runs(plan.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rollback_against_reopened_store() {
    let temp = TempDir::new().unwrap();
    let plan = plan(RiskLevel::High, &[("a", 1)]);

    let run_id = {
        let store = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
        let engine = engine_with(store, Arc::new(ScriptedConnector::new()), &plan).await;
        engine
            .execute_plan(&plan, &common::connection(), false)
            .await
            .run_id
    };

    let store: Arc<dyn Store> = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
    let engine = Engine::new(
        ConnectorRegistry::new().with(Arc::new(ScriptedConnector::new())),
        store.clone(),
        ExecutionPolicy::default(),
    );

    let result = engine.execute_rollback(run_id, "system").await.unwrap();
    assert!(result.success);

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(store.list_rollbacks(run_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_audit_log_is_append_only() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
    let plan = plan(RiskLevel::Low, &[("a", 1), ("b", 2)]);
    let engine = engine_with(store.clone(), Arc::new(ScriptedConnector::new()), &plan).await;

    let first = engine.execute_plan(&plan, &common::connection(), true).await;
    let second = engine.execute_plan(&plan, &common::connection(), false).await;

    let all = store.list_audit(None).await.unwrap();
    let first_events = store.list_audit(Some(first.run_id)).await.unwrap();
    let second_events = store.list_audit(Some(second.run_id)).await.unwrap();

    // run.start + 2 x step.execute + plan.dry_run
    assert_eq!(first_events.len(), 4);
    // run.start + snapshot.create + 2 x step.execute + plan.execute
    assert_eq!(second_events.len(), 5);
    assert_eq!(all.len(), first_events.len() + second_events.len());
    assert_eq!(first_events.last().unwrap().action, actions::PLAN_DRY_RUN);
    assert_eq!(second_events.last().unwrap().action, actions::PLAN_EXECUTE);

    let lines = std::fs::read_to_string(temp.path().join("audit.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), all.len());
}

#[tokio::test]
async fn test_concurrent_updates_are_not_lost() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
    let plan = plan(
        RiskLevel::Low,
        &[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5), ("f", 6)],
    );
    store.create_plan(&plan).await.unwrap();

    let mut handles = Vec::new();
    for step in plan.steps.clone() {
        let store = store.clone();
        let plan_id = plan.id;
        handles.push(tokio::spawn(async move {
            store
                .update_step_status(plan_id, step.id, StepStatus::Completed)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = store.get_plan(plan.id).await.unwrap().unwrap();
    assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_unknown_ids_read_as_none() {
    let temp = TempDir::new().unwrap();
    let store = JsonlStore::open(temp.path().join("nested").join("state"))
        .await
        .unwrap();

    assert!(store.get_run(Uuid::new_v4()).await.unwrap().is_none());
    assert!(store.get_snapshot(Uuid::new_v4()).await.unwrap().is_none());
    assert!(store.get_rollback(Uuid::new_v4()).await.unwrap().is_none());
    assert!(store.get_connection("missing").await.unwrap().is_none());
    assert!(store.root().ends_with("nested/state"));
}

#[tokio::test]
async fn test_plans_listed_newest_first() {
    let temp = TempDir::new().unwrap();
    let older = plan(RiskLevel::Low, &[("a", 1)]);
    let mut newer = plan(RiskLevel::High, &[("b", 1)]);
    newer.created_at = older.created_at + chrono::Duration::seconds(5);

    let store = Arc::new(JsonlStore::open(temp.path()).await.unwrap());
    store.create_plan(&older).await.unwrap();
    let engine = engine_with(store, Arc::new(ScriptedConnector::new()), &newer).await;

    let ids: Vec<Uuid> = engine.plans().await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}
