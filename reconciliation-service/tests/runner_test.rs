//! Worker pool tests: cancellation, the soft time limit, queue pressure,
//! startup recovery and commit races.

mod common;

use axum::http::StatusCode;
use common::gated_similarity::GatedSimilarity;
use common::slow_store::SlowHistoryStore;
use common::{spawn_app, spawn_app_scoring_with, spawn_app_with, USER_ID};
use reconciliation_service::config::{ReconciliationConfig, WorkerConfig};
use reconciliation_service::models::{ReconciliationTask, TaskStatus};
use reconciliation_service::services::{CommitAnnotations, MemoryStore, ReconStore};
use reconciliation_service::workers::recover_tasks;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_until_running(app: &common::TestApp, task_id: Uuid) {
    for _ in 0..200 {
        let (_, task) = app
            .get(&format!("/reconciliation/tasks/{}", task_id))
            .await;
        if task["status"] == "running" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never started", task_id);
}

#[tokio::test]
async fn cancelled_task_commits_no_auto_matches() {
    let store = Arc::new(SlowHistoryStore::new(Duration::from_millis(400)));
    let app = spawn_app_with(ReconciliationConfig::for_memory(), store, true).await;
    app.import_bank(&[(10_000, "2024-01-10", "ACME")]).await;
    app.import_book(&[(10_000, "2024-01-10", "ACME")]).await;

    let task_id = app
        .execute(json!({
            "auto_match_100": true,
            "max_group_size_bank": 1,
            "max_group_size_book": 1,
        }))
        .await;
    wait_until_running(&app, task_id).await;

    let (status, body) = app
        .post(&format!("/reconciliation/{}/cancel", task_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // Give the worker time to get past the stalled load and observe the signal.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let task = app.wait_for_task(task_id).await;
    assert_eq!(task["status"], "cancelled");
    assert!(task["summary"].is_null());

    let (_, matches) = app.get("/matches").await;
    assert_eq!(matches["count"], 0);

    let (status, _) = app
        .get(&format!("/reconciliation/tasks/{}/suggestions", task_id))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cancel_between_batches_stops_enumeration() {
    let config = ReconciliationConfig {
        worker: WorkerConfig {
            batch_size: 1,
            ..WorkerConfig::default()
        },
        ..ReconciliationConfig::for_memory()
    };
    let similarity = Arc::new(GatedSimilarity::new("FIRST"));
    let app = spawn_app_scoring_with(
        config,
        Arc::new(MemoryStore::new()),
        similarity.clone(),
        true,
    )
    .await;

    let mut bank_rows = vec![(1_000, "2024-01-10", "FIRST PAYMENT".to_string())];
    bank_rows.extend((1..12).map(|i| (1_000 + i, "2024-01-10", format!("PAYMENT {}", i))));
    let rows: Vec<(i64, &str, &str)> = bank_rows
        .iter()
        .map(|(amount, date, description)| (*amount, *date, description.as_str()))
        .collect();
    let bank_ids = app.import_bank(&rows).await;
    app.import_book(&rows).await;

    let task_id = app
        .execute(json!({
            "bank_ids": bank_ids,
            "auto_match_100": true,
            "max_group_size_bank": 1,
            "max_group_size_book": 1,
        }))
        .await;

    // The marked first target clears its batch; the rest wait on the gate.
    let mut processed = 0;
    for _ in 0..200 {
        let (_, task) = app
            .get(&format!("/reconciliation/tasks/{}", task_id))
            .await;
        processed = task["progress"]["targets_processed"].as_u64().unwrap_or(0);
        if processed >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(processed, 1);

    let (status, _) = app
        .post(&format!("/reconciliation/{}/cancel", task_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    similarity.open();

    // Let the parked batches drain so the worker reaches the next boundary.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let task = app.wait_for_task(task_id).await;
    assert_eq!(task["status"], "cancelled");
    assert_eq!(task["progress"]["targets_total"], 12);
    assert!(task["progress"]["targets_processed"].as_u64().unwrap() < 12);

    let (_, matches) = app.get("/matches").await;
    assert_eq!(matches["count"], 0);
    let (_, open) = app.get("/bank-transactions?state=unmatched").await;
    assert_eq!(open.as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn evicted_task_results_are_not_found() {
    let config = ReconciliationConfig {
        worker: WorkerConfig {
            result_retention_per_tenant: 1,
            ..WorkerConfig::default()
        },
        ..ReconciliationConfig::for_memory()
    };
    let app = spawn_app_with(config, Arc::new(MemoryStore::new()), true).await;
    app.import_bank(&[(10_000, "2024-01-10", "ACME")]).await;
    app.import_book(&[(10_000, "2024-01-10", "ACME")]).await;

    let first = app.execute(json!({})).await;
    assert_eq!(app.wait_for_task(first).await["status"], "succeeded");
    let (status, _) = app
        .get(&format!("/reconciliation/tasks/{}/suggestions", first))
        .await;
    assert_eq!(status, StatusCode::OK);

    let second = app.execute(json!({})).await;
    assert_eq!(app.wait_for_task(second).await["status"], "succeeded");

    let (status, _) = app
        .get(&format!("/reconciliation/tasks/{}/suggestions", first))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = app
        .get(&format!("/reconciliation/tasks/{}/suggestions", second))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_suggestions"], 1);
}

#[tokio::test]
async fn soft_time_limit_fails_the_task() {
    let store = Arc::new(SlowHistoryStore::new(Duration::from_secs(3)));
    let app = spawn_app_with(ReconciliationConfig::for_memory(), store, true).await;
    app.import_bank(&[(10_000, "2024-01-10", "ACME")]).await;

    let task_id = app
        .execute(json!({ "soft_time_limit_seconds": 1 }))
        .await;

    let mut task = json!(null);
    for _ in 0..100 {
        let (_, current) = app
            .get(&format!("/reconciliation/tasks/{}", task_id))
            .await;
        task = current;
        if task["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(task["status"], "failed");
    assert_eq!(task["error_message"], "timed out after 1 seconds");
    assert!(task["finished_at"].is_string());
}

#[tokio::test]
async fn full_queue_rejects_and_fails_the_task() {
    let config = ReconciliationConfig {
        worker: WorkerConfig {
            queue_size: 1,
            ..WorkerConfig::default()
        },
        ..ReconciliationConfig::for_memory()
    };
    let app = spawn_app_with(config, Arc::new(MemoryStore::new()), false).await;

    let queued = app.execute(json!({})).await;

    let (status, _) = app.post("/reconciliation/execute", json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, failed) = app.get("/reconciliation/tasks?status=failed").await;
    assert_eq!(failed["count"], 1);
    assert_eq!(failed["tasks"][0]["error_message"], "job queue full");

    let (_, task) = app
        .get(&format!("/reconciliation/tasks/{}", queued))
        .await;
    assert_eq!(task["status"], "pending");

    // Suggestions exist only once a task has succeeded.
    let (status, _) = app
        .get(&format!("/reconciliation/tasks/{}/suggestions", queued))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn pending_task_can_be_cancelled_before_it_runs() {
    let mut app = spawn_app_with(
        ReconciliationConfig::for_memory(),
        Arc::new(MemoryStore::new()),
        false,
    )
    .await;
    let task_id = app.execute(json!({})).await;

    let (status, _) = app
        .post(&format!("/reconciliation/{}/cancel", task_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    app.start_workers();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, task) = app
        .get(&format!("/reconciliation/tasks/{}", task_id))
        .await;
    assert_eq!(task["status"], "cancelled");
    assert!(task["started_at"].is_null());
}

#[tokio::test]
async fn recovery_fails_running_and_requeues_pending_tasks() {
    let mut app = spawn_app_with(
        ReconciliationConfig::for_memory(),
        Arc::new(MemoryStore::new()),
        false,
    )
    .await;
    app.import_bank(&[(1_000, "2024-01-10", "A")]).await;

    let submitted = app.execute(json!({})).await;
    let template = app.state.tasks.get(app.tenant_id, submitted).await.unwrap();
    let store = app.state.store.clone();

    // Tasks a previous process left behind: one mid-run, one never queued.
    let orphan = ReconciliationTask {
        id: Uuid::new_v4(),
        ..template.clone()
    };
    store.create_task(orphan.clone()).await.unwrap();
    store
        .transition_task(
            orphan.tenant_id,
            orphan.id,
            TaskStatus::Running,
            Default::default(),
        )
        .await
        .unwrap();
    let lost = ReconciliationTask {
        id: Uuid::new_v4(),
        ..template
    };
    store.create_task(lost.clone()).await.unwrap();

    recover_tasks(store.as_ref(), &app.state.tasks.queue(), &app.registry)
        .await
        .unwrap();
    app.start_workers();

    let orphan = store.get_task(orphan.tenant_id, orphan.id).await.unwrap();
    assert_eq!(orphan.status, TaskStatus::Failed);
    assert_eq!(
        orphan.error_message.as_deref(),
        Some("interrupted by service restart")
    );

    assert_eq!(app.wait_for_task(lost.id).await["status"], "succeeded");
    assert_eq!(app.wait_for_task(submitted).await["status"], "succeeded");
}

#[tokio::test]
async fn concurrent_commits_of_one_payload_succeed_once() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(10_000, "2024-01-10", "A")]).await;
    let book = app.import_book(&[(10_000, "2024-01-10", "A")]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let matches = app.state.matches.clone();
        let tenant_id = app.tenant_id;
        let groups = vec![(bank.clone(), book.clone())];
        handles.push(tokio::spawn(async move {
            matches
                .commit_manual(tenant_id, USER_ID, groups, CommitAnnotations::default())
                .await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(reconciliation_service::error::ReconError::AlreadyMatched { .. }) => {
                conflicts += 1
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 7);

    let (_, active) = app.get("/matches?active_only=true").await;
    assert_eq!(active["count"], 1);
}

#[tokio::test]
async fn overlapping_commits_across_tasks_never_double_match() {
    let app = spawn_app().await;
    app.import_bank(&[(10_000, "2024-01-10", "ACME")]).await;
    app.import_book(&[(10_000, "2024-01-10", "ACME")]).await;

    let body = json!({
        "auto_match_100": true,
        "max_group_size_bank": 1,
        "max_group_size_book": 1,
    });
    let first = app.execute(body.clone()).await;
    let second = app.execute(body).await;

    let a = app.wait_for_task(first).await;
    let b = app.wait_for_task(second).await;
    let auto_matched = a["summary"]["auto_matched"].as_u64().unwrap()
        + b["summary"]["auto_matched"].as_u64().unwrap();
    assert_eq!(auto_matched, 1);

    let (_, matches) = app.get("/matches").await;
    assert_eq!(matches["count"], 1);
}
