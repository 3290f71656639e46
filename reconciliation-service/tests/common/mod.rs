//! Common test utilities for reconciliation-service integration tests.
//!
//! Every test gets its own in-memory store, worker pool and tenant.

#![allow(dead_code)]

pub mod gated_similarity;
pub mod slow_store;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use reconciliation_service::config::ReconciliationConfig;
use reconciliation_service::engine::{DescriptionSimilarity, TokenOverlap};
use reconciliation_service::services::{init_metrics, MemoryStore, ReconStore};
use reconciliation_service::startup::{build_router, AppState};
use reconciliation_service::workers::{TaskRegistry, WorkerOrchestrator};
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciliation_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const USER_ID: &str = "analyst@example.com";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub registry: TaskRegistry,
    pub tenant_id: Uuid,
    /// Held back until `start_workers` when the app is spawned idle.
    pub workers: Option<WorkerOrchestrator>,
}

/// Spawns an app on a fresh in-memory store with the worker pool running.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(ReconciliationConfig::for_memory(), Arc::new(MemoryStore::new()), true).await
}

pub async fn spawn_app_with(
    config: ReconciliationConfig,
    store: Arc<dyn ReconStore>,
    start_workers: bool,
) -> TestApp {
    spawn_app_scoring_with(config, store, Arc::new(TokenOverlap), start_workers).await
}

pub async fn spawn_app_scoring_with(
    config: ReconciliationConfig,
    store: Arc<dyn ReconStore>,
    similarity: Arc<dyn DescriptionSimilarity>,
    start_workers: bool,
) -> TestApp {
    init_tracing();
    init_metrics();

    let (state, orchestrator, registry) = AppState::assemble_with(config, store, similarity);

    let mut app = TestApp {
        router: build_router(state.clone()),
        state,
        registry,
        tenant_id: Uuid::new_v4(),
        workers: Some(orchestrator),
    };
    if start_workers {
        app.start_workers();
    }
    app
}

impl TestApp {
    pub fn start_workers(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.start();
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub fn tenant_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Tenant-ID", self.tenant_id.to_string()),
            ("X-User-ID", USER_ID.to_string()),
        ]
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, &self.tenant_headers()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), &self.tenant_headers())
            .await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body), &self.tenant_headers())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None, &self.tenant_headers())
            .await
    }

    /// Imports bank lines given as (amount, date, description), all in BRL.
    pub async fn import_bank(&self, rows: &[(i64, &str, &str)]) -> Vec<Uuid> {
        let transactions: Vec<Value> = rows
            .iter()
            .map(|(amount, date, description)| {
                json!({
                    "bank_account_id": Uuid::nil(),
                    "date": date,
                    "amount": amount,
                    "description": description,
                    "currency_id": "BRL",
                    "raw_hash": Uuid::new_v4().to_string(),
                })
            })
            .collect();

        let (status, body) = self
            .post("/bank-transactions", json!({ "transactions": transactions }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "bank import failed: {}", body);
        ids(&body["inserted"])
    }

    /// Imports posted book lines given as (amount, date, description), all in BRL.
    pub async fn import_book(&self, rows: &[(i64, &str, &str)]) -> Vec<Uuid> {
        let transactions: Vec<Value> = rows
            .iter()
            .map(|(amount, date, description)| {
                json!({
                    "account_id": Uuid::new_v4(),
                    "date": date,
                    "amount": amount,
                    "description": description,
                    "currency_id": "BRL",
                })
            })
            .collect();

        let (status, body) = self
            .post("/book-transactions", json!({ "transactions": transactions }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "book import failed: {}", body);
        ids(&body["inserted"])
    }

    /// Submits a run and returns its task id.
    pub async fn execute(&self, body: Value) -> Uuid {
        let (status, response) = self.post("/reconciliation/execute", body).await;
        assert_eq!(status, StatusCode::ACCEPTED, "execute failed: {}", response);
        response["task_id"].as_str().unwrap().parse().unwrap()
    }

    /// Polls a task until it reaches a terminal status.
    pub async fn wait_for_task(&self, task_id: Uuid) -> Value {
        for _ in 0..200 {
            let (status, task) = self
                .get(&format!("/reconciliation/tasks/{}", task_id))
                .await;
            assert_eq!(status, StatusCode::OK);
            if matches!(
                task["status"].as_str(),
                Some("succeeded" | "failed" | "cancelled")
            ) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {} did not finish", task_id);
    }
}

pub fn ids(value: &Value) -> Vec<Uuid> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().parse().unwrap())
        .collect()
}
