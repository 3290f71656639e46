//! Integration tests for saved recon configs.

mod common;

use axum::http::{Method, StatusCode};
use common::{spawn_app, TestApp, USER_ID};
use serde_json::{json, Value};
use uuid::Uuid;

fn global_config(name: &str) -> Value {
    json!({ "name": name, "scope": "global" })
}

async fn create(app: &TestApp, body: Value) -> Value {
    let (status, config) = app.post("/recon-configs", body).await;
    assert_eq!(status, StatusCode::CREATED, "{}", config);
    config
}

fn company_headers(app: &TestApp, company_id: Uuid) -> Vec<(&'static str, String)> {
    let mut headers = app.tenant_headers();
    headers.push(("X-Company-ID", company_id.to_string()));
    headers
}

#[tokio::test]
async fn create_fills_defaults_and_maps_date_alias() {
    let app = spawn_app().await;

    let config = create(
        &app,
        json!({ "name": "  Conta corrente  ", "scope": "global", "avg_date_diff_days": 5 }),
    )
    .await;

    assert_eq!(config["name"], "Conta corrente");
    assert_eq!(config["date_tolerance_days"], 5);
    assert_eq!(config["group_date_span_days"], 5);
    assert_eq!(config["max_group_size_bank"], 2);
    assert_eq!(config["amount_weight"], 0.4);
    assert_eq!(config["is_default"], false);

    let id = config["id"].as_str().unwrap();
    let (status, fetched) = app.get(&format!("/recon-configs/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], config["id"]);
}

#[tokio::test]
async fn scope_must_agree_with_owner_fields() {
    let app = spawn_app().await;

    let (status, _) = app
        .post("/recon-configs", json!({ "name": "x", "scope": "company" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post(
            "/recon-configs",
            json!({ "name": "x", "scope": "global", "user_id": USER_ID }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post("/recon-configs", json!({ "name": "", "scope": "global" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn invalid_filters_are_rejected() {
    let app = spawn_app().await;

    let (status, _) = app
        .post(
            "/recon-configs",
            json!({
                "name": "bad filter",
                "scope": "global",
                "bank_filters": { "filters": [
                    { "column_id": "not_a_column", "operator": "equals", "value": 1 }
                ]},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn one_default_per_slot() {
    let app = spawn_app().await;

    let mut first = global_config("first");
    first["is_default"] = json!(true);
    let first = create(&app, first).await;

    let mut second = global_config("second");
    second["is_default"] = json!(true);
    let second = create(&app, second).await;

    let (_, list) = app.get("/recon-configs").await;
    assert_eq!(list["count"], 2);
    assert_eq!(list["configs"][0]["id"], second["id"]);
    assert_eq!(list["configs"][0]["is_default"], true);
    assert_eq!(list["configs"][1]["id"], first["id"]);
    assert_eq!(list["configs"][1]["is_default"], false);

    // A default in another slot leaves the global default alone.
    let user_default = create(
        &app,
        json!({ "name": "mine", "scope": "user", "user_id": USER_ID, "is_default": true }),
    )
    .await;
    assert_eq!(user_default["is_default"], true);

    let (_, fetched) = app
        .get(&format!("/recon-configs/{}", second["id"].as_str().unwrap()))
        .await;
    assert_eq!(fetched["is_default"], true);
}

#[tokio::test]
async fn company_configs_are_visible_only_to_that_company() {
    let app = spawn_app().await;
    let company = Uuid::new_v4();

    let (status, config) = app
        .request(
            Method::POST,
            "/recon-configs",
            Some(json!({ "name": "Filial", "scope": "company", "company_id": company })),
            &company_headers(&app, company),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/recon-configs/{}", config["id"].as_str().unwrap());

    let (status, _) = app
        .request(Method::GET, &uri, None, &company_headers(&app, company))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::GET, &uri, None, &company_headers(&app, Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.get("/recon-configs").await;
    assert_eq!(list["count"], 0);

    let (status, _) = app
        .post(
            "/reconciliation/execute",
            json!({ "config_id": config["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_and_delete() {
    let app = spawn_app().await;
    let config = create(&app, global_config("before")).await;
    let uri = format!("/recon-configs/{}", config["id"].as_str().unwrap());

    let mut body = global_config("after");
    body["min_confidence"] = json!(0.8);
    let (status, updated) = app.put(&uri, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "after");
    assert_eq!(updated["min_confidence"], 0.8);
    assert_eq!(updated["created_at"], config["created_at"]);

    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn config_filters_select_the_candidate_pool() {
    let app = spawn_app().await;
    let bank = app
        .import_bank(&[(1_000, "2024-01-10", "PIX ACME"), (2_000, "2024-01-10", "TED BETA")])
        .await;
    app.import_book(&[(1_000, "2024-01-10", "ACME")]).await;

    let config = create(
        &app,
        json!({
            "name": "Somente ACME",
            "scope": "global",
            "min_confidence": 0.3,
            "bank_filters": { "filters": [
                { "column_id": "description", "operator": "contains", "value": "ACME" }
            ]},
        }),
    )
    .await;

    let task_id = app
        .execute(json!({ "config_id": config["id"] }))
        .await;
    let task = app.wait_for_task(task_id).await;
    assert_eq!(task["bank_candidate_count"], 1);
    assert_eq!(task["config_name"], "Somente ACME");
    assert_eq!(task["params"]["min_confidence"], 0.3);

    // Explicit ids ignore the filter unless relative_filter is set.
    let task_id = app
        .execute(json!({ "config_id": config["id"], "bank_ids": bank }))
        .await;
    let (_, task) = app
        .get(&format!("/reconciliation/tasks/{}", task_id))
        .await;
    assert_eq!(task["bank_candidate_count"], 2);

    let task_id = app
        .execute(json!({
            "config_id": config["id"],
            "bank_ids": bank,
            "relative_filter": true,
            "min_confidence": 0.9,
        }))
        .await;
    let (_, task) = app
        .get(&format!("/reconciliation/tasks/{}", task_id))
        .await;
    assert_eq!(task["bank_candidate_count"], 1);
    assert_eq!(task["params"]["min_confidence"], 0.9);
}
