//! Integration tests for ingestion, manual commits and unmatching.

mod common;

use axum::http::{Method, StatusCode};
use common::spawn_app;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_and_metrics_are_served_without_tenant() {
    let app = spawn_app().await;

    let (status, body) = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.request(Method::GET, "/ready", None, &[]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.request(Method::GET, "/metrics", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body
        .as_str()
        .unwrap()
        .contains("reconciliation_auto_match_skipped_total"));
}

#[tokio::test]
async fn served_requests_show_up_in_metrics() {
    let app = spawn_app().await;

    let (status, _) = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.request(Method::GET, "/metrics", None, &[]).await;
    let text = body.as_str().unwrap();
    assert!(text.contains(r#"http_requests_total{method="GET",path="/health",status="200"}"#));
    assert!(text.contains("http_request_duration_seconds_bucket"));
}

#[tokio::test]
async fn business_routes_require_tenant_headers() {
    let app = spawn_app().await;

    let (status, _) = app.request(Method::GET, "/matches", None, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::GET,
            "/matches",
            None,
            &[
                ("X-Tenant-ID", "not-a-uuid".to_string()),
                ("X-User-ID", "someone".to_string()),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::GET,
            "/matches",
            None,
            &[("X-Tenant-ID", Uuid::new_v4().to_string())],
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bank_import_reports_duplicate_hashes() {
    let app = spawn_app().await;
    let row = json!({
        "bank_account_id": Uuid::nil(),
        "date": "2024-01-10",
        "amount": 10_000,
        "description": "PIX RECEBIDO",
        "currency_id": "BRL",
        "raw_hash": "stmt-1:line-1",
    });

    let (status, body) = app
        .post("/bank-transactions", json!({ "transactions": [row.clone()] }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["inserted_count"], 1);

    let (status, body) = app
        .post("/bank-transactions", json!({ "transactions": [row] }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["inserted_count"], 0);
    assert_eq!(body["duplicates"], json!(["stmt-1:line-1"]));

    let (status, _) = app
        .post("/bank-transactions", json!({ "transactions": [] }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn book_import_derives_amount_from_debit_and_credit() {
    let app = spawn_app().await;

    let (status, body) = app
        .post(
            "/book-transactions",
            json!({ "transactions": [{
                "account_id": Uuid::new_v4(),
                "date": "2024-01-11",
                "debit_amount": 0,
                "credit_amount": 2_500,
                "description": "Fornecedor",
                "currency_id": "BRL",
            }]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["inserted"][0]["amount"], -2_500);
    assert_eq!(body["inserted"][0]["state"], "posted");
    assert_eq!(body["inserted"][0]["reconciled"], false);
}

#[tokio::test]
async fn manual_commit_flips_states_and_rejects_second_commit() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(10_000, "2024-01-10", "PIX ACME")]).await;
    let book = app.import_book(&[(10_000, "2024-01-11", "ACME")]).await;

    let payload = json!({
        "matches": [{ "bank_transaction_ids": bank, "journal_entry_ids": book }],
        "reference": "JAN-01",
    });

    let (status, body) = app.post("/matches", payload.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["count"], 1);
    assert_eq!(body["matches"][0]["method"], "manual");
    assert_eq!(body["matches"][0]["created_by"], common::USER_ID);
    assert_eq!(body["matches"][0]["reference"], "JAN-01");

    let (_, matched) = app.get("/bank-transactions?state=matched").await;
    assert_eq!(common::ids(&matched), bank);
    let (_, open_book) = app.get("/book-transactions?open_only=true").await;
    assert!(open_book.as_array().unwrap().is_empty());

    let (status, body) = app.post("/matches", payload).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["details"]["bank_transaction_ids"],
        json!([bank[0].to_string()])
    );
}

#[tokio::test]
async fn batch_commit_is_all_or_nothing() {
    let app = spawn_app().await;
    let bank = app
        .import_bank(&[(1_000, "2024-01-10", "A"), (2_000, "2024-01-10", "B")])
        .await;
    let book = app
        .import_book(&[(1_000, "2024-01-10", "A"), (2_000, "2024-01-10", "B")])
        .await;

    // The second grouping reuses the first bank line.
    let (status, _) = app
        .post(
            "/matches",
            json!({ "matches": [
                { "bank_transaction_ids": [bank[0]], "journal_entry_ids": [book[0]] },
                { "bank_transaction_ids": [bank[0]], "journal_entry_ids": [book[1]] },
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, matches) = app.get("/matches").await;
    assert_eq!(matches["count"], 0);
    let (_, unmatched) = app.get("/bank-transactions?state=unmatched").await;
    assert_eq!(unmatched.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_side_is_rejected() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(1_000, "2024-01-10", "A")]).await;

    let (status, _) = app
        .post(
            "/matches",
            json!({ "matches": [{ "bank_transaction_ids": bank, "journal_entry_ids": [] }] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app.post("/matches", json!({ "matches": [] })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_member_is_not_found() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(1_000, "2024-01-10", "A")]).await;

    let (status, _) = app
        .post(
            "/matches",
            json!({ "matches": [{
                "bank_transaction_ids": bank,
                "journal_entry_ids": [Uuid::new_v4()],
            }]}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unmatch_reopens_members_once() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(5_000, "2024-01-10", "A")]).await;
    let book = app.import_book(&[(5_000, "2024-01-10", "A")]).await;

    let (_, body) = app
        .post(
            "/matches",
            json!({ "matches": [{ "bank_transaction_ids": bank, "book_transaction_ids": book }] }),
        )
        .await;
    let match_id = body["matches"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app.delete(&format!("/matches/{}", match_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert!(body["unmatched_at"].is_string());

    let (_, unmatched) = app.get("/bank-transactions?state=unmatched").await;
    assert_eq!(common::ids(&unmatched), bank);
    let (_, open_book) = app.get("/book-transactions?open_only=true").await;
    assert_eq!(common::ids(&open_book), book);

    let (status, _) = app.delete(&format!("/matches/{}", match_id)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, active) = app.get("/matches?active_only=true").await;
    assert_eq!(active["count"], 0);
    let (_, all) = app.get("/matches").await;
    assert_eq!(all["count"], 1);

    // Members can be matched again after unmatching.
    let (status, _) = app
        .post(
            "/matches",
            json!({ "matches": [{ "bank_transaction_ids": bank, "journal_entry_ids": book }] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn ignore_and_restore_bank_transaction() {
    let app = spawn_app().await;
    let bank = app
        .import_bank(&[(1_000, "2024-01-10", "A"), (2_000, "2024-01-10", "B")])
        .await;
    let book = app.import_book(&[(2_000, "2024-01-10", "B")]).await;

    let (status, body) = app
        .post(&format!("/bank-transactions/{}/ignore", bank[0]), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ignored");

    // Ignored lines cannot be matched.
    let (status, _) = app
        .post(
            "/matches",
            json!({ "matches": [{ "bank_transaction_ids": [bank[0]], "journal_entry_ids": book }] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .post(&format!("/bank-transactions/{}/restore", bank[0]), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "unmatched");

    app.post(
        "/matches",
        json!({ "matches": [{ "bank_transaction_ids": [bank[1]], "journal_entry_ids": book }] }),
    )
    .await;
    let (status, _) = app
        .post(&format!("/bank-transactions/{}/ignore", bank[1]), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_bank_state_filter_is_rejected() {
    let app = spawn_app().await;
    let (status, _) = app.get("/bank-transactions?state=pending").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let app = spawn_app().await;
    let bank = app.import_bank(&[(1_000, "2024-01-10", "A")]).await;

    let other = [
        ("X-Tenant-ID", Uuid::new_v4().to_string()),
        ("X-User-ID", "other".to_string()),
    ];
    let (status, body) = app
        .request(Method::GET, "/bank-transactions", None, &other)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/bank-transactions/{}/ignore", bank[0]),
            Some(json!({})),
            &other,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
