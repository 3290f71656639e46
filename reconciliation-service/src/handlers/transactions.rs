use crate::dtos::{
    BankTransactionListParams, BookTransactionListParams, ImportBankTransactionsRequest,
    ImportBankTransactionsResponse, ImportBookTransactionsRequest,
    ImportBookTransactionsResponse,
};
use crate::error::ReconError;
use crate::models::{BankTransaction, BankTransactionState, BookTransaction};
use crate::services::{Caller, ListQuery};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, caller, request), fields(tenant_id = %caller.tenant_id))]
pub async fn import_bank_transactions(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ImportBankTransactionsRequest>,
) -> Result<(StatusCode, Json<ImportBankTransactionsResponse>), AppError> {
    request.validate()?;
    for t in &request.transactions {
        t.validate()?;
    }

    let outcome = state
        .store
        .insert_bank_transactions(
            caller.tenant_id,
            request.transactions.into_iter().map(Into::into).collect(),
        )
        .await?;

    tracing::info!(
        inserted = outcome.inserted.len(),
        duplicates = outcome.duplicates.len(),
        "Bank transactions imported"
    );

    Ok((
        StatusCode::CREATED,
        Json(ImportBankTransactionsResponse {
            inserted_count: outcome.inserted.len(),
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
        }),
    ))
}

pub async fn list_bank_transactions(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<BankTransactionListParams>,
) -> Result<Json<Vec<BankTransaction>>, AppError> {
    let filter = match params.state.as_deref() {
        None => None,
        Some("unmatched") => Some(BankTransactionState::Unmatched),
        Some("matched") => Some(BankTransactionState::Matched),
        Some("ignored") => Some(BankTransactionState::Ignored),
        Some(other) => {
            return Err(ReconError::validation(format!("Unknown bank state: {}", other)).into())
        }
    };

    let transactions = state
        .store
        .list_bank_transactions(caller.tenant_id, filter, ListQuery::new(params.limit))
        .await?;
    Ok(Json(transactions))
}

pub async fn ignore_bank_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<BankTransaction>, AppError> {
    let t = state.matches.set_ignored(caller.tenant_id, id, true).await?;
    Ok(Json(t))
}

pub async fn restore_bank_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<BankTransaction>, AppError> {
    let t = state.matches.set_ignored(caller.tenant_id, id, false).await?;
    Ok(Json(t))
}

#[tracing::instrument(skip(state, caller, request), fields(tenant_id = %caller.tenant_id))]
pub async fn import_book_transactions(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ImportBookTransactionsRequest>,
) -> Result<(StatusCode, Json<ImportBookTransactionsResponse>), AppError> {
    request.validate()?;
    for t in &request.transactions {
        t.validate()?;
    }

    let inserted = state
        .store
        .insert_book_transactions(
            caller.tenant_id,
            request.transactions.into_iter().map(Into::into).collect(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ImportBookTransactionsResponse {
            inserted_count: inserted.len(),
            inserted,
        }),
    ))
}

pub async fn list_book_transactions(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<BookTransactionListParams>,
) -> Result<Json<Vec<BookTransaction>>, AppError> {
    let transactions = state
        .store
        .list_book_transactions(
            caller.tenant_id,
            params.open_only,
            ListQuery::new(params.limit),
        )
        .await?;
    Ok(Json(transactions))
}
