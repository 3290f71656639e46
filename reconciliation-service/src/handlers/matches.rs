use crate::dtos::{
    CommitMatchesRequest, CommitSuggestionsRequest, MatchListParams, MatchListResponse,
};
use crate::models::Match;
use crate::services::{Caller, ListQuery, ReviewedSuggestion};
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
pub async fn create_matches(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CommitMatchesRequest>,
) -> Result<(StatusCode, Json<MatchListResponse>), AppError> {
    request.validate()?;

    let annotations = request.annotations();
    let groups = request
        .matches
        .into_iter()
        .map(|m| (m.bank_transaction_ids, m.journal_entry_ids))
        .collect();

    let matches = state
        .matches
        .commit_manual(caller.tenant_id, &caller.user_id, groups, annotations)
        .await?;

    tracing::info!(count = matches.len(), "Manual matches committed");

    Ok((
        StatusCode::CREATED,
        Json(MatchListResponse {
            count: matches.len(),
            matches,
        }),
    ))
}

#[tracing::instrument(skip(state, caller, request), fields(tenant_id = %caller.tenant_id))]
pub async fn commit_suggestions(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CommitSuggestionsRequest>,
) -> Result<(StatusCode, Json<MatchListResponse>), AppError> {
    request.validate()?;

    let annotations = request.annotations();
    let suggestions: Vec<ReviewedSuggestion> =
        request.suggestions.into_iter().map(Into::into).collect();

    let matches = state
        .matches
        .commit_suggestions(caller.tenant_id, &caller.user_id, suggestions, annotations)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MatchListResponse {
            count: matches.len(),
            matches,
        }),
    ))
}

pub async fn list_matches(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<MatchListParams>,
) -> Result<Json<MatchListResponse>, AppError> {
    let matches = state
        .matches
        .list(caller.tenant_id, params.active_only, ListQuery::new(params.limit))
        .await?;

    Ok(Json(MatchListResponse {
        count: matches.len(),
        matches,
    }))
}

#[tracing::instrument(skip(state, caller), fields(tenant_id = %caller.tenant_id))]
pub async fn unmatch(
    State(state): State<AppState>,
    caller: Caller,
    Path(match_id): Path<Uuid>,
) -> Result<Json<Match>, AppError> {
    let m = state.matches.unmatch(caller.tenant_id, match_id).await?;
    Ok(Json(m))
}
