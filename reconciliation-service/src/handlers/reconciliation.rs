use crate::dtos::{
    ExecuteReconciliationRequest, SubmitTaskResponse, SuggestionsResponse, TaskListParams,
    TaskListResponse, TaskResponse,
};
use crate::error::ReconError;
use crate::models::TaskStatus;
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
pub async fn execute_reconciliation(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ExecuteReconciliationRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), AppError> {
    request.validate()?;

    let task = state.tasks.submit(&caller, request.into()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: task.id,
            status: task.status.as_str().to_string(),
        }),
    ))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<TaskListParams>,
) -> Result<Json<TaskListResponse>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            TaskStatus::parse(s)
                .ok_or_else(|| ReconError::validation(format!("Unknown task status: {}", s)))
        })
        .transpose()?;

    let tasks: Vec<TaskResponse> = state
        .tasks
        .list(caller.tenant_id, status, ListQuery::new(params.limit))
        .await?
        .into_iter()
        .map(TaskResponse::from)
        .collect();

    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.tasks.get(caller.tenant_id, task_id).await?;
    Ok(Json(task.into()))
}

pub async fn get_task_suggestions(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let (task, results) = state.tasks.suggestions(caller.tenant_id, task_id).await?;

    Ok(Json(SuggestionsResponse {
        task_id: task.id,
        total_suggestions: results
            .iter()
            .map(|r| r.suggestions.len() + usize::from(r.fallback.is_some()))
            .sum(),
        targets: (*results).clone(),
    }))
}

#[tracing::instrument(skip(state, caller), fields(tenant_id = %caller.tenant_id))]
pub async fn cancel_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.tasks.cancel(caller.tenant_id, task_id).await?;
    Ok(Json(task.into()))
}
