use crate::dtos::{ReconConfigListResponse, ReconConfigRequest};
use crate::models::ReconConfig;
use crate::services::Caller;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_config(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ReconConfigRequest>,
) -> Result<(StatusCode, Json<ReconConfig>), AppError> {
    request.validate()?;
    let config = state.configs.create(&caller, request.into()).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn list_configs(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ReconConfigListResponse>, AppError> {
    let configs = state.configs.list(&caller).await?;
    Ok(Json(ReconConfigListResponse {
        count: configs.len(),
        configs,
    }))
}

pub async fn get_config(
    State(state): State<AppState>,
    caller: Caller,
    Path(config_id): Path<Uuid>,
) -> Result<Json<ReconConfig>, AppError> {
    Ok(Json(state.configs.get(&caller, config_id).await?))
}

pub async fn update_config(
    State(state): State<AppState>,
    caller: Caller,
    Path(config_id): Path<Uuid>,
    Json(request): Json<ReconConfigRequest>,
) -> Result<Json<ReconConfig>, AppError> {
    request.validate()?;
    let config = state
        .configs
        .update(&caller, config_id, request.into())
        .await?;
    Ok(Json(config))
}

pub async fn delete_config(
    State(state): State<AppState>,
    caller: Caller,
    Path(config_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.configs.delete(&caller, config_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
