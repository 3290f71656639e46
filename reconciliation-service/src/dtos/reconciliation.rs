use crate::models::{
    MatchParams, ReconciliationTask, RunDirection, TargetSuggestions, TaskProgress, TaskSummary,
};
use crate::services::{ParamOverrides, RunRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Body of `POST /reconciliation/execute`. Amounts are minor units.
#[derive(Debug, Deserialize, Validate)]
pub struct ExecuteReconciliationRequest {
    pub config_id: Option<Uuid>,
    #[serde(default)]
    pub bank_ids: Vec<Uuid>,
    #[serde(default)]
    pub book_ids: Vec<Uuid>,
    #[validate(range(min = 1, max = 100, message = "max_suggestions must be between 1 and 100"))]
    pub max_suggestions: Option<usize>,
    #[validate(range(min = 1, max = 8, message = "max_group_size_bank must be between 1 and 8"))]
    pub max_group_size_bank: Option<usize>,
    #[validate(range(min = 1, max = 8, message = "max_group_size_book must be between 1 and 8"))]
    pub max_group_size_book: Option<usize>,
    #[validate(range(min = 0, message = "amount_tolerance must not be negative"))]
    pub amount_tolerance: Option<i64>,
    #[serde(alias = "date_tolerance_days")]
    #[validate(range(min = 0, max = 3650, message = "avg_date_diff_days must be between 0 and 3650"))]
    pub avg_date_diff_days: Option<i64>,
    #[validate(range(min = 0, max = 3650, message = "group_date_span_days must be between 0 and 3650"))]
    pub group_date_span_days: Option<i64>,
    #[validate(range(min = 0.0, max = 1.0, message = "min_confidence must be within [0, 1]"))]
    pub min_confidence: Option<f64>,
    #[validate(range(min = 0.0))]
    pub date_weight: Option<f64>,
    #[validate(range(min = 0.0))]
    pub amount_weight: Option<f64>,
    #[validate(range(min = 0.0))]
    pub currency_weight: Option<f64>,
    #[validate(range(min = 0.0))]
    pub embedding_weight: Option<f64>,
    pub allow_mixed_signs: Option<bool>,
    pub allow_mixed_currencies: Option<bool>,
    #[serde(default)]
    pub auto_match_100: bool,
    #[serde(default)]
    pub relative_filter: bool,
    pub direction: Option<RunDirection>,
    #[validate(range(min = 1, max = 86400))]
    pub soft_time_limit_seconds: Option<u64>,
}

impl From<ExecuteReconciliationRequest> for RunRequest {
    fn from(r: ExecuteReconciliationRequest) -> Self {
        Self {
            config_id: r.config_id,
            bank_ids: r.bank_ids,
            book_ids: r.book_ids,
            overrides: ParamOverrides {
                max_suggestions: r.max_suggestions,
                max_group_size_bank: r.max_group_size_bank,
                max_group_size_book: r.max_group_size_book,
                amount_tolerance: r.amount_tolerance,
                date_tolerance_days: r.avg_date_diff_days,
                group_date_span_days: r.group_date_span_days,
                min_confidence: r.min_confidence,
                date_weight: r.date_weight,
                amount_weight: r.amount_weight,
                currency_weight: r.currency_weight,
                embedding_weight: r.embedding_weight,
                allow_mixed_signs: r.allow_mixed_signs,
                allow_mixed_currencies: r.allow_mixed_currencies,
            },
            auto_match: r.auto_match_100,
            relative_filter: r.relative_filter,
            direction: r.direction,
            soft_time_limit_seconds: r.soft_time_limit_seconds,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: Uuid,
    pub status: String,
    pub config_id: Option<Uuid>,
    pub config_name: Option<String>,
    pub created_by: String,
    pub params: MatchParams,
    pub bank_candidate_count: usize,
    pub book_candidate_count: usize,
    pub progress: TaskProgress,
    pub summary: Option<TaskSummary>,
    pub error_message: Option<String>,
    pub soft_time_limit_seconds: u64,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReconciliationTask> for TaskResponse {
    fn from(task: ReconciliationTask) -> Self {
        let duration_seconds = task.duration_seconds();
        Self {
            task_id: task.id,
            status: task.status.as_str().to_string(),
            config_id: task.config_id,
            config_name: task.config_name,
            created_by: task.created_by,
            params: task.params,
            bank_candidate_count: task.bank_candidate_ids.len(),
            book_candidate_count: task.book_candidate_ids.len(),
            progress: task.progress,
            summary: task.summary,
            error_message: task.error_message,
            soft_time_limit_seconds: task.soft_time_limit_seconds,
            duration_seconds,
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestionsResponse {
    pub task_id: Uuid,
    pub total_suggestions: usize,
    pub targets: Vec<TargetSuggestions>,
}
