//! Task submission, polling and cancellation.

use super::metrics;
use super::store::{ListQuery, ReconStore};
use crate::engine::{apply_filter, FilterExpr, FilterSide};
use crate::error::ReconError;
use crate::models::{
    BankTransactionState, FilterStack, MatchParams, ReconConfig, ReconciliationTask,
    RunDirection, ScoreWeights, TargetSuggestions, TaskOutcome, TaskProgress, TaskStatus,
};
use crate::workers::{JobQueue, TaskJob, TaskRegistry};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-request parameter overrides. `None` falls back to the config, then to defaults.
#[derive(Debug, Clone, Default)]
pub struct ParamOverrides {
    pub max_suggestions: Option<usize>,
    pub max_group_size_bank: Option<usize>,
    pub max_group_size_book: Option<usize>,
    pub amount_tolerance: Option<i64>,
    pub date_tolerance_days: Option<i64>,
    pub group_date_span_days: Option<i64>,
    pub min_confidence: Option<f64>,
    pub date_weight: Option<f64>,
    pub amount_weight: Option<f64>,
    pub currency_weight: Option<f64>,
    pub embedding_weight: Option<f64>,
    pub allow_mixed_signs: Option<bool>,
    pub allow_mixed_currencies: Option<bool>,
}

impl ParamOverrides {
    pub fn apply(&self, base: MatchParams) -> MatchParams {
        let date_tolerance_days = self.date_tolerance_days.unwrap_or(base.date_tolerance_days);
        // A tolerance override without an explicit span keeps the span in step.
        let group_date_span_days = self.group_date_span_days.unwrap_or(
            if self.date_tolerance_days.is_some() {
                date_tolerance_days
            } else {
                base.group_date_span_days
            },
        );
        MatchParams {
            max_group_size_bank: self.max_group_size_bank.unwrap_or(base.max_group_size_bank),
            max_group_size_book: self.max_group_size_book.unwrap_or(base.max_group_size_book),
            amount_tolerance: self.amount_tolerance.unwrap_or(base.amount_tolerance),
            date_tolerance_days,
            group_date_span_days,
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            max_suggestions: self.max_suggestions.unwrap_or(base.max_suggestions),
            weights: ScoreWeights {
                date_weight: self.date_weight.unwrap_or(base.weights.date_weight),
                amount_weight: self.amount_weight.unwrap_or(base.weights.amount_weight),
                currency_weight: self.currency_weight.unwrap_or(base.weights.currency_weight),
                embedding_weight: self.embedding_weight.unwrap_or(base.weights.embedding_weight),
            },
            allow_mixed_signs: self.allow_mixed_signs.unwrap_or(base.allow_mixed_signs),
            allow_mixed_currencies: self
                .allow_mixed_currencies
                .unwrap_or(base.allow_mixed_currencies),
            ..base
        }
    }
}

/// A run as submitted by a caller.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub config_id: Option<Uuid>,
    pub bank_ids: Vec<Uuid>,
    pub book_ids: Vec<Uuid>,
    pub overrides: ParamOverrides,
    pub auto_match: bool,
    pub relative_filter: bool,
    pub direction: Option<RunDirection>,
    pub soft_time_limit_seconds: Option<u64>,
}

/// Caller identity taken from request headers.
#[derive(Debug, Clone)]
pub struct Caller {
    pub tenant_id: Uuid,
    pub user_id: String,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunDefaults {
    pub soft_time_limit_seconds: u64,
    pub auto_match_threshold: f64,
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn ReconStore>,
    queue: JobQueue,
    registry: TaskRegistry,
    defaults: RunDefaults,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn ReconStore>,
        queue: JobQueue,
        registry: TaskRegistry,
        defaults: RunDefaults,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            defaults,
        }
    }

    /// Validates and snapshots a run, then queues it. Returns the `pending` task.
    #[instrument(skip(self, request), fields(tenant_id = %caller.tenant_id))]
    pub async fn submit(
        &self,
        caller: &Caller,
        request: RunRequest,
    ) -> Result<ReconciliationTask, ReconError> {
        let config = match request.config_id {
            Some(id) => {
                let config = self.store.get_config(caller.tenant_id, id).await?;
                if !config.visible_to(caller.company_id, &caller.user_id) {
                    return Err(ReconError::not_found("recon config", id));
                }
                Some(config)
            }
            None => None,
        };

        let base = config.as_ref().map(ReconConfig::params).unwrap_or_default();
        let mut params = request.overrides.apply(base);
        params.direction = request.direction.unwrap_or_default();
        params.auto_match = request.auto_match;
        params.auto_match_threshold = self.defaults.auto_match_threshold;
        params.validate()?;

        let soft_time_limit_seconds = request
            .soft_time_limit_seconds
            .unwrap_or(self.defaults.soft_time_limit_seconds);
        if soft_time_limit_seconds == 0 {
            return Err(ReconError::validation(
                "soft_time_limit_seconds must be greater than zero",
            ));
        }

        let empty = FilterStack::default();
        let bank_filter = FilterExpr::compile(
            config.as_ref().map_or(&empty, |c| &c.bank_filters),
            FilterSide::Bank,
        )?;
        let book_filter = FilterExpr::compile(
            config.as_ref().map_or(&empty, |c| &c.book_filters),
            FilterSide::Book,
        )?;

        let bank_candidate_ids = self
            .resolve_bank(caller.tenant_id, &request, bank_filter.as_ref())
            .await?;
        let book_candidate_ids = self
            .resolve_book(caller.tenant_id, &request, book_filter.as_ref())
            .await?;

        let now = Utc::now();
        let targets_total = match params.direction {
            RunDirection::BankFirst => bank_candidate_ids.len(),
            RunDirection::BookFirst => book_candidate_ids.len(),
        } as u64;
        let task = ReconciliationTask {
            id: Uuid::new_v4(),
            tenant_id: caller.tenant_id,
            created_by: caller.user_id.clone(),
            config_id: config.as_ref().map(|c| c.id),
            config_name: config.as_ref().map(|c| c.name.clone()),
            status: TaskStatus::Pending,
            params,
            bank_candidate_ids,
            book_candidate_ids,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            summary: None,
            progress: TaskProgress {
                targets_total,
                targets_processed: 0,
            },
            error_message: None,
            soft_time_limit_seconds,
        };

        let task = self.store.create_task(task).await?;
        metrics::record_task(TaskStatus::Pending.as_str());

        self.registry.token(task.id);
        let job = TaskJob {
            tenant_id: task.tenant_id,
            task_id: task.id,
        };
        if let Err(e) = self.queue.enqueue(job) {
            warn!(task_id = %task.id, error = %e, "Failed to enqueue task");
            self.registry.release(task.id);
            self.store
                .transition_task(
                    task.tenant_id,
                    task.id,
                    TaskStatus::Failed,
                    TaskOutcome::failed(e.to_string()),
                )
                .await?;
            metrics::record_task(TaskStatus::Failed.as_str());
            return Err(e);
        }

        info!(
            task_id = %task.id,
            bank_candidates = task.bank_candidate_ids.len(),
            book_candidates = task.book_candidate_ids.len(),
            "Reconciliation task submitted"
        );
        Ok(task)
    }

    /// Explicit ids define scope; an empty set falls back to the filtered unmatched pool.
    /// With `relative_filter` the config filters also narrow explicit ids.
    async fn resolve_bank(
        &self,
        tenant_id: Uuid,
        request: &RunRequest,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<Uuid>, ReconError> {
        let selected = if request.bank_ids.is_empty() {
            apply_filter(filter, self.store.unmatched_bank_pool(tenant_id).await?)
        } else {
            let found = self
                .store
                .get_bank_transactions(tenant_id, &request.bank_ids)
                .await?;
            if let Some(missing) = request
                .bank_ids
                .iter()
                .find(|id| !found.iter().any(|t| t.id == **id))
            {
                return Err(ReconError::not_found("bank transaction", missing));
            }
            let open = found
                .into_iter()
                .filter(|t| t.state == BankTransactionState::Unmatched)
                .collect();
            if request.relative_filter {
                apply_filter(filter, open)
            } else {
                open
            }
        };
        Ok(selected.into_iter().map(|t| t.id).collect())
    }

    async fn resolve_book(
        &self,
        tenant_id: Uuid,
        request: &RunRequest,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<Uuid>, ReconError> {
        let selected = if request.book_ids.is_empty() {
            apply_filter(filter, self.store.open_book_pool(tenant_id).await?)
        } else {
            let found = self
                .store
                .get_book_transactions(tenant_id, &request.book_ids)
                .await?;
            if let Some(missing) = request
                .book_ids
                .iter()
                .find(|id| !found.iter().any(|t| t.id == **id))
            {
                return Err(ReconError::not_found("book transaction", missing));
            }
            let open = found.into_iter().filter(|t| t.is_open()).collect();
            if request.relative_filter {
                apply_filter(filter, open)
            } else {
                open
            }
        };
        Ok(selected.into_iter().map(|t| t.id).collect())
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub async fn get(&self, tenant_id: Uuid, task_id: Uuid) -> Result<ReconciliationTask, ReconError> {
        self.store.get_task(tenant_id, task_id).await
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        query: ListQuery,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        self.store.list_tasks(tenant_id, status, query).await
    }

    /// Marks the task cancelled and signals its worker, which stops at the next
    /// target boundary. Finished tasks reject the transition.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub async fn cancel(&self, tenant_id: Uuid, task_id: Uuid) -> Result<ReconciliationTask, ReconError> {
        let task = self
            .store
            .transition_task(
                tenant_id,
                task_id,
                TaskStatus::Cancelled,
                TaskOutcome::default(),
            )
            .await?;
        let signalled = self.registry.cancel(task_id);
        metrics::record_task(TaskStatus::Cancelled.as_str());
        info!(signalled, "Task cancelled");
        Ok(task)
    }

    /// Suggestions of a succeeded task, held in memory for the life of the process.
    pub async fn suggestions(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
    ) -> Result<(ReconciliationTask, Arc<Vec<TargetSuggestions>>), ReconError> {
        let task = self.store.get_task(tenant_id, task_id).await?;
        if task.status != TaskStatus::Succeeded {
            return Err(ReconError::validation(format!(
                "task {} has no suggestions in status {}",
                task_id, task.status
            )));
        }
        let results = self
            .registry
            .results(task_id)
            .ok_or_else(|| ReconError::not_found("task suggestions", task_id))?;
        Ok((task, results))
    }
}
