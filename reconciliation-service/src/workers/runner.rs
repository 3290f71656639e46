use super::registry::TaskRegistry;
use crate::engine::{
    plan_auto_matches, CandidatePools, DescriptionSimilarity, EngineLimits, SuggestionEngine,
};
use crate::error::ReconError;
use crate::models::{
    BankTransactionState, ReconciliationTask, RunDirection, TargetSide, TargetSuggestions,
    TaskOutcome, TaskProgress, TaskStatus, TaskSummary,
};
use crate::services::metrics;
use crate::services::{MatchService, ReconStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct TaskJob {
    pub tenant_id: Uuid,
    pub task_id: Uuid,
}

/// Executes one reconciliation task from `pending` to a terminal status.
pub struct TaskRunner {
    store: Arc<dyn ReconStore>,
    matches: MatchService,
    registry: TaskRegistry,
    similarity: Arc<dyn DescriptionSimilarity>,
    limits: EngineLimits,
    batch_size: usize,
    history_limit: i64,
    parallelism: usize,
}

struct RunOutput {
    summary: TaskSummary,
    results: Vec<TargetSuggestions>,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ReconStore>,
        matches: MatchService,
        registry: TaskRegistry,
        similarity: Arc<dyn DescriptionSimilarity>,
        limits: EngineLimits,
        batch_size: usize,
        history_limit: i64,
    ) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            store,
            matches,
            registry,
            similarity,
            limits,
            batch_size: batch_size.max(1),
            history_limit,
            parallelism,
        }
    }

    #[instrument(skip(self), fields(tenant_id = %job.tenant_id, task_id = %job.task_id))]
    pub async fn run(&self, job: TaskJob) {
        let token = self.registry.token(job.task_id);

        let task = match self
            .store
            .transition_task(
                job.tenant_id,
                job.task_id,
                TaskStatus::Running,
                TaskOutcome::default(),
            )
            .await
        {
            Ok(task) => task,
            Err(ReconError::InvalidTransition { from, .. }) => {
                info!(status = %from, "Task no longer pending, skipping");
                // A running task's token belongs to the worker that started it.
                if from.is_terminal() {
                    self.registry.release(job.task_id);
                }
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to start task");
                self.registry.release(job.task_id);
                return;
            }
        };
        metrics::record_task(TaskStatus::Running.as_str());

        let start = Instant::now();
        let limit = task.soft_time_limit_seconds;
        info!(
            direction = task.params.direction.as_str(),
            bank_candidates = task.bank_candidate_ids.len(),
            book_candidates = task.book_candidate_ids.len(),
            soft_time_limit_seconds = limit,
            "Task started"
        );

        let result =
            tokio::time::timeout(Duration::from_secs(limit), self.execute(&task, &token)).await;

        let (status, outcome, results) = match result {
            Ok(Ok(output)) => (
                TaskStatus::Succeeded,
                TaskOutcome::succeeded(output.summary),
                Some(output.results),
            ),
            Ok(Err(ReconError::Cancelled)) => {
                // The cancel request already moved the task to `cancelled`.
                info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task stopped after cancellation"
                );
                metrics::record_task_duration(
                    TaskStatus::Cancelled.as_str(),
                    start.elapsed().as_secs_f64(),
                );
                self.registry.release(job.task_id);
                return;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Task failed");
                (TaskStatus::Failed, TaskOutcome::failed(e.to_string()), None)
            }
            Err(_) => {
                // Stops batches still running on the blocking pool.
                token.cancel();
                let e = ReconError::Timeout(limit);
                warn!(error = %e, "Task exceeded its soft time limit");
                (TaskStatus::Failed, TaskOutcome::failed(e.to_string()), None)
            }
        };

        match self
            .store
            .transition_task(job.tenant_id, job.task_id, status, outcome)
            .await
        {
            Ok(_) => {
                if let Some(results) = results {
                    self.registry.store_results(job.tenant_id, job.task_id, results);
                }
                metrics::record_task(status.as_str());
                metrics::record_task_duration(status.as_str(), start.elapsed().as_secs_f64());
                info!(
                    status = %status,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task finished"
                );
            }
            Err(ReconError::InvalidTransition { from, .. }) => {
                info!(status = %from, "Task reached a terminal status elsewhere");
            }
            Err(e) => {
                error!(error = %e, "Failed to record task outcome");
            }
        }
        self.registry.release(job.task_id);
    }

    async fn execute(
        &self,
        task: &ReconciliationTask,
        token: &CancellationToken,
    ) -> Result<RunOutput, ReconError> {
        let tenant_id = task.tenant_id;

        // Members may have been matched since submit; only still-open ones enter the pools.
        let bank: Vec<_> = self
            .store
            .get_bank_transactions(tenant_id, &task.bank_candidate_ids)
            .await?
            .into_iter()
            .filter(|t| t.state == BankTransactionState::Unmatched)
            .collect();
        let book: Vec<_> = self
            .store
            .get_book_transactions(tenant_id, &task.book_candidate_ids)
            .await?
            .into_iter()
            .filter(|t| t.is_open())
            .collect();
        let history = Arc::new(self.store.match_history(tenant_id, self.history_limit).await?);

        let pools = Arc::new(CandidatePools::new(&bank, &book));
        let side = match task.params.direction {
            RunDirection::BankFirst => TargetSide::Bank,
            RunDirection::BookFirst => TargetSide::Book,
        };
        let total = pools.side(side).len();
        let mut progress = TaskProgress {
            targets_total: total as u64,
            targets_processed: 0,
        };
        self.store
            .update_task_progress(tenant_id, task.id, progress)
            .await?;

        let engine = SuggestionEngine::new(task.params.clone(), self.limits, self.similarity.clone());
        let batch_size = self.batch_size;

        let mut batches = stream::iter((0..total).step_by(batch_size).map(|from| {
            let to = (from + batch_size).min(total);
            let engine = engine.clone();
            let pools = pools.clone();
            let history = history.clone();
            let token = token.clone();
            tokio::task::spawn_blocking(move || {
                let mut out = Vec::with_capacity(to - from);
                for target in from..to {
                    if token.is_cancelled() {
                        break;
                    }
                    out.push(engine.suggest(&pools, side, target, &history));
                }
                out
            })
        }))
        .buffered(self.parallelism);

        let mut results = Vec::with_capacity(total);
        while let Some(batch) = batches.next().await {
            let batch = batch
                .map_err(|e| ReconError::Internal(anyhow::anyhow!("Batch worker failed: {}", e)))?;
            if token.is_cancelled() {
                return Err(ReconError::Cancelled);
            }
            progress.targets_processed += batch.len() as u64;
            results.extend(batch);
            self.store
                .update_task_progress(tenant_id, task.id, progress)
                .await?;
        }

        let mut summary = summarize(&results);
        metrics::record_candidates_evaluated(summary.candidates_evaluated);

        if task.params.auto_match {
            let plan = plan_auto_matches(&results, task.params.auto_match_threshold);
            summary.skipped = plan.skipped;

            for suggestion in &plan.selected {
                if token.is_cancelled() {
                    return Err(ReconError::Cancelled);
                }
                match self
                    .matches
                    .commit_auto(tenant_id, task.id, &task.created_by, suggestion)
                    .await?
                {
                    Some(_) => summary.auto_matched += 1,
                    None => summary.skipped += 1,
                }
            }
            metrics::record_auto_match_skipped(summary.skipped);
            info!(
                auto_matched = summary.auto_matched,
                skipped = summary.skipped,
                "Auto-match pass complete"
            );
        }

        Ok(RunOutput { summary, results })
    }
}

fn summarize(results: &[TargetSuggestions]) -> TaskSummary {
    let mut summary = TaskSummary::default();
    for r in results {
        summary.candidates_evaluated += r.candidates_evaluated;
        summary.suggestions_generated += r.suggestions.len() as u64;
        if r.fallback.is_some() {
            summary.create_new_recommended += 1;
        }
        if r.candidates_evaluated == 0 {
            summary.targets_without_candidates += 1;
        }
    }
    summary
}
