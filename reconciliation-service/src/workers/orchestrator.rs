use super::registry::TaskRegistry;
use super::runner::{TaskJob, TaskRunner};
use crate::config::WorkerConfig;
use crate::error::ReconError;
use crate::models::{TaskOutcome, TaskStatus};
use crate::services::{metrics, ReconStore};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Producer side of the bounded job queue.
#[derive(Clone)]
pub struct JobQueue {
    job_tx: mpsc::Sender<TaskJob>,
}

impl JobQueue {
    pub fn enqueue(&self, job: TaskJob) -> Result<(), ReconError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ReconError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                ReconError::Internal(anyhow::anyhow!("Job queue closed"))
            }
        })
    }
}

pub struct WorkerOrchestrator {
    config: WorkerConfig,
    runner: Arc<TaskRunner>,
    job_rx: Option<mpsc::Receiver<TaskJob>>,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(config: WorkerConfig, runner: TaskRunner) -> (Self, JobQueue) {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size);

        let orchestrator = Self {
            config,
            runner: Arc::new(runner),
            job_rx: Some(job_rx),
            shutdown_token: CancellationToken::new(),
        };

        (orchestrator, JobQueue { job_tx })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawns the dispatcher. At most `worker_count` tasks run at once.
    pub fn start(mut self) {
        let Some(mut job_rx) = self.job_rx.take() else {
            tracing::warn!("Worker pool already started");
            return;
        };

        tracing::info!(
            worker_count = self.config.worker_count,
            queue_size = self.config.queue_size,
            "Starting worker pool"
        );

        let slots = Arc::new(Semaphore::new(self.config.worker_count));
        let shutdown = self.shutdown_token.clone();
        let runner = self.runner.clone();

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Job dispatcher shutting down");
                        break;
                    }
                    permit = slots.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let job = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Job dispatcher shutting down");
                        break;
                    }
                    job = job_rx.recv() => match job {
                        Some(job) => job,
                        None => {
                            tracing::info!("Channel closed, job dispatcher exiting");
                            break;
                        }
                    },
                };

                tracing::debug!(
                    tenant_id = %job.tenant_id,
                    task_id = %job.task_id,
                    "Dispatching task to worker"
                );

                let runner = runner.clone();
                tokio::spawn(async move {
                    runner.run(job).await;
                    drop(permit);
                });
            }
        });
    }
}

/// Startup recovery: tasks left `running` by a previous process are failed and
/// `pending` ones are queued again.
pub async fn recover_tasks(
    store: &dyn ReconStore,
    queue: &JobQueue,
    registry: &TaskRegistry,
) -> Result<(), ReconError> {
    for task in store.tasks_in_status(TaskStatus::Running).await? {
        match store
            .transition_task(
                task.tenant_id,
                task.id,
                TaskStatus::Failed,
                TaskOutcome::failed("interrupted by service restart"),
            )
            .await
        {
            Ok(_) => {
                metrics::record_task(TaskStatus::Failed.as_str());
                tracing::warn!(task_id = %task.id, "Marked interrupted task as failed");
            }
            Err(e) => tracing::error!(task_id = %task.id, error = %e, "Failed to fail interrupted task"),
        }
    }

    let pending = store.tasks_in_status(TaskStatus::Pending).await?;
    let count = pending.len();
    for task in pending {
        registry.token(task.id);
        let job = TaskJob {
            tenant_id: task.tenant_id,
            task_id: task.id,
        };
        if let Err(e) = queue.enqueue(job) {
            registry.release(task.id);
            tracing::error!(task_id = %task.id, error = %e, "Failed to re-enqueue pending task");
            store
                .transition_task(
                    task.tenant_id,
                    task.id,
                    TaskStatus::Failed,
                    TaskOutcome::failed(e.to_string()),
                )
                .await?;
        }
    }
    if count > 0 {
        tracing::info!(count, "Re-enqueued pending tasks");
    }
    Ok(())
}
