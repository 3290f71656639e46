//! A store that stalls while a run loads its history, so tests can observe
//! a task in `running` and exercise cancellation and the soft time limit.

use async_trait::async_trait;
use reconciliation_service::error::ReconError;
use reconciliation_service::models::{
    BankTransaction, BankTransactionState, BookTransaction, ImportOutcome, Match, MatchDraft,
    MatchHistoryEntry, NewBankTransaction, NewBookTransaction, ReconConfig, ReconConfigDraft,
    ReconciliationTask, TaskOutcome, TaskProgress, TaskStatus,
};
use reconciliation_service::services::{ListQuery, MemoryStore, ReconStore};
use std::time::Duration;
use uuid::Uuid;

pub struct SlowHistoryStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowHistoryStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl ReconStore for SlowHistoryStore {
    async fn health_check(&self) -> Result<(), ReconError> {
        self.inner.health_check().await
    }

    async fn insert_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBankTransaction>,
    ) -> Result<ImportOutcome, ReconError> {
        self.inner.insert_bank_transactions(tenant_id, transactions).await
    }

    async fn insert_book_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBookTransaction>,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        self.inner.insert_book_transactions(tenant_id, transactions).await
    }

    async fn list_bank_transactions(
        &self,
        tenant_id: Uuid,
        state: Option<BankTransactionState>,
        query: ListQuery,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        self.inner.list_bank_transactions(tenant_id, state, query).await
    }

    async fn list_book_transactions(
        &self,
        tenant_id: Uuid,
        open_only: bool,
        query: ListQuery,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        self.inner.list_book_transactions(tenant_id, open_only, query).await
    }

    async fn get_bank_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BankTransaction>, ReconError> {
        self.inner.get_bank_transactions(tenant_id, ids).await
    }

    async fn get_book_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BookTransaction>, ReconError> {
        self.inner.get_book_transactions(tenant_id, ids).await
    }

    async fn unmatched_bank_pool(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        self.inner.unmatched_bank_pool(tenant_id).await
    }

    async fn open_book_pool(&self, tenant_id: Uuid) -> Result<Vec<BookTransaction>, ReconError> {
        self.inner.open_book_pool(tenant_id).await
    }

    async fn set_bank_ignored(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        ignored: bool,
    ) -> Result<BankTransaction, ReconError> {
        self.inner.set_bank_ignored(tenant_id, id, ignored).await
    }

    async fn create_config(
        &self,
        tenant_id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        self.inner.create_config(tenant_id, draft).await
    }

    async fn get_config(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconConfig, ReconError> {
        self.inner.get_config(tenant_id, id).await
    }

    async fn list_configs(&self, tenant_id: Uuid) -> Result<Vec<ReconConfig>, ReconError> {
        self.inner.list_configs(tenant_id).await
    }

    async fn update_config(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        self.inner.update_config(tenant_id, id, draft).await
    }

    async fn delete_config(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ReconError> {
        self.inner.delete_config(tenant_id, id).await
    }

    async fn create_task(&self, task: ReconciliationTask) -> Result<ReconciliationTask, ReconError> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconciliationTask, ReconError> {
        self.inner.get_task(tenant_id, id).await
    }

    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        query: ListQuery,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        self.inner.list_tasks(tenant_id, status, query).await
    }

    async fn tasks_in_status(
        &self,
        status: TaskStatus,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        self.inner.tasks_in_status(status).await
    }

    async fn transition_task(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        to: TaskStatus,
        outcome: TaskOutcome,
    ) -> Result<ReconciliationTask, ReconError> {
        self.inner.transition_task(tenant_id, id, to, outcome).await
    }

    async fn update_task_progress(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        progress: TaskProgress,
    ) -> Result<(), ReconError> {
        self.inner.update_task_progress(tenant_id, id, progress).await
    }

    async fn commit_matches(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        drafts: Vec<MatchDraft>,
    ) -> Result<Vec<Match>, ReconError> {
        self.inner.commit_matches(tenant_id, created_by, drafts).await
    }

    async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Match, ReconError> {
        self.inner.unmatch(tenant_id, match_id).await
    }

    async fn list_matches(
        &self,
        tenant_id: Uuid,
        active_only: bool,
        query: ListQuery,
    ) -> Result<Vec<Match>, ReconError> {
        self.inner.list_matches(tenant_id, active_only, query).await
    }

    async fn match_history(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MatchHistoryEntry>, ReconError> {
        tokio::time::sleep(self.delay).await;
        self.inner.match_history(tenant_id, limit).await
    }
}
