//! Persistence port for reconciliation-service.

use crate::error::ReconError;
use crate::models::{
    BankTransaction, BankTransactionState, BookTransaction, ImportOutcome, Match, MatchDraft,
    MatchHistoryEntry, NewBankTransaction, NewBookTransaction, ReconConfig, ReconConfigDraft,
    ReconciliationTask, TaskOutcome, TaskProgress, TaskStatus,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Query window for listings.
#[derive(Debug, Clone, Copy)]
pub struct ListQuery {
    pub limit: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

impl ListQuery {
    pub fn new(limit: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(100).clamp(1, 1000),
        }
    }
}

/// Storage contract shared by the Postgres and in-memory adapters.
///
/// `commit_matches` and `unmatch` are the only writers of bank state and the
/// book `reconciled` flag; both are atomic, and `commit_matches` rejects any
/// member already held by an active match.
#[async_trait]
pub trait ReconStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ReconError>;

    // Transactions
    async fn insert_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBankTransaction>,
    ) -> Result<ImportOutcome, ReconError>;

    async fn insert_book_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBookTransaction>,
    ) -> Result<Vec<BookTransaction>, ReconError>;

    async fn list_bank_transactions(
        &self,
        tenant_id: Uuid,
        state: Option<BankTransactionState>,
        query: ListQuery,
    ) -> Result<Vec<BankTransaction>, ReconError>;

    async fn list_book_transactions(
        &self,
        tenant_id: Uuid,
        open_only: bool,
        query: ListQuery,
    ) -> Result<Vec<BookTransaction>, ReconError>;

    /// Bank transactions by id; ids that do not exist in the tenant are omitted.
    async fn get_bank_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BankTransaction>, ReconError>;

    async fn get_book_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BookTransaction>, ReconError>;

    /// Every `unmatched` bank transaction of the tenant.
    async fn unmatched_bank_pool(&self, tenant_id: Uuid)
        -> Result<Vec<BankTransaction>, ReconError>;

    /// Every posted, unreconciled book transaction of the tenant.
    async fn open_book_pool(&self, tenant_id: Uuid) -> Result<Vec<BookTransaction>, ReconError>;

    /// Moves a bank transaction between `unmatched` and `ignored`.
    async fn set_bank_ignored(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        ignored: bool,
    ) -> Result<BankTransaction, ReconError>;

    // Recon configs
    async fn create_config(
        &self,
        tenant_id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError>;

    async fn get_config(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconConfig, ReconError>;

    async fn list_configs(&self, tenant_id: Uuid) -> Result<Vec<ReconConfig>, ReconError>;

    async fn update_config(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError>;

    async fn delete_config(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ReconError>;

    // Tasks
    async fn create_task(&self, task: ReconciliationTask) -> Result<ReconciliationTask, ReconError>;

    async fn get_task(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconciliationTask, ReconError>;

    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        query: ListQuery,
    ) -> Result<Vec<ReconciliationTask>, ReconError>;

    /// Tasks in a status across all tenants, oldest first. Used for startup recovery.
    async fn tasks_in_status(&self, status: TaskStatus)
        -> Result<Vec<ReconciliationTask>, ReconError>;

    /// Moves a task to `to` if the transition from its current status is legal.
    async fn transition_task(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        to: TaskStatus,
        outcome: TaskOutcome,
    ) -> Result<ReconciliationTask, ReconError>;

    async fn update_task_progress(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        progress: TaskProgress,
    ) -> Result<(), ReconError>;

    // Matches
    async fn commit_matches(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        drafts: Vec<MatchDraft>,
    ) -> Result<Vec<Match>, ReconError>;

    async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Match, ReconError>;

    async fn list_matches(
        &self,
        tenant_id: Uuid,
        active_only: bool,
        query: ListQuery,
    ) -> Result<Vec<Match>, ReconError>;

    /// Most recent active matches, reduced to suggestion evidence.
    async fn match_history(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MatchHistoryEntry>, ReconError>;
}

/// Validation shared by both adapters once members are loaded under lock.
pub(crate) fn check_members(
    draft: &MatchDraft,
    bank: &[BankTransaction],
    book: &[BookTransaction],
) -> Result<(), ReconError> {
    if let Some(missing) = draft
        .bank_transaction_ids
        .iter()
        .find(|id| !bank.iter().any(|t| t.id == **id))
    {
        return Err(ReconError::not_found("bank transaction", missing));
    }
    if let Some(missing) = draft
        .book_transaction_ids
        .iter()
        .find(|id| !book.iter().any(|t| t.id == **id))
    {
        return Err(ReconError::not_found("book transaction", missing));
    }
    if let Some(t) = bank
        .iter()
        .find(|t| t.state == BankTransactionState::Ignored)
    {
        return Err(ReconError::validation(format!(
            "bank transaction {} is ignored",
            t.id
        )));
    }
    if let Some(t) = book
        .iter()
        .find(|t| t.state != crate::models::BookTransactionState::Posted)
    {
        return Err(ReconError::validation(format!(
            "book transaction {} is not posted",
            t.id
        )));
    }
    Ok(())
}

/// Every bank and book id a batch touches, sorted and deduplicated. Adapters lock
/// these in one pass so concurrent batches take row locks in the same order.
pub(crate) fn batch_lock_set(drafts: &[MatchDraft]) -> (Vec<Uuid>, Vec<Uuid>) {
    let bank: BTreeSet<Uuid> = drafts
        .iter()
        .flat_map(|d| d.bank_transaction_ids.iter().copied())
        .collect();
    let book: BTreeSet<Uuid> = drafts
        .iter()
        .flat_map(|d| d.book_transaction_ids.iter().copied())
        .collect();
    (bank.into_iter().collect(), book.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_set_is_one_ordered_pass_regardless_of_batch_order() {
        let mut bank: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut book: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        let forward = vec![
            MatchDraft::manual(vec![bank[3], bank[0]], vec![book[2]]),
            MatchDraft::manual(vec![bank[1]], vec![book[0], book[2]]),
            MatchDraft::manual(vec![bank[2], bank[0]], vec![book[1]]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        bank.sort();
        book.sort();
        assert_eq!(batch_lock_set(&forward), (bank.clone(), book.clone()));
        assert_eq!(batch_lock_set(&reversed), (bank, book));
    }
}
