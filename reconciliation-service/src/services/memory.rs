//! In-process store used by tests and `STORE_BACKEND=memory`.
//!
//! All state sits behind one `RwLock`; every write (including the whole of a
//! match batch) happens under a single write guard, which gives the same
//! all-or-nothing behaviour as a database transaction.

use super::store::{check_members, ListQuery, ReconStore};
use crate::error::ReconError;
use crate::models::{
    BankTransaction, BankTransactionState, BookTransaction, BookTransactionState, ImportOutcome,
    Match, MatchDraft, MatchHistoryEntry, NewBankTransaction, NewBookTransaction, ReconConfig,
    ReconConfigDraft, ReconciliationTask, TaskOutcome, TaskProgress, TaskStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    bank: HashMap<Uuid, BankTransaction>,
    bank_hashes: HashSet<(Uuid, String)>,
    book: HashMap<Uuid, BookTransaction>,
    configs: HashMap<Uuid, ReconConfig>,
    tasks: HashMap<Uuid, ReconciliationTask>,
    matches: HashMap<Uuid, Match>,
    /// Transaction id -> id of the active match holding it.
    active_members: HashMap<Uuid, Uuid>,
}

impl MemoryState {
    fn bank_for(&self, tenant_id: Uuid, id: &Uuid) -> Option<&BankTransaction> {
        self.bank.get(id).filter(|t| t.tenant_id == tenant_id)
    }

    fn book_for(&self, tenant_id: Uuid, id: &Uuid) -> Option<&BookTransaction> {
        self.book.get(id).filter(|t| t.tenant_id == tenant_id)
    }

    fn new_book(tenant_id: Uuid, t: NewBookTransaction) -> BookTransaction {
        BookTransaction {
            id: Uuid::new_v4(),
            tenant_id,
            transaction_id: t.transaction_id,
            account_id: t.account_id,
            entity_id: t.entity_id,
            date: t.date,
            amount: t.amount,
            description: t.description,
            currency_id: t.currency_id,
            cost_center_id: t.cost_center_id,
            state: t.state,
            reconciled: false,
            created_at: Utc::now(),
        }
    }

    /// Clears `is_default` on the other configs sharing the same slot.
    fn clear_default_slot(&mut self, tenant_id: Uuid, keep: Uuid) {
        let slot = match self.configs.get(&keep) {
            Some(c) => (c.scope, c.company_id, c.user_id.clone()),
            None => return,
        };
        for c in self.configs.values_mut() {
            if c.tenant_id == tenant_id
                && c.id != keep
                && (c.scope, c.company_id, c.user_id.clone()) == slot
            {
                c.is_default = false;
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconStore for MemoryStore {
    async fn health_check(&self) -> Result<(), ReconError> {
        Ok(())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    #[instrument(skip(self, transactions), fields(tenant_id = %tenant_id, count = transactions.len()))]
    async fn insert_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBankTransaction>,
    ) -> Result<ImportOutcome, ReconError> {
        let mut state = self.state.write().await;
        let mut outcome = ImportOutcome {
            inserted: Vec::new(),
            duplicates: Vec::new(),
        };
        for t in transactions {
            if !state.bank_hashes.insert((tenant_id, t.raw_hash.clone())) {
                outcome.duplicates.push(t.raw_hash);
                continue;
            }
            let txn = BankTransaction {
                id: Uuid::new_v4(),
                tenant_id,
                bank_account_id: t.bank_account_id,
                entity_id: t.entity_id,
                date: t.date,
                amount: t.amount,
                description: t.description,
                currency_id: t.currency_id,
                raw_hash: t.raw_hash,
                state: BankTransactionState::Unmatched,
                created_at: Utc::now(),
            };
            state.bank.insert(txn.id, txn.clone());
            outcome.inserted.push(txn);
        }
        Ok(outcome)
    }

    #[instrument(skip(self, transactions), fields(tenant_id = %tenant_id, count = transactions.len()))]
    async fn insert_book_transactions(
        &self,
        tenant_id: Uuid,
        transactions: Vec<NewBookTransaction>,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let mut state = self.state.write().await;
        let mut inserted = Vec::with_capacity(transactions.len());
        for t in transactions {
            let txn = MemoryState::new_book(tenant_id, t);
            state.book.insert(txn.id, txn.clone());
            inserted.push(txn);
        }
        Ok(inserted)
    }

    async fn list_bank_transactions(
        &self,
        tenant_id: Uuid,
        filter_state: Option<BankTransactionState>,
        query: ListQuery,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<BankTransaction> = state
            .bank
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| filter_state.is_none_or(|s| t.state == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.date, t.id));
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn list_book_transactions(
        &self,
        tenant_id: Uuid,
        open_only: bool,
        query: ListQuery,
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<BookTransaction> = state
            .book
            .values()
            .filter(|t| t.tenant_id == tenant_id && (!open_only || t.is_open()))
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.date, t.id));
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn get_bank_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.bank_for(tenant_id, id).cloned())
            .collect())
    }

    async fn get_book_transactions(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<BookTransaction>, ReconError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.book_for(tenant_id, id).cloned())
            .collect())
    }

    async fn unmatched_bank_pool(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<BankTransaction>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<BankTransaction> = state
            .bank
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.state == BankTransactionState::Unmatched)
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.date, t.id));
        Ok(out)
    }

    async fn open_book_pool(&self, tenant_id: Uuid) -> Result<Vec<BookTransaction>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<BookTransaction> = state
            .book
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.is_open())
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.date, t.id));
        Ok(out)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, bank_transaction_id = %id))]
    async fn set_bank_ignored(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        ignored: bool,
    ) -> Result<BankTransaction, ReconError> {
        let mut state = self.state.write().await;
        let txn = state
            .bank
            .get_mut(&id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| ReconError::not_found("bank transaction", id))?;
        if txn.state == BankTransactionState::Matched {
            return Err(ReconError::AlreadyMatched {
                bank_ids: vec![id],
                book_ids: Vec::new(),
            });
        }
        txn.state = if ignored {
            BankTransactionState::Ignored
        } else {
            BankTransactionState::Unmatched
        };
        Ok(txn.clone())
    }

    // =========================================================================
    // Recon Config Operations
    // =========================================================================

    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id))]
    async fn create_config(
        &self,
        tenant_id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let config = ReconConfig::from_draft(Uuid::new_v4(), tenant_id, draft, now, now);
        let id = config.id;
        let is_default = config.is_default;
        state.configs.insert(id, config.clone());
        if is_default {
            state.clear_default_slot(tenant_id, id);
        }
        Ok(config)
    }

    async fn get_config(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconConfig, ReconError> {
        let state = self.state.read().await;
        state
            .configs
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| ReconError::not_found("recon config", id))
    }

    async fn list_configs(&self, tenant_id: Uuid) -> Result<Vec<ReconConfig>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<ReconConfig> = state
            .configs
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id, config_id = %id))]
    async fn update_config(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        let mut state = self.state.write().await;
        let config = state
            .configs
            .get_mut(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| ReconError::not_found("recon config", id))?;
        *config = ReconConfig::from_draft(id, tenant_id, draft, config.created_at, Utc::now());
        let updated = config.clone();
        if updated.is_default {
            state.clear_default_slot(tenant_id, id);
        }
        Ok(updated)
    }

    async fn delete_config(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ReconError> {
        let mut state = self.state.write().await;
        match state.configs.get(&id) {
            Some(c) if c.tenant_id == tenant_id => {
                state.configs.remove(&id);
                Ok(())
            }
            _ => Err(ReconError::not_found("recon config", id)),
        }
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    async fn create_task(&self, task: ReconciliationTask) -> Result<ReconciliationTask, ReconError> {
        let mut state = self.state.write().await;
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, tenant_id: Uuid, id: Uuid) -> Result<ReconciliationTask, ReconError> {
        let state = self.state.read().await;
        state
            .tasks
            .get(&id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| ReconError::not_found("task", id))
    }

    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        query: ListQuery,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<ReconciliationTask> = state
            .tasks
            .values()
            .filter(|t| t.tenant_id == tenant_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn tasks_in_status(
        &self,
        status: TaskStatus,
    ) -> Result<Vec<ReconciliationTask>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<ReconciliationTask> = state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    #[instrument(skip(self, outcome), fields(tenant_id = %tenant_id, task_id = %id, to = %to))]
    async fn transition_task(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        to: TaskStatus,
        outcome: TaskOutcome,
    ) -> Result<ReconciliationTask, ReconError> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| ReconError::not_found("task", id))?;
        if !task.status.can_transition_to(to) {
            return Err(ReconError::InvalidTransition {
                from: task.status,
                to,
            });
        }
        let now = Utc::now();
        task.status = to;
        task.updated_at = now;
        if to == TaskStatus::Running {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.finished_at = Some(now);
        }
        if outcome.summary.is_some() {
            task.summary = outcome.summary;
        }
        if outcome.error_message.is_some() {
            task.error_message = outcome.error_message;
        }
        Ok(task.clone())
    }

    async fn update_task_progress(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        progress: TaskProgress,
    ) -> Result<(), ReconError> {
        let mut state = self.state.write().await;
        if let Some(task) = state
            .tasks
            .get_mut(&id)
            .filter(|t| t.tenant_id == tenant_id)
        {
            task.progress = progress;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    #[instrument(skip(self, drafts), fields(tenant_id = %tenant_id, batch = drafts.len()))]
    async fn commit_matches(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        drafts: Vec<MatchDraft>,
    ) -> Result<Vec<Match>, ReconError> {
        let mut state = self.state.write().await;

        let mut conflict_bank = Vec::new();
        let mut conflict_book = Vec::new();
        let mut batch_bank = HashSet::new();
        let mut batch_book = HashSet::new();

        for draft in &drafts {
            if draft.bank_transaction_ids.is_empty() {
                return Err(ReconError::EmptySet("bank"));
            }
            if draft.book_member_count() == 0 {
                return Err(ReconError::EmptySet("book"));
            }
            let bank: Vec<BankTransaction> = draft
                .bank_transaction_ids
                .iter()
                .filter_map(|id| state.bank_for(tenant_id, id).cloned())
                .collect();
            let book: Vec<BookTransaction> = draft
                .book_transaction_ids
                .iter()
                .filter_map(|id| state.book_for(tenant_id, id).cloned())
                .collect();
            check_members(draft, &bank, &book)?;

            for t in &bank {
                if t.state == BankTransactionState::Matched
                    || state.active_members.contains_key(&t.id)
                    || !batch_bank.insert(t.id)
                {
                    conflict_bank.push(t.id);
                }
            }
            for t in &book {
                if t.reconciled
                    || state.active_members.contains_key(&t.id)
                    || !batch_book.insert(t.id)
                {
                    conflict_book.push(t.id);
                }
            }
        }

        if !conflict_bank.is_empty() || !conflict_book.is_empty() {
            return Err(ReconError::AlreadyMatched {
                bank_ids: conflict_bank,
                book_ids: conflict_book,
            });
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut book_ids = draft.book_transaction_ids;
            for line in draft.new_book_lines {
                let txn = MemoryState::new_book(tenant_id, line.line);
                if line.reconciles_bank {
                    book_ids.push(txn.id);
                }
                state.book.insert(txn.id, txn);
            }

            let m = Match {
                id: Uuid::new_v4(),
                tenant_id,
                bank_transaction_ids: draft.bank_transaction_ids,
                book_transaction_ids: book_ids,
                adjustment_side: draft.adjustment_side,
                reference: draft.reference,
                notes: draft.notes,
                method: draft.method,
                confidence_score: draft.confidence_score,
                task_id: draft.task_id,
                active: true,
                created_at: now,
                created_by: created_by.to_string(),
                unmatched_at: None,
            };

            for id in &m.bank_transaction_ids {
                if let Some(t) = state.bank.get_mut(id) {
                    t.state = BankTransactionState::Matched;
                }
                state.active_members.insert(*id, m.id);
            }
            for id in &m.book_transaction_ids {
                if let Some(t) = state.book.get_mut(id) {
                    t.reconciled = true;
                }
                state.active_members.insert(*id, m.id);
            }
            info!(match_id = %m.id, method = m.method.as_str(), "Match committed");
            state.matches.insert(m.id, m.clone());
            created.push(m);
        }

        Ok(created)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_id = %match_id))]
    async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Match, ReconError> {
        let mut state = self.state.write().await;
        let m = state
            .matches
            .get_mut(&match_id)
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or_else(|| ReconError::not_found("match", match_id))?;
        if !m.active {
            return Err(ReconError::validation("match is already inactive"));
        }
        m.active = false;
        m.unmatched_at = Some(Utc::now());
        let m = m.clone();

        for id in &m.bank_transaction_ids {
            if let Some(t) = state.bank.get_mut(id) {
                t.state = BankTransactionState::Unmatched;
            }
            state.active_members.remove(id);
        }
        for id in &m.book_transaction_ids {
            if let Some(t) = state.book.get_mut(id) {
                t.reconciled = false;
            }
            state.active_members.remove(id);
        }
        Ok(m)
    }

    async fn list_matches(
        &self,
        tenant_id: Uuid,
        active_only: bool,
        query: ListQuery,
    ) -> Result<Vec<Match>, ReconError> {
        let state = self.state.read().await;
        let mut out: Vec<Match> = state
            .matches
            .values()
            .filter(|m| m.tenant_id == tenant_id && (!active_only || m.active))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn match_history(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MatchHistoryEntry>, ReconError> {
        let state = self.state.read().await;
        let mut active: Vec<&Match> = state
            .matches
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.active)
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let mut out = Vec::new();
        for m in active.into_iter().take(limit.max(0) as usize) {
            let Some(line) = m
                .book_transaction_ids
                .first()
                .and_then(|id| state.book.get(id))
            else {
                continue;
            };
            let counterpart = line.transaction_id.and_then(|header| {
                state.book.values().find(|b| {
                    b.tenant_id == tenant_id
                        && b.transaction_id == Some(header)
                        && b.account_id != line.account_id
                        && b.state != BookTransactionState::Cancelled
                })
            });
            let bank_description = m
                .bank_transaction_ids
                .iter()
                .filter_map(|id| state.bank.get(id))
                .map(|b| b.description.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            out.push(MatchHistoryEntry {
                match_id: m.id,
                bank_description,
                ledger_account_id: line.account_id,
                counterpart_account_id: counterpart.map(|c| c.account_id),
                cost_center_id: counterpart.and_then(|c| c.cost_center_id),
            });
        }
        Ok(out)
    }
}
