//! Match commits: manual, suggestion-based and automatic.

use super::metrics;
use super::store::{ListQuery, ReconStore};
use crate::engine::is_balanced;
use crate::error::ReconError;
use crate::models::{
    AdjustmentSide, BankTransaction, BookTransactionState, Match, MatchDraft, MatchMethod,
    NewBookLine, NewBookTransaction, ProposedLine, ProposedTransaction, Suggestion,
    SuggestionType,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One async mutex per tenant. Serializes the "already matched" check-and-set
/// inside this process; the store enforces it again across processes.
#[derive(Clone, Default)]
pub struct TenantLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub async fn lock(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// A suggestion as sent back by a reviewer for commit.
#[derive(Debug, Clone)]
pub struct ReviewedSuggestion {
    pub suggestion_type: SuggestionType,
    pub bank_transaction_ids: Vec<Uuid>,
    pub book_transaction_ids: Vec<Uuid>,
    /// Header of the transaction to post; required for `create_new`.
    pub transaction: Option<ProposedTransaction>,
    pub journal_entries: Vec<ProposedLine>,
    pub confidence_score: Option<f64>,
}

impl From<&Suggestion> for ReviewedSuggestion {
    fn from(s: &Suggestion) -> Self {
        Self {
            suggestion_type: s.suggestion_type,
            bank_transaction_ids: s.bank_transaction_ids.clone(),
            book_transaction_ids: s.book_transaction_ids.clone(),
            transaction: Some(s.transaction.clone()),
            journal_entries: s.journal_entries.clone(),
            confidence_score: Some(s.confidence_score),
        }
    }
}

/// Free-text fields shared by every match of one commit request.
#[derive(Debug, Clone, Default)]
pub struct CommitAnnotations {
    pub adjustment_side: AdjustmentSide,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl CommitAnnotations {
    fn apply(&self, draft: &mut MatchDraft) {
        draft.adjustment_side = self.adjustment_side;
        draft.reference = self.reference.clone();
        draft.notes = self.notes.clone();
    }
}

#[derive(Clone)]
pub struct MatchService {
    store: Arc<dyn ReconStore>,
    locks: TenantLocks,
}

impl MatchService {
    pub fn new(store: Arc<dyn ReconStore>) -> Self {
        Self {
            store,
            locks: TenantLocks::default(),
        }
    }

    /// Commits explicit bank/book groupings. The batch is all-or-nothing.
    #[instrument(skip(self, groups, annotations), fields(tenant_id = %tenant_id, batch = groups.len()))]
    pub async fn commit_manual(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        groups: Vec<(Vec<Uuid>, Vec<Uuid>)>,
        annotations: CommitAnnotations,
    ) -> Result<Vec<Match>, ReconError> {
        let drafts = groups
            .into_iter()
            .map(|(bank, book)| {
                let mut draft = MatchDraft::manual(dedup(bank), dedup(book));
                annotations.apply(&mut draft);
                draft
            })
            .collect();
        self.commit(tenant_id, created_by, drafts).await
    }

    /// Commits reviewed suggestions. `create_new` suggestions post their journal
    /// lines first, inside the same atomic unit.
    #[instrument(skip(self, suggestions, annotations), fields(tenant_id = %tenant_id, batch = suggestions.len()))]
    pub async fn commit_suggestions(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        suggestions: Vec<ReviewedSuggestion>,
        annotations: CommitAnnotations,
    ) -> Result<Vec<Match>, ReconError> {
        let mut drafts = Vec::with_capacity(suggestions.len());
        for suggestion in &suggestions {
            let mut draft = suggestion_draft(suggestion, None)?;
            annotations.apply(&mut draft);
            drafts.push(draft);
        }
        self.commit(tenant_id, created_by, drafts).await
    }

    /// Commits one auto-match candidate. A member claimed in the meantime is a
    /// lost race, reported as `Ok(None)` rather than an error.
    #[instrument(skip(self, suggestion), fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub async fn commit_auto(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        created_by: &str,
        suggestion: &Suggestion,
    ) -> Result<Option<Match>, ReconError> {
        let mut draft = suggestion_draft(&ReviewedSuggestion::from(suggestion), Some(task_id))?;
        draft.method = MatchMethod::Auto;

        match self.commit(tenant_id, created_by, vec![draft]).await {
            Ok(mut created) => Ok(created.pop()),
            Err(ReconError::AlreadyMatched { bank_ids, book_ids }) => {
                info!(
                    conflicting_bank = bank_ids.len(),
                    conflicting_book = book_ids.len(),
                    "Auto-match lost race, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn commit(
        &self,
        tenant_id: Uuid,
        created_by: &str,
        drafts: Vec<MatchDraft>,
    ) -> Result<Vec<Match>, ReconError> {
        if drafts.is_empty() {
            return Err(ReconError::validation("at least one match is required"));
        }

        let _guard = self.locks.lock(tenant_id).await;
        let created = self.store.commit_matches(tenant_id, created_by, drafts).await?;

        let mut by_method: HashMap<&'static str, usize> = HashMap::new();
        for m in &created {
            *by_method.entry(m.method.as_str()).or_default() += 1;
        }
        for (method, count) in by_method {
            metrics::record_matches(method, count);
        }
        Ok(created)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_id = %match_id))]
    pub async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Match, ReconError> {
        let _guard = self.locks.lock(tenant_id).await;
        self.store.unmatch(tenant_id, match_id).await
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        active_only: bool,
        query: ListQuery,
    ) -> Result<Vec<Match>, ReconError> {
        self.store.list_matches(tenant_id, active_only, query).await
    }

    /// Soft-marks a bank transaction as ignored, or restores it. Matched
    /// transactions are rejected.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, bank_transaction_id = %id))]
    pub async fn set_ignored(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        ignored: bool,
    ) -> Result<BankTransaction, ReconError> {
        let _guard = self.locks.lock(tenant_id).await;
        self.store.set_bank_ignored(tenant_id, id, ignored).await
    }
}

fn dedup(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
    ids
}

/// Builds the match draft a suggestion commits as.
pub fn suggestion_draft(
    suggestion: &ReviewedSuggestion,
    task_id: Option<Uuid>,
) -> Result<MatchDraft, ReconError> {
    let mut draft = MatchDraft::manual(
        dedup(suggestion.bank_transaction_ids.clone()),
        dedup(suggestion.book_transaction_ids.clone()),
    );
    draft.method = MatchMethod::Suggestion;
    draft.confidence_score = suggestion.confidence_score.map(|c| c.clamp(0.0, 1.0));
    draft.task_id = task_id;

    if suggestion.suggestion_type == SuggestionType::CreateNew {
        let header = suggestion.transaction.as_ref().ok_or_else(|| {
            ReconError::validation("create_new suggestion must carry a transaction")
        })?;
        if suggestion.journal_entries.is_empty() {
            return Err(ReconError::validation(
                "create_new suggestion must carry journal entries",
            ));
        }
        if !is_balanced(&suggestion.journal_entries) {
            warn!(
                bank_transaction_ids = ?suggestion.bank_transaction_ids,
                "Proposed journal entries are not balanced"
            );
        }

        let transaction_id = Uuid::new_v4();
        for (index, line) in suggestion.journal_entries.iter().enumerate() {
            let account_id = line.account_id.ok_or_else(|| {
                ReconError::validation(format!("journal entry {} has no account_id", index))
            })?;
            let description = if line.description.trim().is_empty() {
                header.description.clone()
            } else {
                line.description.clone()
            };
            draft.new_book_lines.push(NewBookLine {
                line: NewBookTransaction {
                    transaction_id: Some(transaction_id),
                    account_id,
                    entity_id: header.entity_id,
                    date: header.date,
                    amount: line.debit_amount - line.credit_amount,
                    description,
                    currency_id: header.currency_id.clone(),
                    cost_center_id: line.cost_center_id,
                    state: BookTransactionState::Posted,
                },
                reconciles_bank: line.reconciles_bank,
            });
        }
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn create_new(lines: Vec<ProposedLine>) -> ReviewedSuggestion {
        ReviewedSuggestion {
            suggestion_type: SuggestionType::CreateNew,
            bank_transaction_ids: vec![Uuid::new_v4()],
            book_transaction_ids: vec![],
            transaction: Some(ProposedTransaction {
                date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
                description: "TARIFA BANCARIA".to_string(),
                amount: -1500,
                currency_id: "BRL".to_string(),
                entity_id: None,
            }),
            journal_entries: lines,
            confidence_score: Some(0.4),
        }
    }

    fn line(account: Option<Uuid>, debit: i64, credit: i64, reconciles: bool) -> ProposedLine {
        ProposedLine {
            account_id: account,
            debit_amount: debit,
            credit_amount: credit,
            description: String::new(),
            cost_center_id: None,
            reconciles_bank: reconciles,
        }
    }

    #[test]
    fn create_new_posts_lines_under_one_header() {
        let s = create_new(vec![
            line(Some(Uuid::new_v4()), 0, 1500, true),
            line(Some(Uuid::new_v4()), 1500, 0, false),
        ]);
        let draft = suggestion_draft(&s, None).unwrap();

        assert_eq!(draft.new_book_lines.len(), 2);
        assert_eq!(draft.book_member_count(), 1);
        assert_eq!(draft.new_book_lines[0].line.amount, -1500);
        assert_eq!(draft.new_book_lines[1].line.amount, 1500);
        assert_eq!(
            draft.new_book_lines[0].line.transaction_id,
            draft.new_book_lines[1].line.transaction_id
        );
        assert_eq!(draft.new_book_lines[0].line.description, "TARIFA BANCARIA");
    }

    #[test]
    fn create_new_requires_accounts() {
        let s = create_new(vec![
            line(Some(Uuid::new_v4()), 0, 1500, true),
            line(None, 1500, 0, false),
        ]);
        assert!(matches!(
            suggestion_draft(&s, None),
            Err(ReconError::Validation(_))
        ));
    }

    #[test]
    fn create_new_requires_header() {
        let mut s = create_new(vec![line(Some(Uuid::new_v4()), 0, 1500, true)]);
        s.transaction = None;
        assert!(matches!(
            suggestion_draft(&s, None),
            Err(ReconError::Validation(_))
        ));
    }

    #[test]
    fn unbalanced_lines_are_accepted() {
        let s = create_new(vec![
            line(Some(Uuid::new_v4()), 0, 1500, true),
            line(Some(Uuid::new_v4()), 1000, 0, false),
        ]);
        assert!(suggestion_draft(&s, None).is_ok());
    }

    #[tokio::test]
    async fn tenant_lock_is_shared_per_tenant() {
        let locks = TenantLocks::default();
        let tenant = Uuid::new_v4();

        let guard = locks.lock(tenant).await;
        let other = locks.clone();
        let blocked = tokio::spawn(async move {
            let _g = other.lock(tenant).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        // A different tenant is not blocked.
        let _g = locks.lock(Uuid::new_v4()).await;

        drop(guard);
        blocked.await.unwrap();
    }
}
