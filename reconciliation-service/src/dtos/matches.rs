use crate::models::{AdjustmentSide, Match, ProposedLine, ProposedTransaction, SuggestionType};
use crate::services::{CommitAnnotations, ReviewedSuggestion};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// One grouping in a manual commit. Empty sets are rejected by the commit itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchGroupRequest {
    #[serde(default)]
    pub bank_transaction_ids: Vec<Uuid>,
    #[serde(default, alias = "book_transaction_ids")]
    pub journal_entry_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommitMatchesRequest {
    #[validate(length(min = 1, message = "At least one match is required"))]
    pub matches: Vec<MatchGroupRequest>,
    #[serde(default)]
    pub adjustment_side: AdjustmentSide,
    #[validate(length(max = 255, message = "Reference must be at most 255 characters"))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl CommitMatchesRequest {
    pub fn annotations(&self) -> CommitAnnotations {
        CommitAnnotations {
            adjustment_side: self.adjustment_side,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestionCommitItem {
    pub suggestion_type: SuggestionType,
    #[serde(default)]
    pub bank_transaction_ids: Vec<Uuid>,
    /// Single-id form some clients send instead of `bank_transaction_ids`.
    pub bank_transaction_id: Option<Uuid>,
    #[serde(default)]
    pub book_transaction_ids: Vec<Uuid>,
    pub transaction: Option<ProposedTransaction>,
    #[serde(default)]
    pub journal_entries: Vec<ProposedLine>,
    pub confidence_score: Option<f64>,
}

impl From<SuggestionCommitItem> for ReviewedSuggestion {
    fn from(item: SuggestionCommitItem) -> Self {
        let mut bank_transaction_ids = item.bank_transaction_ids;
        if let Some(id) = item.bank_transaction_id {
            if !bank_transaction_ids.contains(&id) {
                bank_transaction_ids.push(id);
            }
        }
        Self {
            suggestion_type: item.suggestion_type,
            bank_transaction_ids,
            book_transaction_ids: item.book_transaction_ids,
            transaction: item.transaction,
            journal_entries: item.journal_entries,
            confidence_score: item.confidence_score,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommitSuggestionsRequest {
    #[validate(length(min = 1, message = "At least one suggestion is required"))]
    pub suggestions: Vec<SuggestionCommitItem>,
    #[serde(default)]
    pub adjustment_side: AdjustmentSide,
    #[validate(length(max = 255, message = "Reference must be at most 255 characters"))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl CommitSuggestionsRequest {
    pub fn annotations(&self) -> CommitAnnotations {
        CommitAnnotations {
            adjustment_side: self.adjustment_side,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MatchListParams {
    #[serde(default)]
    pub active_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchListResponse {
    pub matches: Vec<Match>,
    pub count: usize,
}
