use super::transaction::NewBookTransaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentSide {
    #[default]
    Bank,
    Book,
}

impl AdjustmentSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Book => "book",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "book" => Self::Book,
            _ => Self::Bank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Manual,
    Auto,
    Suggestion,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Suggestion => "suggestion",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            "suggestion" => Self::Suggestion,
            _ => Self::Manual,
        }
    }
}

/// A committed reconciliation linking bank lines to journal lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bank_transaction_ids: Vec<Uuid>,
    pub book_transaction_ids: Vec<Uuid>,
    pub adjustment_side: AdjustmentSide,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub method: MatchMethod,
    pub confidence_score: Option<f64>,
    pub task_id: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub unmatched_at: Option<DateTime<Utc>>,
}

/// A journal line to post as part of a commit.
#[derive(Debug, Clone)]
pub struct NewBookLine {
    pub line: NewBookTransaction,
    /// Posted lines flagged here join the match's book side.
    pub reconciles_bank: bool,
}

/// One match to create. A batch of drafts commits atomically.
#[derive(Debug, Clone)]
pub struct MatchDraft {
    pub bank_transaction_ids: Vec<Uuid>,
    pub book_transaction_ids: Vec<Uuid>,
    pub new_book_lines: Vec<NewBookLine>,
    pub adjustment_side: AdjustmentSide,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub method: MatchMethod,
    pub confidence_score: Option<f64>,
    pub task_id: Option<Uuid>,
}

impl MatchDraft {
    pub fn manual(bank_transaction_ids: Vec<Uuid>, book_transaction_ids: Vec<Uuid>) -> Self {
        Self {
            bank_transaction_ids,
            book_transaction_ids,
            new_book_lines: Vec::new(),
            adjustment_side: AdjustmentSide::Bank,
            reference: None,
            notes: None,
            method: MatchMethod::Manual,
            confidence_score: None,
            task_id: None,
        }
    }

    /// Count of book members the match will end up with, including lines posted by it.
    pub fn book_member_count(&self) -> usize {
        self.book_transaction_ids.len()
            + self
                .new_book_lines
                .iter()
                .filter(|l| l.reconciles_bank)
                .count()
    }
}

/// A previously committed match, reduced to what suggestion evidence needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub match_id: Uuid,
    pub bank_description: String,
    /// Account of the matched journal line (the bank's ledger account).
    pub ledger_account_id: Uuid,
    /// Another account in the same posted transaction, if any.
    pub counterpart_account_id: Option<Uuid>,
    pub cost_center_id: Option<Uuid>,
}
