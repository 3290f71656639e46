use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    CreateNew,
    UseExistingBook,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub amount: f64,
    pub date: f64,
    pub currency: f64,
    pub description: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: i64,
    pub currency_id: String,
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedLine {
    pub account_id: Option<Uuid>,
    pub debit_amount: i64,
    pub credit_amount: i64,
    pub description: String,
    pub cost_center_id: Option<Uuid>,
    #[serde(default)]
    pub reconciles_bank: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub match_id: Uuid,
    pub description: String,
    pub similarity: f64,
    pub ledger_account_id: Uuid,
    pub counterpart_account_id: Option<Uuid>,
    pub cost_center_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion_type: SuggestionType,
    pub confidence_score: f64,
    pub bank_transaction_ids: Vec<Uuid>,
    pub book_transaction_ids: Vec<Uuid>,
    pub transaction: ProposedTransaction,
    pub journal_entries: Vec<ProposedLine>,
    pub pattern: String,
    pub historical_matches: Vec<HistoricalMatch>,
    pub scores: Option<ScoreBreakdown>,
    /// Absolute difference between the bank and book sums.
    pub amount_delta: i64,
}

impl Suggestion {
    pub fn members(&self) -> MemberSet {
        MemberSet::new(&self.bank_transaction_ids, &self.book_transaction_ids)
    }

    pub fn member_count(&self) -> usize {
        self.bank_transaction_ids.len() + self.book_transaction_ids.len()
    }
}

/// Order-independent identity of a grouping's members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberSet {
    pub bank: Vec<Uuid>,
    pub book: Vec<Uuid>,
}

impl MemberSet {
    pub fn new(bank: &[Uuid], book: &[Uuid]) -> Self {
        let mut bank = bank.to_vec();
        let mut book = book.to_vec();
        bank.sort_unstable();
        book.sort_unstable();
        Self { bank, book }
    }

    pub fn overlaps(&self, other: &MemberSet) -> bool {
        self.bank.iter().any(|id| other.bank.binary_search(id).is_ok())
            || self.book.iter().any(|id| other.book.binary_search(id).is_ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSide {
    Bank,
    Book,
}

/// Ranked output for one target transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSuggestions {
    pub target_id: Uuid,
    pub target_side: TargetSide,
    pub suggestions: Vec<Suggestion>,
    /// `create_new` recommendation when nothing cleared `min_confidence`.
    pub fallback: Option<Suggestion>,
    pub candidates_evaluated: u64,
    /// Every candidate at or above the auto-match threshold, including those
    /// ranked out by `max_suggestions`. Only filled for auto-match runs.
    #[serde(skip)]
    pub near_certain: Vec<MemberSet>,
}
