//! Domain models for reconciliation-service.

#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod filter;
pub mod matching;
pub mod params;
pub mod suggestion;
pub mod task;
pub mod transaction;

pub use config::{ConfigScope, ReconConfig, ReconConfigDraft};
pub use filter::{BooleanOp, FilterRule, FilterStack};
pub use matching::{AdjustmentSide, Match, MatchDraft, MatchHistoryEntry, MatchMethod, NewBookLine};
pub use params::{MatchParams, RunDirection, ScoreWeights};
pub use suggestion::{
    HistoricalMatch, MemberSet, ProposedLine, ProposedTransaction, ScoreBreakdown, Suggestion,
    SuggestionType, TargetSide, TargetSuggestions,
};
pub use task::{ReconciliationTask, TaskOutcome, TaskProgress, TaskStatus, TaskSummary};
pub use transaction::{
    BankTransaction, BankTransactionState, BookTransaction, BookTransactionState, ImportOutcome,
    NewBankTransaction, NewBookTransaction,
};
