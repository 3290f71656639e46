use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Bank Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankTransactionState {
    Unmatched,
    Matched,
    Ignored,
}

impl BankTransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "matched" => Self::Matched,
            "ignored" => Self::Ignored,
            _ => Self::Unmatched,
        }
    }
}

/// A normalized bank statement line. Amount is signed, in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bank_account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: i64,
    pub description: String,
    pub currency_id: String,
    pub raw_hash: String,
    pub state: BankTransactionState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBankTransaction {
    pub bank_account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: i64,
    pub description: String,
    pub currency_id: String,
    pub raw_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub inserted: Vec<BankTransaction>,
    pub duplicates: Vec<String>,
}

// ============================================================================
// Book Transaction (Journal Entry) Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookTransactionState {
    Pending,
    Posted,
    Cancelled,
}

impl BookTransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "posted" => Self::Posted,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// One journal line. Amount is debit minus credit, in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: i64,
    pub description: String,
    pub currency_id: String,
    pub cost_center_id: Option<Uuid>,
    pub state: BookTransactionState,
    pub reconciled: bool,
    pub created_at: DateTime<Utc>,
}

impl BookTransaction {
    /// Posted and not yet reconciled: the only lines that may enter a candidate pool.
    pub fn is_open(&self) -> bool {
        self.state == BookTransactionState::Posted && !self.reconciled
    }
}

#[derive(Debug, Clone)]
pub struct NewBookTransaction {
    pub transaction_id: Option<Uuid>,
    pub account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: i64,
    pub description: String,
    pub currency_id: String,
    pub cost_center_id: Option<Uuid>,
    pub state: BookTransactionState,
}
