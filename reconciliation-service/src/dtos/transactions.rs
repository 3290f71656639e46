use crate::models::{
    BankTransaction, BookTransaction, BookTransactionState, NewBankTransaction,
    NewBookTransaction,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct BankTransactionInput {
    pub bank_account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 10, message = "currency_id must be 1-10 characters"))]
    pub currency_id: String,
    #[validate(length(min = 1, max = 255, message = "raw_hash must be 1-255 characters"))]
    pub raw_hash: String,
}

impl From<BankTransactionInput> for NewBankTransaction {
    fn from(t: BankTransactionInput) -> Self {
        Self {
            bank_account_id: t.bank_account_id,
            entity_id: t.entity_id,
            date: t.date,
            amount: t.amount,
            description: t.description,
            currency_id: t.currency_id,
            raw_hash: t.raw_hash,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ImportBankTransactionsRequest {
    #[validate(length(min = 1, max = 5000, message = "Between 1 and 5000 transactions per request"))]
    pub transactions: Vec<BankTransactionInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportBankTransactionsResponse {
    pub inserted: Vec<BankTransaction>,
    pub inserted_count: usize,
    /// `raw_hash` values already present for the tenant.
    pub duplicates: Vec<String>,
}

/// A posted journal line. Either `amount` (debit minus credit) or the
/// debit/credit pair may be given.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct BookTransactionInput {
    pub transaction_id: Option<Uuid>,
    pub account_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub debit_amount: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub credit_amount: i64,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 10, message = "currency_id must be 1-10 characters"))]
    pub currency_id: String,
    pub cost_center_id: Option<Uuid>,
    pub state: Option<BookTransactionState>,
}

impl From<BookTransactionInput> for NewBookTransaction {
    fn from(t: BookTransactionInput) -> Self {
        Self {
            transaction_id: t.transaction_id,
            account_id: t.account_id,
            entity_id: t.entity_id,
            date: t.date,
            amount: t.amount.unwrap_or(t.debit_amount - t.credit_amount),
            description: t.description,
            currency_id: t.currency_id,
            cost_center_id: t.cost_center_id,
            state: t.state.unwrap_or(BookTransactionState::Posted),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ImportBookTransactionsRequest {
    #[validate(length(min = 1, max = 5000, message = "Between 1 and 5000 transactions per request"))]
    pub transactions: Vec<BookTransactionInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportBookTransactionsResponse {
    pub inserted: Vec<BookTransaction>,
    pub inserted_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BankTransactionListParams {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BookTransactionListParams {
    #[serde(default)]
    pub open_only: bool,
    pub limit: Option<i64>,
}
