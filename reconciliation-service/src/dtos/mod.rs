pub mod configs;
pub mod matches;
pub mod reconciliation;
pub mod transactions;

pub use configs::{ReconConfigListResponse, ReconConfigRequest};
pub use matches::{
    CommitMatchesRequest, CommitSuggestionsRequest, MatchGroupRequest, MatchListParams,
    MatchListResponse, SuggestionCommitItem,
};
pub use reconciliation::{
    ExecuteReconciliationRequest, SubmitTaskResponse, SuggestionsResponse, TaskListParams,
    TaskListResponse, TaskResponse,
};
pub use transactions::{
    BankTransactionInput, BankTransactionListParams, BookTransactionInput,
    BookTransactionListParams, ImportBankTransactionsRequest, ImportBankTransactionsResponse,
    ImportBookTransactionsRequest, ImportBookTransactionsResponse,
};
