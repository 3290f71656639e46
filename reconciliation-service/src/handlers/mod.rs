pub mod configs;
pub mod health;
pub mod matches;
pub mod reconciliation;
pub mod transactions;

pub use configs::{create_config, delete_config, get_config, list_configs, update_config};
pub use health::{health_check, metrics_handler, readiness_check};
pub use matches::{commit_suggestions, create_matches, list_matches, unmatch};
pub use reconciliation::{
    cancel_task, execute_reconciliation, get_task, get_task_suggestions, list_tasks,
};
pub use transactions::{
    ignore_bank_transaction, import_bank_transactions, import_book_transactions,
    list_bank_transactions, list_book_transactions, restore_bank_transaction,
};
