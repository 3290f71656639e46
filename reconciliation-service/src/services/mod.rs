//! Services module for reconciliation-service.

pub mod configs;
pub mod database;
pub mod matching;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod tasks;

pub use configs::ConfigService;
pub use database::Database;
pub use matching::{CommitAnnotations, MatchService, ReviewedSuggestion, TenantLocks};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use store::{ListQuery, ReconStore};
pub use tasks::{Caller, ParamOverrides, RunDefaults, RunRequest, TaskService};
