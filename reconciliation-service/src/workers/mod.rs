//! Background execution of reconciliation tasks.

mod orchestrator;
mod registry;
mod runner;

pub use orchestrator::{recover_tasks, JobQueue, WorkerOrchestrator};
pub use registry::{ResultRetention, TaskRegistry};
pub use runner::{TaskJob, TaskRunner};
