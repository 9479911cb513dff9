pub mod checker;
pub mod repair;
pub mod schedule;
pub mod worker;

pub use checker::{CheckOptions, FileChecker, HealthChecker};
pub use repair::{RepairOrchestrator, RepairOutcome};
pub use worker::HealthWorker;
