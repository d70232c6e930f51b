pub mod tracker;
pub mod types;

pub use tracker::ExecutionTracker;
pub use types::{ExecutionStatus, InvalidTransition, StrategyExecution, TaskSnapshot};
