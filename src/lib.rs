pub mod app;
pub mod config;
pub mod engine;
pub mod plan;
pub mod schema;
pub mod shared;

pub use engine::{
    ModelExecutor, PlanRunner, RunError, RunFailure, RunOutcome, RunResult, SuspendedRun,
    ToolRegistry, UserIdentity,
};
pub use plan::{Plan, PlanBuilder, PlanError};
