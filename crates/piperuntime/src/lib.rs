//! Pipeline execution runtime
//!
//! This crate provides the agent registry, the concurrent round-based
//! executor, the sequential fallback driver, and the orchestrator that
//! selects between them and assembles results.

mod dispatch;
mod driver;
mod executor;
mod registry;
mod result;
mod runtime;
mod sequential;

pub use driver::{Driver, ExecutionHandle, ExecutorConfig, FailurePolicy};
pub use executor::DagExecutor;
pub use registry::AgentRegistry;
pub use result::{AgentTiming, ExecutionResult};
pub use runtime::{
    require_fields, DriverKind, Orchestrator, PipelineOutcome, ResultAssembler, RuntimeConfig,
};
pub use sequential::SequentialDriver;
