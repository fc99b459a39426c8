//! Core abstractions for the pipeline engine
//!
//! This crate provides the leaf types every other crate depends on: the
//! execution state, agent specifications and the agent trait, errors, and
//! execution events. It has no scheduling logic.

mod agent;
mod error;
pub mod events;
mod spec;
mod state;
mod value;

pub use agent::{Agent, AgentContext, AgentId, FnAgent};
pub use error::{AgentError, MissingField, PipelineError, RegistryError};
pub use events::*;
pub use spec::{predicate, AgentSpec, Dependency, Predicate};
pub use state::{ExecutionState, StateDelta, MAX_REFINEMENTS, REFINEMENT_COUNT, RESERVED_FIELDS};
pub use value::Value;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
