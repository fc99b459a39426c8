#![allow(dead_code)]

use pipecore::{
    predicate, AgentContext, AgentError, AgentSpec, ExecutionState, FnAgent, Predicate,
    StateDelta, Value, MAX_REFINEMENTS,
};
use std::sync::Arc;
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Agent that sleeps for `delay_ms` then writes a fixed value to `field`
pub fn stub(id: &str, delay_ms: u64, field: &str, value: impl Into<Value>) -> AgentSpec {
    let name = field.to_string();
    let value = value.into();
    let agent = FnAgent::new(move |_ctx: AgentContext| {
        let name = name.clone();
        let value = value.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(StateDelta::new().with_field(name, value))
        }
    });
    AgentSpec::new(id, Arc::new(agent)).owns(field)
}

/// Agent that always fails with `error`
pub fn failing(id: &str, field: &str, error: AgentError) -> AgentSpec {
    let agent = FnAgent::new(move |_ctx: AgentContext| {
        let error = error.clone();
        async move { Err(error) }
    });
    AgentSpec::new(id, Arc::new(agent)).owns(field)
}

/// Drafting agent whose output records how many refinements preceded it
pub fn drafter() -> AgentSpec {
    let agent = FnAgent::new(|ctx: AgentContext| async move {
        let version = ctx.state.refinement_count();
        Ok(StateDelta::new().with_field("draft", format!("v{}", version)))
    });
    AgentSpec::new("draft", Arc::new(agent)).owns("draft")
}

/// Refinement agent over `draft`, judged by `quality`
pub fn refiner(quality: Predicate) -> AgentSpec {
    let agent = FnAgent::new(|ctx: AgentContext| async move {
        let draft = ctx.state.require_str("draft")?.to_string();
        Ok::<_, AgentError>(StateDelta::new().with_field("critique", format!("improve {}", draft)))
    });
    AgentSpec::refinement("refine", Arc::new(agent), quality)
        .depends_on("draft")
        .refines("draft")
        .owns("critique")
}

/// Guard mirroring the refiner's own applicability
pub fn refinement_pending(quality: Predicate) -> Predicate {
    predicate(move |state: &ExecutionState| !quality(state) && state.refinements_remaining())
}

pub fn refinement_state(max: u64) -> ExecutionState {
    ExecutionState::new().with_field(MAX_REFINEMENTS, max)
}
