use crate::driver::{Driver, ExecutionHandle, ExecutorConfig, FailurePolicy};
use crate::executor::DagExecutor;
use crate::registry::AgentRegistry;
use crate::sequential::SequentialDriver;
use crate::ExecutionResult;
use pipecore::{
    EventBus, ExecutionEvent, ExecutionState, MissingField, PipelineError, RegistryError,
    MAX_REFINEMENTS, REFINEMENT_COUNT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which driver runs the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Dag,
    Sequential,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dag" => Ok(DriverKind::Dag),
            "sequential" => Ok(DriverKind::Sequential),
            other => Err(format!("unknown driver '{}', expected 'dag' or 'sequential'", other)),
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub driver: DriverKind,
    pub agent_timeout_ms: Option<u64>,
    pub on_failure: FailurePolicy,
    pub max_refinements: u64,
    pub max_rounds: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Dag,
            agent_timeout_ms: Some(30_000),
            on_failure: FailurePolicy::Abort,
            max_refinements: 2,
            max_rounds: 256,
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            agent_timeout: self.agent_timeout_ms.map(Duration::from_millis),
            on_failure: self.on_failure,
            max_rounds: self.max_rounds,
        }
    }

    pub fn build_driver(&self) -> Box<dyn Driver> {
        let config = self.executor_config();
        match self.driver {
            DriverKind::Dag => Box::new(DagExecutor::new(config)),
            DriverKind::Sequential => Box::new(SequentialDriver::new(config)),
        }
    }
}

/// Derives the externally visible result from a finished state
pub trait ResultAssembler: Send + Sync {
    type Output;

    fn assemble(&self, state: &ExecutionState) -> Result<Self::Output, PipelineError>;
}

/// Fail with `IncompleteState` listing every `(field, producing agent)`
/// pair absent from `state`.
pub fn require_fields(
    state: &ExecutionState,
    mandatory: &[(&str, &str)],
) -> Result<(), PipelineError> {
    let missing: Vec<MissingField> = mandatory
        .iter()
        .filter(|(field, _)| !state.contains(field))
        .map(|(field, agent)| MissingField {
            field: field.to_string(),
            agent: agent.to_string(),
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::IncompleteState(missing))
    }
}

/// Outcome of an orchestrated run
#[derive(Debug, Clone)]
pub struct PipelineOutcome<T> {
    pub summary: T,
    pub execution: ExecutionResult,
}

/// Builds a registry per run, drives it, and assembles the result
pub struct Orchestrator {
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    /// Create an orchestrator with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self { config, event_bus }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Seed the bookkeeping fields the refinement guard reads.
    pub fn prepare_state(&self, mut state: ExecutionState) -> ExecutionState {
        if !state.contains(MAX_REFINEMENTS) {
            state.set(MAX_REFINEMENTS, self.config.max_refinements);
        }
        if !state.contains(REFINEMENT_COUNT) {
            state.set(REFINEMENT_COUNT, 0u64);
        }
        state
    }

    /// Build a fresh registry with `factory` and run it with the configured driver
    pub async fn execute<F>(
        &self,
        factory: F,
        initial_state: ExecutionState,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionResult, PipelineError>
    where
        F: FnOnce() -> Result<AgentRegistry, RegistryError>,
    {
        let registry = factory()?;
        let driver = self.config.build_driver();
        tracing::info!(driver = driver.name(), agents = registry.len(), "Orchestrating pipeline");

        driver
            .run(&registry, self.prepare_state(initial_state), &self.event_bus, handle)
            .await
    }

    /// Execute and then assemble the final summary
    pub async fn run<F, A>(
        &self,
        factory: F,
        initial_state: ExecutionState,
        assembler: &A,
        handle: &ExecutionHandle,
    ) -> Result<PipelineOutcome<A::Output>, PipelineError>
    where
        F: FnOnce() -> Result<AgentRegistry, RegistryError>,
        A: ResultAssembler,
    {
        let execution = self.execute(factory, initial_state, handle).await?;
        let summary = assembler.assemble(&execution.final_state)?;
        Ok(PipelineOutcome { summary, execution })
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_keys() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "driver": "sequential", "on_failure": "degrade" }"#).unwrap();
        assert_eq!(config.driver, DriverKind::Sequential);
        assert_eq!(config.on_failure, FailurePolicy::Degrade);
        assert_eq!(config.max_refinements, 2);
        assert_eq!(config.agent_timeout_ms, Some(30_000));
        assert_eq!(config.build_driver().name(), "sequential");
    }

    #[test]
    fn require_fields_names_every_missing_producer() {
        let state = ExecutionState::new().with_field("draft", "text");
        let err = require_fields(
            &state,
            &[("draft", "writer"), ("score", "scorer"), ("tags", "tagger")],
        )
        .unwrap_err();

        assert_eq!(err.missing_agents(), vec!["scorer", "tagger"]);
        assert!(err.to_string().contains("'score' (from agent 'scorer')"));
    }

    #[test]
    fn prepare_state_keeps_explicit_ceiling() {
        let orchestrator = Orchestrator::new();
        let state = orchestrator.prepare_state(ExecutionState::new().with_field(MAX_REFINEMENTS, 5u64));
        assert_eq!(state.max_refinements(), 5);
        assert_eq!(state.refinement_count(), 0);

        let state = orchestrator.prepare_state(ExecutionState::new());
        assert_eq!(state.max_refinements(), 2);
    }
}
