use crate::{registry::AgentRegistry, ExecutionResult};
use async_trait::async_trait;
use pipecore::{EventBus, ExecutionState, PipelineError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scheduling strategy over a registry.
///
/// Both implementations run the same specs through the same commit logic;
/// only the order and concurrency of agent calls differ.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        registry: &AgentRegistry,
        initial_state: ExecutionState,
        event_bus: &EventBus,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionResult, PipelineError>;
}

/// What happens when an agent errors or misses its deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run with `PipelineError::Agent`.
    #[default]
    Abort,
    /// Record the agent as degraded and let unaffected agents continue.
    Degrade,
}

/// Settings shared by both drivers
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub agent_timeout: Option<Duration>,
    pub on_failure: FailurePolicy,
    pub max_rounds: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Some(Duration::from_secs(30)),
            on_failure: FailurePolicy::Abort,
            max_rounds: 256,
        }
    }
}

/// Handle for cancelling a run in progress
#[derive(Debug, Clone, Default)]
pub struct ExecutionHandle {
    token: CancellationToken,
}

impl ExecutionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run at the next round boundary and signal in-flight agents.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
