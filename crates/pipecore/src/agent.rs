use crate::{events::EventEmitter, AgentError, ExecutionState, StateDelta, Value};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type AgentId = String;

/// Core trait that every analysis stage implements
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute against a read-only state snapshot and return the fields produced.
    ///
    /// Implementations may call external services and need not be
    /// deterministic, but must never write a field they do not own.
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError>;

    /// Optional: short human-readable description for listings
    fn description(&self) -> &str {
        ""
    }
}

/// Execution context passed to each agent
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: AgentId,

    /// Snapshot of the state taken at the start of the round
    pub state: Arc<ExecutionState>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled
    pub cancellation: CancellationToken,
}

impl AgentContext {
    pub fn new(
        agent_id: impl Into<AgentId>,
        state: Arc<ExecutionState>,
        events: EventEmitter,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            state,
            events,
            cancellation,
        }
    }

    /// Get a state field or return error
    pub fn require(&self, name: &str) -> Result<&Value, AgentError> {
        self.state.require(name)
    }

    /// Get a state field if present
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    /// Fail with `Cancelled` if the run has been cancelled
    pub fn check_cancelled(&self) -> Result<(), AgentError> {
        if self.cancellation.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Adapter turning an async closure into an [`Agent`].
///
/// Lets a stage's business logic live in a plain function that either
/// driver can invoke.
pub struct FnAgent<F> {
    description: String,
    func: F,
}

impl<F, Fut> FnAgent<F>
where
    F: Fn(AgentContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<StateDelta, AgentError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            description: String::new(),
            func,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(AgentContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<StateDelta, AgentError>> + Send,
{
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        (self.func)(ctx).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}
