use crate::dispatch::{deadline_for, invoke, RunLedger};
use crate::driver::{Driver, ExecutionHandle, ExecutorConfig};
use crate::registry::AgentRegistry;
use crate::result::ExecutionResult;
use async_trait::async_trait;
use futures::future::join_all;
use pipecore::{AgentId, AgentSpec, EventBus, ExecutionState, PipelineError};
use std::sync::Arc;

/// Executes a registry as rounds of concurrent, mutually independent agents
pub struct DagExecutor {
    config: ExecutorConfig,
}

impl DagExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute the registry from `initial_state` until no agent is ready
    pub async fn execute(
        &self,
        registry: &AgentRegistry,
        initial_state: ExecutionState,
        event_bus: &EventBus,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionResult, PipelineError> {
        registry.validate()?;

        let mut ledger = RunLedger::new(
            self.name(),
            initial_state,
            self.config.on_failure,
            event_bus,
        );
        ledger.emit_run_started(registry.len());

        if let Err(e) = self.execute_rounds(registry, &mut ledger, handle).await {
            ledger.emit_run_completed(false);
            return Err(e);
        }

        ledger.finish(registry)
    }

    async fn execute_rounds(
        &self,
        registry: &AgentRegistry,
        ledger: &mut RunLedger<'_>,
        handle: &ExecutionHandle,
    ) -> Result<(), PipelineError> {
        let mut round = 0;

        loop {
            if handle.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            // Predicates see one immutable snapshot per round.
            let snapshot = Arc::new(ledger.state.clone());
            let frontier: Vec<&AgentSpec> = registry
                .ready_agents(&ledger.completed, &snapshot)
                .into_iter()
                .filter(|spec| !ledger.is_degraded(&spec.id))
                .collect();

            if frontier.is_empty() {
                tracing::debug!(rounds = round, "No agents ready, run is complete");
                return Ok(());
            }

            round += 1;
            if round > self.config.max_rounds {
                return Err(PipelineError::RoundLimit(self.config.max_rounds));
            }

            let ids: Vec<AgentId> = frontier.iter().map(|spec| spec.id.clone()).collect();
            ledger.emit_round_started(round, &ids);

            let tasks = frontier.iter().map(|spec| {
                let ctx = ledger.context_for(spec, snapshot.clone(), handle);
                let deadline = deadline_for(spec, &self.config);
                ledger.emit_agent_started(&spec.id, round);
                tokio::spawn(invoke(spec.agent.clone(), ctx, deadline))
            });

            // Full barrier: nothing merges until the whole frontier is back.
            let results = join_all(tasks).await;

            for (spec, joined) in frontier.iter().zip(results) {
                let invocation = joined
                    .map_err(|e| PipelineError::Execution(format!("Task join error: {}", e)))?;
                ledger.commit(spec, round, invocation)?;
            }
            ledger.frontiers.push(ids);
        }
    }
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl Driver for DagExecutor {
    fn name(&self) -> &'static str {
        "dag"
    }

    async fn run(
        &self,
        registry: &AgentRegistry,
        initial_state: ExecutionState,
        event_bus: &EventBus,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionResult, PipelineError> {
        self.execute(registry, initial_state, event_bus, handle).await
    }
}
