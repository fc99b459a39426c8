use crate::dispatch::{deadline_for, invoke, RunLedger};
use crate::driver::{Driver, ExecutionHandle, ExecutorConfig};
use crate::registry::AgentRegistry;
use crate::result::ExecutionResult;
use async_trait::async_trait;
use pipecore::{AgentId, AgentSpec, EventBus, ExecutionState, PipelineError, RegistryError};
use std::sync::Arc;

/// Legacy driver: one agent at a time, in a fixed topological order.
///
/// Kept as an operational fallback for the concurrent executor. It runs
/// the same specs through the same commit logic, so for agents returning
/// fixed deltas both drivers end in the same state. The plan is walked in
/// passes until a pass commits nothing, so agents that only become
/// applicable after a refinement still get their turn.
pub struct SequentialDriver {
    config: ExecutorConfig,
}

impl SequentialDriver {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(
        &self,
        registry: &AgentRegistry,
        initial_state: ExecutionState,
        event_bus: &EventBus,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionResult, PipelineError> {
        let order = registry.topological_order()?;

        let mut ledger = RunLedger::new(
            self.name(),
            initial_state,
            self.config.on_failure,
            event_bus,
        );
        ledger.emit_run_started(registry.len());

        if let Err(e) = self.walk(registry, &order, &mut ledger, handle).await {
            ledger.emit_run_completed(false);
            return Err(e);
        }

        ledger.finish(registry)
    }

    async fn walk(
        &self,
        registry: &AgentRegistry,
        order: &[AgentId],
        ledger: &mut RunLedger<'_>,
        handle: &ExecutionHandle,
    ) -> Result<(), PipelineError> {
        let mut pass = 1;
        while self.sweep(registry, order, ledger, handle).await? {
            pass += 1;
            tracing::debug!(pass, "Re-scanning plan");
        }
        tracing::debug!(passes = pass, "Plan settled");
        Ok(())
    }

    /// One walk over the plan. Returns whether any agent committed.
    async fn sweep(
        &self,
        registry: &AgentRegistry,
        order: &[AgentId],
        ledger: &mut RunLedger<'_>,
        handle: &ExecutionHandle,
    ) -> Result<bool, PipelineError> {
        let mut progressed = false;
        for id in order {
            let spec = lookup(registry, id)?;
            let committed = if spec.is_refinement() {
                self.refine(registry, spec, order, ledger, handle).await?
            } else {
                self.step(spec, ledger, handle).await?
            };
            progressed |= committed;
        }
        Ok(progressed)
    }

    /// Run the refinement agent and its targets until it stops applying.
    /// Returns whether the refinement agent committed at least once.
    async fn refine(
        &self,
        registry: &AgentRegistry,
        refiner: &AgentSpec,
        order: &[AgentId],
        ledger: &mut RunLedger<'_>,
        handle: &ExecutionHandle,
    ) -> Result<bool, PipelineError> {
        let mut refined = false;
        while self.step(refiner, ledger, handle).await? {
            refined = true;
            for id in order.iter().filter(|id| refiner.refines.contains(id)) {
                self.step(lookup(registry, id)?, ledger, handle).await?;
            }
        }
        Ok(refined)
    }

    /// Run `spec` if it is pending, applicable and ungated. Returns whether
    /// it committed.
    async fn step(
        &self,
        spec: &AgentSpec,
        ledger: &mut RunLedger<'_>,
        handle: &ExecutionHandle,
    ) -> Result<bool, PipelineError> {
        if handle.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if ledger.completed.contains(&spec.id)
            || ledger.is_degraded(&spec.id)
            || !spec.is_applicable(&ledger.state)
        {
            return Ok(false);
        }
        let gated = spec.dependencies.iter().any(|dep| {
            !ledger.completed.contains(&dep.target) && !dep.is_waived(&ledger.state)
        });
        if gated {
            tracing::debug!(agent = %spec.id, "Dependencies unmet, leaving for settlement");
            return Ok(false);
        }

        let round = ledger.frontiers.len() + 1;
        if round > self.config.max_rounds {
            return Err(PipelineError::RoundLimit(self.config.max_rounds));
        }
        let ids = vec![spec.id.clone()];
        ledger.emit_round_started(round, &ids);
        ledger.emit_agent_started(&spec.id, round);

        let snapshot = Arc::new(ledger.state.clone());
        let ctx = ledger.context_for(spec, snapshot, handle);
        let invocation = invoke(spec.agent.clone(), ctx, deadline_for(spec, &self.config)).await;

        let runs_before = ledger.execution_order.len();
        ledger.commit(spec, round, invocation)?;
        ledger.frontiers.push(ids);
        Ok(ledger.execution_order.len() > runs_before)
    }
}

fn lookup<'r>(registry: &'r AgentRegistry, id: &str) -> Result<&'r AgentSpec, PipelineError> {
    registry
        .get(id)
        .ok_or_else(|| RegistryError::NotFound(id.to_string()).into())
}

impl Default for SequentialDriver {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl Driver for SequentialDriver {
    fn name(&self) -> &'static str {
        "sequential"
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
