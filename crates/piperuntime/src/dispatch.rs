//! Agent invocation and state commit shared by both drivers.

use crate::driver::{ExecutionHandle, ExecutorConfig, FailurePolicy};
use crate::registry::AgentRegistry;
use crate::result::{AgentTiming, ExecutionResult};
use chrono::Utc;
use pipecore::{
    Agent, AgentContext, AgentError, AgentId, AgentSpec, EventBus, ExecutionEvent, ExecutionId,
    ExecutionState, PipelineError, StateDelta, REFINEMENT_COUNT,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Outcome of one agent call
pub(crate) struct Invocation {
    pub outcome: Result<StateDelta, AgentError>,
    pub duration: Duration,
}

/// Run one agent with its deadline, racing the run's cancellation token.
pub(crate) async fn invoke(
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
    deadline: Option<Duration>,
) -> Invocation {
    let start = Instant::now();
    let cancellation = ctx.cancellation.clone();

    let call = async move {
        match deadline {
            Some(limit) => match timeout(limit, agent.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            },
            None => agent.execute(ctx).await,
        }
    };

    let outcome = tokio::select! {
        _ = cancellation.cancelled() => Err(AgentError::Cancelled),
        result = call => result,
    };

    Invocation {
        outcome,
        duration: start.elapsed(),
    }
}

/// Effective deadline for `spec` under `config`
pub(crate) fn deadline_for(spec: &AgentSpec, config: &ExecutorConfig) -> Option<Duration> {
    spec.timeout.or(config.agent_timeout)
}

/// Mutable bookkeeping for one run, owned by the coordinating task.
///
/// All state mutation happens in [`RunLedger::commit`], one agent at a
/// time, after the driver has collected that agent's result.
pub(crate) struct RunLedger<'a> {
    pub execution_id: ExecutionId,
    pub state: ExecutionState,
    pub completed: HashSet<AgentId>,
    pub degraded: Vec<AgentId>,
    pub execution_order: Vec<AgentId>,
    pub frontiers: Vec<Vec<AgentId>>,
    pub timings: Vec<AgentTiming>,
    pub refinements: u64,
    policy: FailurePolicy,
    event_bus: &'a EventBus,
    driver: &'static str,
    started: Instant,
}

impl<'a> RunLedger<'a> {
    pub fn new(
        driver: &'static str,
        state: ExecutionState,
        policy: FailurePolicy,
        event_bus: &'a EventBus,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new_v4(),
            state,
            completed: HashSet::new(),
            degraded: Vec::new(),
            execution_order: Vec::new(),
            frontiers: Vec::new(),
            timings: Vec::new(),
            refinements: 0,
            policy,
            event_bus,
            driver,
            started: Instant::now(),
        }
    }

    pub fn is_degraded(&self, agent_id: &str) -> bool {
        self.degraded.iter().any(|id| id == agent_id)
    }

    pub fn has_run(&self, agent_id: &str) -> bool {
        self.execution_order.iter().any(|id| id == agent_id)
    }

    pub fn context_for(
        &self,
        spec: &AgentSpec,
        snapshot: Arc<ExecutionState>,
        handle: &ExecutionHandle,
    ) -> AgentContext {
        AgentContext::new(
            spec.id.clone(),
            snapshot,
            self.event_bus.create_emitter(self.execution_id, &spec.id),
            handle.token(),
        )
    }

    pub fn emit_run_started(&self, agents: usize) {
        tracing::info!(execution_id = %self.execution_id, driver = self.driver, agents, "Starting pipeline run");
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id: self.execution_id,
            driver: self.driver.to_string(),
            agents,
            timestamp: Utc::now(),
        });
    }

    pub fn emit_round_started(&self, round: usize, agents: &[AgentId]) {
        tracing::debug!(round, agents = ?agents, "Dispatching frontier");
        self.event_bus.emit(ExecutionEvent::RoundStarted {
            execution_id: self.execution_id,
            round,
            agents: agents.to_vec(),
            timestamp: Utc::now(),
        });
    }

    pub fn emit_agent_started(&self, agent_id: &str, round: usize) {
        self.event_bus.emit(ExecutionEvent::AgentStarted {
            execution_id: self.execution_id,
            agent_id: agent_id.to_string(),
            round,
            timestamp: Utc::now(),
        });
    }

    pub fn emit_run_completed(&self, success: bool) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(execution_id = %self.execution_id, success, duration_ms, "Pipeline run finished");
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id: self.execution_id,
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    /// Merge one agent's result into the state.
    ///
    /// Writes outside the agent's owned fields count as an agent failure.
    /// A successful refinement agent bumps the refinement counter and
    /// un-completes its targets so the next round re-runs them.
    pub fn commit(
        &mut self,
        spec: &AgentSpec,
        round: usize,
        invocation: Invocation,
    ) -> Result<(), PipelineError> {
        let Invocation { outcome, duration } = invocation;
        self.timings.push(AgentTiming {
            agent_id: spec.id.clone(),
            round,
            duration,
        });

        let outcome = outcome.and_then(|delta| {
            let stray = delta
                .field_names()
                .find(|field| !spec.owns_field(field))
                .map(str::to_string);
            match stray {
                Some(field) => Err(AgentError::OwnershipViolation { field }),
                None => Ok(delta),
            }
        });

        let delta = match outcome {
            Ok(delta) => delta,
            Err(AgentError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(error) => return self.fail(spec, error),
        };

        let fields: Vec<String> = delta.field_names().map(str::to_string).collect();
        self.state.apply(delta);
        self.execution_order.push(spec.id.clone());

        let duration_ms = duration.as_millis() as u64;
        tracing::info!(agent = %spec.id, round, duration_ms, "Agent completed");
        self.event_bus.emit(ExecutionEvent::AgentCompleted {
            execution_id: self.execution_id,
            agent_id: spec.id.clone(),
            fields,
            duration_ms,
            timestamp: Utc::now(),
        });

        if spec.is_refinement() {
            self.record_refinement(spec);
        } else {
            self.completed.insert(spec.id.clone());
        }
        Ok(())
    }

    fn fail(&mut self, spec: &AgentSpec, error: AgentError) -> Result<(), PipelineError> {
        match self.policy {
            FailurePolicy::Abort => {
                tracing::error!(agent = %spec.id, error = %error, "Agent failed");
                self.event_bus.emit(ExecutionEvent::AgentFailed {
                    execution_id: self.execution_id,
                    agent_id: spec.id.clone(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(PipelineError::agent(spec.id.clone(), error))
            }
            FailurePolicy::Degrade => {
                tracing::warn!(agent = %spec.id, error = %error, "Agent degraded");
                self.event_bus.emit(ExecutionEvent::AgentDegraded {
                    execution_id: self.execution_id,
                    agent_id: spec.id.clone(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                self.degraded.push(spec.id.clone());
                Ok(())
            }
        }
    }

    fn record_refinement(&mut self, spec: &AgentSpec) {
        let count = self.state.refinement_count() + 1;
        self.state.set(REFINEMENT_COUNT, count);
        self.refinements += 1;

        for target in &spec.refines {
            self.completed.remove(target);
        }

        let max = self.state.max_refinements();
        tracing::info!(agent = %spec.id, count, max, rerun = ?spec.refines, "Refinement triggered");
        self.event_bus.emit(ExecutionEvent::RefinementTriggered {
            execution_id: self.execution_id,
            agent_id: spec.id.clone(),
            count,
            max,
            rerun: spec.refines.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Classify every agent that never completed once no more progress is
    /// possible.
    ///
    /// Returns `(skipped, blocked)`. Only inapplicable agents are skipped.
    /// Applicable agents still gated by a dependency are blocked when the
    /// gate traces back to a degraded agent; otherwise the graph cannot be
    /// satisfied and the run fails with `UnsatisfiableDependencies`. An
    /// applicable, ungated agent left pending means the driver stopped
    /// early and is reported as an execution error.
    fn classify(
        &self,
        registry: &AgentRegistry,
    ) -> Result<(Vec<AgentId>, Vec<AgentId>), PipelineError> {
        let mut skipped = Vec::new();
        let mut pending = Vec::new();
        let mut gated: Vec<(&AgentSpec, Vec<&str>)> = Vec::new();

        for spec in registry.iter() {
            if self.completed.contains(&spec.id) || self.is_degraded(&spec.id) {
                continue;
            }
            if !spec.is_applicable(&self.state) {
                if !self.has_run(&spec.id) {
                    skipped.push(spec.id.clone());
                }
                continue;
            }
            let unmet = registry.unmet_dependencies(spec, &self.completed, &self.state);
            if unmet.is_empty() {
                pending.push(spec.id.clone());
                continue;
            }
            gated.push((spec, unmet));
        }

        if !pending.is_empty() {
            tracing::error!(driver = self.driver, agents = ?pending, "Driver settled with runnable agents");
            return Err(PipelineError::Execution(format!(
                "{} driver stopped with runnable agents: {}",
                self.driver,
                pending.join(", ")
            )));
        }

        let mut blocked: Vec<AgentId> = Vec::new();
        loop {
            let before = blocked.len();
            for (spec, unmet) in &gated {
                if blocked.contains(&spec.id) {
                    continue;
                }
                let hits_degraded = unmet
                    .iter()
                    .any(|dep| self.is_degraded(dep) || blocked.iter().any(|b| b == dep));
                if hits_degraded {
                    blocked.push(spec.id.clone());
                }
            }
            if blocked.len() == before {
                break;
            }
        }

        let mut stuck: Vec<AgentId> = gated
            .iter()
            .map(|(spec, _)| spec.id.clone())
            .filter(|id| !blocked.contains(id))
            .collect();
        if !stuck.is_empty() {
            stuck.sort();
            tracing::error!(agents = ?stuck, "No progress possible: unsatisfiable dependencies");
            return Err(PipelineError::UnsatisfiableDependencies(stuck));
        }

        for id in &blocked {
            tracing::warn!(agent = %id, "Agent blocked by degraded dependency");
        }
        Ok((skipped, blocked))
    }

    /// Close the run: classify leftovers, emit completion and build the result.
    pub fn finish(self, registry: &AgentRegistry) -> Result<ExecutionResult, PipelineError> {
        let (skipped, blocked) = match self.classify(registry) {
            Ok(classified) => classified,
            Err(e) => {
                self.emit_run_completed(false);
                return Err(e);
            }
        };
        self.emit_run_completed(true);

        Ok(ExecutionResult {
            execution_id: self.execution_id,
            driver: self.driver,
            total_elapsed: self.started.elapsed(),
            final_state: self.state,
            execution_order: self.execution_order,
            frontiers: self.frontiers,
            timings: self.timings,
            refinements: self.refinements,
            degraded: self.degraded,
            skipped,
            blocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipecore::{predicate, FnAgent};

    fn spec(id: &str) -> AgentSpec {
        let agent = FnAgent::new(|_ctx: AgentContext| async { Ok(StateDelta::new()) });
        AgentSpec::new(id, Arc::new(agent))
    }

    fn registry(specs: Vec<AgentSpec>) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        registry
    }

    #[test]
    fn inapplicable_agents_are_skipped() {
        let bus = EventBus::new(10);
        let registry = registry(vec![
            spec("a"),
            spec("b").applicable_when(predicate(|s| s.contains("enabled"))),
        ]);
        let mut ledger = RunLedger::new("test", ExecutionState::new(), FailurePolicy::Abort, &bus);
        ledger.completed.insert("a".to_string());
        ledger.execution_order.push("a".to_string());

        let result = ledger.finish(&registry).unwrap();
        assert_eq!(result.skipped, vec!["b"]);
        assert!(result.blocked.is_empty());
    }

    #[test]
    fn runnable_agents_left_pending_fail_the_run() {
        let bus = EventBus::new(10);
        let registry = registry(vec![spec("a"), spec("b").depends_on("a"), spec("c")]);
        let mut ledger = RunLedger::new("test", ExecutionState::new(), FailurePolicy::Abort, &bus);
        ledger.completed.insert("a".to_string());
        ledger.execution_order.push("a".to_string());

        match ledger.finish(&registry) {
            Err(PipelineError::Execution(message)) => {
                assert_eq!(message, "test driver stopped with runnable agents: b, c");
            }
            other => panic!("expected execution error, got {:?}", other.map(|r| r.skipped)),
        }
    }

    #[test]
    fn gated_agents_without_degraded_cause_are_unsatisfiable() {
        let bus = EventBus::new(10);
        let registry = registry(vec![
            spec("a").applicable_when(predicate(|s| s.contains("enabled"))),
            spec("b").depends_on("a"),
        ]);
        let ledger = RunLedger::new("test", ExecutionState::new(), FailurePolicy::Abort, &bus);

        match ledger.finish(&registry) {
            Err(PipelineError::UnsatisfiableDependencies(stuck)) => assert_eq!(stuck, vec!["b"]),
            other => panic!("expected unsatisfiable, got {:?}", other.map(|r| r.skipped)),
        }
    }
}
