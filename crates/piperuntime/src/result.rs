use pipecore::{AgentId, ExecutionId, ExecutionState};
use std::time::Duration;

/// Time spent in one agent execution
#[derive(Debug, Clone)]
pub struct AgentTiming {
    pub agent_id: AgentId,
    /// Round the execution belonged to (1-based).
    pub round: usize,
    pub duration: Duration,
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub driver: &'static str,
    pub final_state: ExecutionState,
    /// Ids in commit order; an agent re-run by refinement appears again.
    pub execution_order: Vec<AgentId>,
    /// Agents dispatched in each round. The sequential driver produces one
    /// single-member frontier per agent call.
    pub frontiers: Vec<Vec<AgentId>>,
    pub timings: Vec<AgentTiming>,
    pub total_elapsed: Duration,
    pub refinements: u64,
    /// Agents that failed or timed out under the degrade policy.
    pub degraded: Vec<AgentId>,
    /// Agents never run because they were not applicable.
    pub skipped: Vec<AgentId>,
    /// Agents never run because a degraded agent gated them.
    pub blocked: Vec<AgentId>,
}

impl ExecutionResult {
    /// Sum of every agent's own duration
    pub fn busy_time(&self) -> Duration {
        self.timings.iter().map(|t| t.duration).sum()
    }

    /// Barrier-to-barrier wall time: the slowest agent of each round, summed.
    pub fn critical_path(&self) -> Duration {
        let rounds = self.timings.iter().map(|t| t.round).max().unwrap_or(0);
        (1..=rounds)
            .map(|round| {
                self.timings
                    .iter()
                    .filter(|t| t.round == round)
                    .map(|t| t.duration)
                    .max()
                    .unwrap_or_default()
            })
            .sum()
    }

    /// `busy_time / critical_path`; 1.0 for a fully sequential run.
    pub fn parallelization_ratio(&self) -> f64 {
        let wall = self.critical_path().as_secs_f64();
        if wall <= 0.0 {
            return 1.0;
        }
        self.busy_time().as_secs_f64() / wall
    }

    /// Number of times `agent_id` committed
    pub fn executions_of(&self, agent_id: &str) -> usize {
        self.execution_order.iter().filter(|id| *id == agent_id).count()
    }
}
