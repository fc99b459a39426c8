use crate::{Agent, AgentId, ExecutionState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Pure, side-effect-free guard evaluated against a state snapshot.
pub type Predicate = Arc<dyn Fn(&ExecutionState) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&ExecutionState) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One declared dependency edge, optionally guarded by a condition.
#[derive(Clone)]
pub struct Dependency {
    pub target: AgentId,
    pub condition: Option<Predicate>,
}

impl Dependency {
    pub fn on(target: impl Into<AgentId>) -> Self {
        Self {
            target: target.into(),
            condition: None,
        }
    }

    pub fn on_if(target: impl Into<AgentId>, condition: Predicate) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition),
        }
    }

    /// A dependency is waived when its condition evaluates false.
    pub fn is_waived(&self, state: &ExecutionState) -> bool {
        self.condition.as_ref().is_some_and(|cond| !cond(state))
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("target", &self.target)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Declarative description of one stage in a pipeline run
#[derive(Clone)]
pub struct AgentSpec {
    pub id: AgentId,
    pub dependencies: Vec<Dependency>,
    pub applicability: Option<Predicate>,
    /// Merge-order tie-break; lower merges first. Never affects correctness.
    pub priority: i32,
    /// Fields this agent is allowed to write.
    pub owns: Vec<String>,
    /// Agents to re-run after this one executes. Non-empty only for the
    /// refinement agent.
    pub refines: Vec<AgentId>,
    /// Overrides the runtime-wide deadline for this agent.
    pub timeout: Option<Duration>,
    pub agent: Arc<dyn Agent>,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, agent: Arc<dyn Agent>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            applicability: None,
            priority: 0,
            owns: Vec::new(),
            refines: Vec::new(),
            timeout: None,
            agent,
        }
    }

    /// Build the refinement agent for a quality predicate.
    ///
    /// It is applicable only while `quality` is false and the state's
    /// refinement counter is below its ceiling.
    pub fn refinement(id: impl Into<AgentId>, agent: Arc<dyn Agent>, quality: Predicate) -> Self {
        let mut spec = Self::new(id, agent);
        spec.applicability = Some(Arc::new(move |state: &ExecutionState| {
            !quality(state) && state.refinements_remaining()
        }));
        spec
    }

    pub fn depends_on(mut self, target: impl Into<AgentId>) -> Self {
        self.dependencies.push(Dependency::on(target));
        self
    }

    pub fn depends_on_if(mut self, target: impl Into<AgentId>, condition: Predicate) -> Self {
        self.dependencies.push(Dependency::on_if(target, condition));
        self
    }

    pub fn applicable_when(mut self, condition: Predicate) -> Self {
        self.applicability = Some(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn owns(mut self, field: impl Into<String>) -> Self {
        self.owns.push(field.into());
        self
    }

    pub fn refines(mut self, target: impl Into<AgentId>) -> Self {
        self.refines.push(target.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_applicable(&self, state: &ExecutionState) -> bool {
        self.applicability.as_ref().map_or(true, |cond| cond(state))
    }

    pub fn is_refinement(&self) -> bool {
        !self.refines.is_empty()
    }

    pub fn owns_field(&self, field: &str) -> bool {
        self.owns.iter().any(|f| f == field)
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.target.as_str())
    }

    /// Whether this agent declares any edge (waived or not) to `target`.
    pub fn depends_on_id(&self, target: &str) -> bool {
        self.dependencies.iter().any(|d| d.target == target)
    }
}

impl fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSpec")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("owns", &self.owns)
            .field("refines", &self.refines)
            .field("timeout", &self.timeout)
            .finish()
    }
}
