use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use pipecore::{AgentId, AgentSpec, ExecutionState, RegistryError, RESERVED_FIELDS};
use std::collections::{HashMap, HashSet};

/// Collection of agent specifications for one pipeline run.
///
/// Built fresh per run and never mutated while a driver is executing it.
/// `register` enforces id uniqueness and field ownership immediately;
/// everything that depends on the whole graph is checked by [`validate`],
/// which both drivers call before any agent runs, so agents may be
/// registered in any order.
///
/// [`validate`]: AgentRegistry::validate
pub struct AgentRegistry {
    agents: Vec<AgentSpec>,
    index: HashMap<AgentId, usize>,
    owners: HashMap<String, AgentId>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            index: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Register an agent specification
    pub fn register(&mut self, spec: AgentSpec) -> Result<(), RegistryError> {
        if self.index.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateId(spec.id));
        }

        for field in &spec.owns {
            if RESERVED_FIELDS.contains(&field.as_str()) {
                return Err(RegistryError::ReservedField {
                    agent: spec.id.clone(),
                    field: field.clone(),
                });
            }
            if let Some(owner) = self.owners.get(field) {
                return Err(RegistryError::FieldConflict {
                    field: field.clone(),
                    owner: owner.clone(),
                    claimant: spec.id.clone(),
                });
            }
        }

        tracing::debug!(agent = %spec.id, deps = spec.dependencies.len(), "Registering agent");
        for field in &spec.owns {
            self.owners.insert(field.clone(), spec.id.clone());
        }
        self.index.insert(spec.id.clone(), self.agents.len());
        self.agents.push(spec);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, spec: AgentSpec) -> Result<Self, RegistryError> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&AgentSpec> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Agents in registration order
    pub fn iter(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn refinement_agent(&self) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.is_refinement())
    }

    /// Check the whole graph: dependencies resolve, the refinement agent is
    /// well formed, and the dependency graph is acyclic.
    ///
    /// Refinement edges are not dependency edges, so the bounded
    /// re-execution loop never registers as a cycle.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for spec in &self.agents {
            for dep in &spec.dependencies {
                if !self.contains(&dep.target) {
                    return Err(RegistryError::UnknownDependency {
                        agent: spec.id.clone(),
                        dependency: dep.target.clone(),
                    });
                }
            }
        }

        let refiners: Vec<&AgentSpec> = self.agents.iter().filter(|a| a.is_refinement()).collect();
        if refiners.len() > 1 {
            return Err(RegistryError::MultipleRefinementAgents(
                refiners.iter().map(|a| a.id.clone()).collect(),
            ));
        }

        if let Some(refiner) = refiners.first() {
            for target in &refiner.refines {
                // Re-running a target must re-gate the refiner itself, so the
                // target has to be one of its unconditional dependencies.
                let direct = refiner
                    .dependencies
                    .iter()
                    .any(|d| &d.target == target && !d.is_conditional());
                if !direct {
                    return Err(RegistryError::InvalidRefinementTarget {
                        agent: refiner.id.clone(),
                        target: target.clone(),
                    });
                }
            }

            for spec in &self.agents {
                let unconditional = spec
                    .dependencies
                    .iter()
                    .any(|d| d.target == refiner.id && !d.is_conditional());
                if unconditional {
                    return Err(RegistryError::UnconditionalRefinementDependency {
                        agent: spec.id.clone(),
                        refinement: refiner.id.clone(),
                    });
                }
            }
        }

        let (graph, _) = self.dependency_graph();
        if toposort(&graph, None).is_err() {
            let mut members: Vec<AgentId> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| {
                    scc.len() > 1 || graph.contains_edge(scc[0], scc[0])
                })
                .flatten()
                .map(|idx| graph[idx].clone())
                .collect();
            members.sort();
            return Err(RegistryError::CyclicDependency(members));
        }

        Ok(())
    }

    /// Agents ready to run: not yet completed, every dependency completed or
    /// waived under `state`, and applicable under `state`.
    ///
    /// Sorted by ascending priority, then id, which is also merge order.
    pub fn ready_agents(
        &self,
        completed: &HashSet<AgentId>,
        state: &ExecutionState,
    ) -> Vec<&AgentSpec> {
        let mut ready: Vec<&AgentSpec> = self
            .agents
            .iter()
            .filter(|spec| !completed.contains(&spec.id))
            .filter(|spec| {
                spec.dependencies
                    .iter()
                    .all(|dep| completed.contains(&dep.target) || dep.is_waived(state))
            })
            .filter(|spec| spec.is_applicable(state))
            .collect();
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        ready
    }

    /// Dependencies of `spec` that still gate it under `state`.
    pub fn unmet_dependencies<'a>(
        &self,
        spec: &'a AgentSpec,
        completed: &HashSet<AgentId>,
        state: &ExecutionState,
    ) -> Vec<&'a str> {
        spec.dependencies
            .iter()
            .filter(|dep| !completed.contains(&dep.target) && !dep.is_waived(state))
            .map(|dep| dep.target.as_str())
            .collect()
    }

    /// A fixed, dependency-respecting order over every agent.
    ///
    /// Agents are grouped by depth (longest dependency chain, conditional
    /// edges included); within a depth the refinement agent goes last and
    /// the rest follow priority, then id.
    pub fn topological_order(&self) -> Result<Vec<AgentId>, RegistryError> {
        self.validate()?;
        let (graph, node_to_index) = self.dependency_graph();
        let sorted = toposort(&graph, None)
            .map_err(|cycle| RegistryError::CyclicDependency(vec![graph[cycle.node_id()].clone()]))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in &sorted {
            let level = graph
                .neighbors_directed(*idx, petgraph::Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*idx, level);
        }

        let mut order: Vec<&AgentSpec> = self.agents.iter().collect();
        order.sort_by_key(|spec| {
            let level = node_to_index
                .get(&spec.id)
                .and_then(|idx| depth.get(idx))
                .copied()
                .unwrap_or(0);
            (level, spec.is_refinement(), spec.priority, spec.id.clone())
        });
        Ok(order.into_iter().map(|spec| spec.id.clone()).collect())
    }

    /// Graph of declared dependency edges (dependency -> dependent).
    /// Unknown targets are skipped; `validate` reports them.
    fn dependency_graph(&self) -> (DiGraph<AgentId, ()>, HashMap<AgentId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();

        for spec in &self.agents {
            let idx = graph.add_node(spec.id.clone());
            node_to_index.insert(spec.id.clone(), idx);
        }

        for spec in &self.agents {
            let to_idx = node_to_index[&spec.id];
            for dep in &spec.dependencies {
                if let Some(from_idx) = node_to_index.get(&dep.target) {
                    graph.add_edge(*from_idx, to_idx, ());
                }
            }
        }

        (graph, node_to_index)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipecore::{predicate, AgentContext, FnAgent, StateDelta};
    use std::sync::Arc;

    fn spec(id: &str) -> AgentSpec {
        let agent = FnAgent::new(|_ctx: AgentContext| async { Ok(StateDelta::new()) });
        AgentSpec::new(id, Arc::new(agent))
    }

    fn ids(specs: Vec<&AgentSpec>) -> Vec<&str> {
        specs.into_iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(spec("a")).unwrap();
        let err = registry.register(spec("a")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("a".to_string()));
    }

    #[test]
    fn unknown_dependency_is_reported_at_validation() {
        let mut registry = AgentRegistry::new();
        registry.register(spec("b").depends_on("a")).unwrap();
        assert_eq!(
            registry.validate(),
            Err(RegistryError::UnknownDependency {
                agent: "b".to_string(),
                dependency: "a".to_string(),
            })
        );

        registry.register(spec("a")).unwrap();
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn overlapping_field_ownership_is_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(spec("a").owns("score")).unwrap();
        let err = registry.register(spec("b").owns("score")).unwrap_err();
        assert!(matches!(err, RegistryError::FieldConflict { ref owner, .. } if owner == "a"));

        let err = registry
            .register(spec("c").owns(pipecore::REFINEMENT_COUNT))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ReservedField { .. }));
    }

    #[test]
    fn cycles_are_named() {
        let mut registry = AgentRegistry::new();
        registry.register(spec("a").depends_on("c")).unwrap();
        registry.register(spec("b").depends_on("a")).unwrap();
        registry.register(spec("c").depends_on("b")).unwrap();
        registry.register(spec("d")).unwrap();

        assert_eq!(
            registry.validate(),
            Err(RegistryError::CyclicDependency(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ]))
        );
    }

    #[test]
    fn refinement_edge_is_not_a_cycle() {
        let quality = predicate(|_| false);
        let mut registry = AgentRegistry::new();
        registry.register(spec("draft")).unwrap();
        let refiner = AgentSpec::refinement("refine", spec("x").agent, quality.clone())
            .depends_on("draft")
            .refines("draft");
        registry.register(refiner).unwrap();
        registry
            .register(spec("publish").depends_on_if("refine", predicate(|_| true)))
            .unwrap();

        assert!(registry.validate().is_ok());
    }

    #[test]
    fn refinement_rules_are_enforced() {
        let quality = predicate(|_| false);
        let mut registry = AgentRegistry::new();
        registry.register(spec("draft")).unwrap();
        registry
            .register(AgentSpec::refinement("refine", spec("x").agent, quality).refines("draft"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(RegistryError::InvalidRefinementTarget { .. })
        ));

        let quality = predicate(|_| false);
        let mut registry = AgentRegistry::new();
        registry.register(spec("draft")).unwrap();
        registry
            .register(
                AgentSpec::refinement("refine", spec("x").agent, quality)
                    .depends_on("draft")
                    .refines("draft"),
            )
            .unwrap();
        registry.register(spec("publish").depends_on("refine")).unwrap();
        assert!(matches!(
            registry.validate(),
            Err(RegistryError::UnconditionalRefinementDependency { .. })
        ));
    }

    #[test]
    fn ready_agents_follow_completion_and_waivers() {
        let mut registry = AgentRegistry::new();
        registry
            .register(spec("c").depends_on("a").depends_on("b"))
            .unwrap();
        registry.register(spec("b").with_priority(-1)).unwrap();
        registry.register(spec("a")).unwrap();
        registry
            .register(spec("w").depends_on_if("c", predicate(|s| s.contains("gate"))))
            .unwrap();

        let state = ExecutionState::new();
        let mut completed = HashSet::new();
        assert_eq!(ids(registry.ready_agents(&completed, &state)), vec!["b", "a", "w"]);

        completed.insert("a".to_string());
        completed.insert("b".to_string());
        completed.insert("w".to_string());
        assert_eq!(ids(registry.ready_agents(&completed, &state)), vec!["c"]);

        let gated = ExecutionState::new().with_field("gate", true);
        completed.remove("w");
        assert_eq!(ids(registry.ready_agents(&completed, &gated)), vec!["c"]);
    }

    #[test]
    fn inapplicable_agents_are_never_ready() {
        let mut registry = AgentRegistry::new();
        registry
            .register(spec("a").applicable_when(predicate(|s| s.contains("enabled"))))
            .unwrap();

        let completed = HashSet::new();
        assert!(registry.ready_agents(&completed, &ExecutionState::new()).is_empty());
        let enabled = ExecutionState::new().with_field("enabled", true);
        assert_eq!(ids(registry.ready_agents(&completed, &enabled)), vec!["a"]);
    }

    #[test]
    fn topological_order_groups_by_depth() {
        let quality = predicate(|_| false);
        let mut registry = AgentRegistry::new();
        registry
            .register(
                spec("report")
                    .depends_on_if("refine", predicate(|_| true))
                    .depends_on("draft"),
            )
            .unwrap();
        registry.register(spec("notes").depends_on("draft")).unwrap();
        registry
            .register(
                AgentSpec::refinement("refine", spec("x").agent, quality)
                    .depends_on("draft")
                    .refines("draft")
                    .with_priority(-10),
            )
            .unwrap();
        registry.register(spec("draft").depends_on("intake")).unwrap();
        registry.register(spec("intake")).unwrap();

        assert_eq!(
            registry.topological_order().unwrap(),
            vec!["intake", "draft", "notes", "refine", "report"]
        );
    }
}
