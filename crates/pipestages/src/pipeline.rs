use crate::analysis::{DocumentAnalysis, ExtractStage};
use crate::fields;
use crate::reasoning::ReasoningService;
use crate::synthesis::{CritiqueStage, ReportStage, SynthesisStage};
use pipecore::{predicate, AgentSpec, ExecutionState, Predicate, RegistryError, Value};
use piperuntime::AgentRegistry;
use std::collections::HashSet;
use std::sync::Arc;

/// Minimum synthesis confidence accepted without another revision
pub const QUALITY_THRESHOLD: f64 = 0.75;

pub const EXTRACT: &str = "extract";
pub const SENTIMENT: &str = "sentiment";
pub const RISK: &str = "risk";
pub const COMPLIANCE: &str = "compliance";
pub const SYNTHESIS: &str = "synthesis";
pub const CRITIQUE: &str = "critique";
pub const REPORT: &str = "report";

/// Stage ids in plan order
pub const STAGES: [&str; 7] = [EXTRACT, SENTIMENT, RISK, COMPLIANCE, SYNTHESIS, CRITIQUE, REPORT];

/// Whether extraction flagged the document as touching regulated data
pub fn is_regulated(state: &ExecutionState) -> bool {
    state
        .get(fields::EXTRACTION)
        .and_then(|extraction| extraction.get("regulated"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Whether the current synthesis is confident enough to publish
pub fn quality_passes(state: &ExecutionState) -> bool {
    state
        .get(fields::SYNTHESIS)
        .and_then(|synthesis| synthesis.get("confidence"))
        .and_then(Value::as_f64)
        .is_some_and(|confidence| confidence >= QUALITY_THRESHOLD)
}

/// True while the critique agent may still request another revision
pub fn refinement_pending(state: &ExecutionState) -> bool {
    !quality_passes(state) && state.refinements_remaining()
}

/// Builds the document-review registry.
///
/// A fresh registry is built per run; stages can be left out to run a
/// partial review (assembly then reports what is missing).
pub struct ReviewPipeline {
    reasoner: Arc<dyn ReasoningService>,
    excluded: HashSet<&'static str>,
}

impl ReviewPipeline {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            reasoner,
            excluded: HashSet::new(),
        }
    }

    /// Leave a stage out of the registry
    pub fn without(mut self, stage: &'static str) -> Self {
        self.excluded.insert(stage);
        self
    }

    pub fn specs(&self) -> Vec<AgentSpec> {
        let reasoner = &self.reasoner;
        let regulated: Predicate = predicate(is_regulated);

        vec![
            AgentSpec::new(EXTRACT, Arc::new(ExtractStage::new(reasoner.clone())))
                .owns(fields::EXTRACTION),
            AgentSpec::new(SENTIMENT, Arc::new(DocumentAnalysis::sentiment(reasoner.clone())))
                .depends_on(EXTRACT)
                .owns(fields::SENTIMENT)
                .with_priority(10),
            AgentSpec::new(RISK, Arc::new(DocumentAnalysis::risk(reasoner.clone())))
                .depends_on(EXTRACT)
                .owns(fields::RISK)
                .with_priority(20),
            AgentSpec::new(COMPLIANCE, Arc::new(DocumentAnalysis::compliance(reasoner.clone())))
                .depends_on(RISK)
                .applicable_when(regulated.clone())
                .owns(fields::COMPLIANCE)
                .with_priority(30),
            AgentSpec::new(SYNTHESIS, Arc::new(SynthesisStage::new(reasoner.clone())))
                .depends_on(SENTIMENT)
                .depends_on(RISK)
                .depends_on_if(COMPLIANCE, regulated)
                .owns(fields::SYNTHESIS)
                .with_priority(40),
            AgentSpec::refinement(
                CRITIQUE,
                Arc::new(CritiqueStage::new(reasoner.clone(), QUALITY_THRESHOLD)),
                predicate(quality_passes),
            )
            .depends_on(SYNTHESIS)
            .refines(SYNTHESIS)
            .owns(fields::CRITIQUE)
            .with_priority(50),
            AgentSpec::new(REPORT, Arc::new(ReportStage::new(reasoner.clone())))
                .depends_on(SYNTHESIS)
                .depends_on_if(CRITIQUE, predicate(refinement_pending))
                .owns(fields::REPORT)
                .with_priority(60),
        ]
        .into_iter()
        .filter(|spec| !self.excluded.contains(spec.id.as_str()))
        .collect()
    }

    pub fn build(&self) -> Result<AgentRegistry, RegistryError> {
        let mut registry = AgentRegistry::new();
        for spec in self.specs() {
            registry.register(spec)?;
        }
        Ok(registry)
    }
}

/// Per-run factory for the full review registry
pub fn review_registry(reasoner: Arc<dyn ReasoningService>) -> Result<AgentRegistry, RegistryError> {
    ReviewPipeline::new(reasoner).build()
}
