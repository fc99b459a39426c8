//! Document-review stages
//!
//! A concrete pipeline built on the runtime: extraction, three analyses,
//! a synthesis refined by critique, and a final report.

mod analysis;
pub mod fields;
mod pipeline;
mod reasoning;
mod summary;
mod synthesis;

pub use analysis::{DocumentAnalysis, ExtractStage};
pub use pipeline::{
    is_regulated, quality_passes, refinement_pending, review_registry, ReviewPipeline,
    COMPLIANCE, CRITIQUE, EXTRACT, QUALITY_THRESHOLD, REPORT, RISK, SENTIMENT, STAGES, SYNTHESIS,
};
pub use reasoning::{HeuristicReasoner, ReasoningRequest, ReasoningResponse, ReasoningService};
pub use summary::{ReviewAssembler, ReviewStatus, ReviewSummary};
pub use synthesis::{CritiqueStage, ReportStage, SynthesisStage};
