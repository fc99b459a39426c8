use crate::fields;
use crate::pipeline::{self, is_regulated, quality_passes};
use pipecore::{ExecutionState, PipelineError};
use piperuntime::{require_fields, ResultAssembler};
use serde::Serialize;

/// Overall verdict of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    NeedsAttention,
    Rejected,
}

/// Externally visible result of a document review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub overall_score: f64,
    pub status: ReviewStatus,
    pub sentiment: String,
    pub risk_flags: Vec<String>,
    pub compliance_issues: Vec<String>,
    pub headline: String,
    pub confidence: f64,
    pub refinements: u64,
}

/// Derives a [`ReviewSummary`] from the final state
#[derive(Debug, Default, Clone, Copy)]
pub struct ReviewAssembler;

impl ReviewAssembler {
    fn mandatory(state: &ExecutionState) -> Vec<(&'static str, &'static str)> {
        let mut mandatory = vec![
            (fields::EXTRACTION, pipeline::EXTRACT),
            (fields::SENTIMENT, pipeline::SENTIMENT),
            (fields::RISK, pipeline::RISK),
        ];
        if is_regulated(state) {
            mandatory.push((fields::COMPLIANCE, pipeline::COMPLIANCE));
        }
        mandatory.push((fields::SYNTHESIS, pipeline::SYNTHESIS));
        mandatory.push((fields::REPORT, pipeline::REPORT));
        mandatory
    }
}

impl ResultAssembler for ReviewAssembler {
    type Output = ReviewSummary;

    fn assemble(&self, state: &ExecutionState) -> Result<ReviewSummary, PipelineError> {
        require_fields(state, &Self::mandatory(state))?;

        let synthesis = |key: &str| {
            fields::nested_f64(state, fields::SYNTHESIS, key)
                .map_err(|e| PipelineError::agent(pipeline::SYNTHESIS, e))
        };
        let overall_score = synthesis("score")?;
        let confidence = synthesis("confidence")?;
        let risk_score = fields::nested_f64(state, fields::RISK, "score")
            .map_err(|e| PipelineError::agent(pipeline::RISK, e))?;
        let sentiment = fields::nested_str(state, fields::SENTIMENT, "label")
            .map_err(|e| PipelineError::agent(pipeline::SENTIMENT, e))?
            .to_string();
        let headline = state
            .require_str(fields::REPORT)
            .map_err(|e| PipelineError::agent(pipeline::REPORT, e))?
            .to_string();

        let risk_flags = fields::nested_strings(state, fields::RISK, "flags");
        let compliance_issues = fields::nested_strings(state, fields::COMPLIANCE, "issues");

        let status = if overall_score < 40.0 || risk_score >= 75.0 {
            ReviewStatus::Rejected
        } else if overall_score < 70.0 || !compliance_issues.is_empty() || !quality_passes(state) {
            ReviewStatus::NeedsAttention
        } else {
            ReviewStatus::Approved
        };

        Ok(ReviewSummary {
            overall_score,
            status,
            sentiment,
            risk_flags,
            compliance_issues,
            headline,
            confidence,
            refinements: state.refinement_count(),
        })
    }
}
