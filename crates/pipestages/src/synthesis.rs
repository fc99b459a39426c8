use crate::fields;
use crate::reasoning::{request_structured, ReasoningRequest, ReasoningService};
use async_trait::async_trait;
use pipecore::{Agent, AgentContext, AgentError, StateDelta, Value};
use serde_json::json;
use std::sync::Arc;

/// Combines the individual analyses into a scored summary.
///
/// On a refinement pass it also reads the latest critique, and records
/// which revision produced the summary.
pub struct SynthesisStage {
    reasoner: Arc<dyn ReasoningService>,
}

impl SynthesisStage {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Agent for SynthesisStage {
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        let state = &ctx.state;
        let revision = state.refinement_count();
        let compliance_issues = fields::nested_strings(state, fields::COMPLIANCE, "issues").len();

        let mut input = json!({
            "sentiment_score": fields::nested_f64(state, fields::SENTIMENT, "score")?,
            "sentiment_label": fields::nested_str(state, fields::SENTIMENT, "label")?,
            "risk_score": fields::nested_f64(state, fields::RISK, "score")?,
            "word_count": fields::nested_f64(state, fields::EXTRACTION, "word_count")?,
            "compliance_issues": compliance_issues,
            "revision": revision,
        });
        if let Some(critique) = state.get(fields::CRITIQUE).and_then(Value::as_str) {
            input["critique"] = json!(critique);
        }

        let request = ReasoningRequest::structured(
            "synthesis",
            "Summarise the analyses into one paragraph, score the document 0-100 and state your confidence.",
            input,
        );
        let mut synthesis = request_structured(
            self.reasoner.as_ref(),
            request,
            &["summary", "score", "confidence"],
        )
        .await?;
        synthesis["revision"] = json!(revision);

        ctx.events.info(format!(
            "Revision {} confidence {}",
            revision, synthesis["confidence"]
        ));
        Ok(StateDelta::new().with_field(fields::SYNTHESIS, synthesis))
    }

    fn description(&self) -> &str {
        "Combine analyses into a scored summary"
    }
}

/// Refinement agent: explains why the synthesis fell short so the next
/// revision can address it.
pub struct CritiqueStage {
    reasoner: Arc<dyn ReasoningService>,
    threshold: f64,
}

impl CritiqueStage {
    pub fn new(reasoner: Arc<dyn ReasoningService>, threshold: f64) -> Self {
        Self { reasoner, threshold }
    }
}

#[async_trait]
impl Agent for CritiqueStage {
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        let state = &ctx.state;
        let confidence = fields::nested_f64(state, fields::SYNTHESIS, "confidence")?;
        let keywords = state
            .get(fields::EXTRACTION)
            .and_then(|extraction| extraction.get("keywords"))
            .map(Value::to_json)
            .unwrap_or_else(|| json!([]));

        let request = ReasoningRequest::text(
            "critique",
            "Explain what the summary is missing and how the next revision should improve it.",
            json!({
                "summary": fields::nested_str(state, fields::SYNTHESIS, "summary")?,
                "confidence": confidence,
                "threshold": self.threshold,
                "keywords": keywords,
            }),
        );
        let critique = self.reasoner.reason(request).await?.into_text();

        let revision = state.refinement_count() + 1;
        let ceiling = state.max_refinements().max(1);
        ctx.events.progress(
            (revision as f64 / ceiling as f64 * 100.0).min(100.0),
            Some(format!("revision {} of {}", revision, ceiling)),
        );
        ctx.events.warn(format!(
            "Confidence {:.2} below {:.2}, requesting revision",
            confidence, self.threshold
        ));
        Ok(StateDelta::new().with_field(fields::CRITIQUE, critique))
    }

    fn description(&self) -> &str {
        "Critique a low-confidence synthesis and request another revision"
    }
}

/// Renders the final one-line headline
pub struct ReportStage {
    reasoner: Arc<dyn ReasoningService>,
}

impl ReportStage {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Agent for ReportStage {
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        let state = &ctx.state;
        let request = ReasoningRequest::text(
            "report",
            "Write a one-line headline for the review.",
            json!({
                "summary": fields::nested_str(state, fields::SYNTHESIS, "summary")?,
                "score": fields::nested_f64(state, fields::SYNTHESIS, "score")?,
            }),
        );
        let headline = request_headline(self.reasoner.as_ref(), request).await?;
        Ok(StateDelta::new().with_field(fields::REPORT, headline))
    }

    fn description(&self) -> &str {
        "Write the review headline"
    }
}

async fn request_headline(
    service: &dyn ReasoningService,
    request: ReasoningRequest,
) -> Result<String, AgentError> {
    let headline = service.reason(request).await?.into_text();
    if headline.trim().is_empty() {
        return Err(AgentError::Service("report returned an empty headline".to_string()));
    }
    Ok(headline)
}
