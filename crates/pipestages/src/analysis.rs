use crate::fields;
use crate::reasoning::{request_structured, ReasoningRequest, ReasoningService};
use async_trait::async_trait;
use pipecore::{Agent, AgentContext, AgentError, StateDelta};
use serde_json::json;
use std::sync::Arc;

/// Counts words and sentences, picks keywords and flags regulated content
pub struct ExtractStage {
    reasoner: Arc<dyn ReasoningService>,
}

impl ExtractStage {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Agent for ExtractStage {
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        let document = ctx.state.require_str(fields::DOCUMENT)?;
        if document.trim().is_empty() {
            return Err(AgentError::ExecutionFailed("document is empty".to_string()));
        }

        let request = ReasoningRequest::structured(
            "extract",
            "Count words and sentences, list the top keywords and report whether the text touches regulated data.",
            json!({ "document": document }),
        );
        let extraction = request_structured(
            self.reasoner.as_ref(),
            request,
            &["word_count", "sentence_count", "keywords", "regulated"],
        )
        .await?;

        ctx.events.info(format!(
            "Extracted {} words, regulated: {}",
            extraction["word_count"], extraction["regulated"]
        ));
        Ok(StateDelta::new().with_field(fields::EXTRACTION, extraction))
    }

    fn description(&self) -> &str {
        "Extract word counts, keywords and the regulated flag"
    }
}

/// Single-shot analysis of the raw document.
///
/// Sentiment, risk and compliance differ only in the task they send and
/// the field they own.
pub struct DocumentAnalysis {
    reasoner: Arc<dyn ReasoningService>,
    task: &'static str,
    field: &'static str,
    instructions: &'static str,
    keys: &'static [&'static str],
    description: &'static str,
}

impl DocumentAnalysis {
    pub fn sentiment(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            reasoner,
            task: "sentiment",
            field: fields::SENTIMENT,
            instructions: "Score the overall tone from -1 (negative) to 1 (positive) and label it.",
            keys: &["score", "label"],
            description: "Score the document's tone",
        }
    }

    pub fn risk(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            reasoner,
            task: "risk",
            field: fields::RISK,
            instructions: "List risk indicators and score exposure from 0 to 100.",
            keys: &["score", "flags"],
            description: "Flag risk indicators and score exposure",
        }
    }

    pub fn compliance(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            reasoner,
            task: "compliance",
            field: fields::COMPLIANCE,
            instructions: "Check the text against data-handling obligations and list every issue.",
            keys: &["compliant", "issues"],
            description: "Check regulated documents for compliance issues",
        }
    }
}

#[async_trait]
impl Agent for DocumentAnalysis {
    async fn execute(&self, ctx: AgentContext) -> Result<StateDelta, AgentError> {
        let document = ctx.state.require_str(fields::DOCUMENT)?;
        let request =
            ReasoningRequest::structured(self.task, self.instructions, json!({ "document": document }));

        ctx.check_cancelled()?;
        let analysis = request_structured(self.reasoner.as_ref(), request, self.keys).await?;

        tracing::debug!(agent = %ctx.agent_id, task = self.task, "Analysis complete");
        Ok(StateDelta::new().with_field(self.field, analysis))
    }

    fn description(&self) -> &str {
        self.description
    }
}
