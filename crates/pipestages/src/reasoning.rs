use async_trait::async_trait;
use pipecore::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

/// Request sent to a reasoning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    /// Which analysis to perform (e.g. "sentiment", "risk")
    pub task: String,
    pub instructions: String,
    pub input: Json,
    /// Whether the caller expects structured data back
    pub structured: bool,
}

impl ReasoningRequest {
    pub fn structured(task: impl Into<String>, instructions: impl Into<String>, input: Json) -> Self {
        Self {
            task: task.into(),
            instructions: instructions.into(),
            input,
            structured: true,
        }
    }

    pub fn text(task: impl Into<String>, instructions: impl Into<String>, input: Json) -> Self {
        Self {
            task: task.into(),
            instructions: instructions.into(),
            input,
            structured: false,
        }
    }
}

/// Response from a reasoning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ReasoningResponse {
    Text(String),
    Structured(Json),
}

impl ReasoningResponse {
    pub fn into_structured(self, task: &str) -> Result<Json, AgentError> {
        match self {
            ReasoningResponse::Structured(json) => Ok(json),
            ReasoningResponse::Text(_) => Err(AgentError::Service(format!(
                "{} returned text where structured data was expected",
                task
            ))),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ReasoningResponse::Text(text) => text,
            ReasoningResponse::Structured(json) => json.to_string(),
        }
    }
}

/// External inference service consumed inside stages.
///
/// Retry, authentication and parsing of the remote protocol belong to
/// implementations of this trait, not to the scheduler.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningResponse, AgentError>;
}

const POSITIVE: &[&str] = &[
    "benefit", "clear", "efficient", "excellent", "good", "great", "growth", "improve",
    "improved", "positive", "reliable", "secure", "strong", "success",
];

const NEGATIVE: &[&str] = &[
    "bad", "breach", "concern", "delay", "fail", "failure", "issue", "loss", "negative", "poor",
    "problem", "unclear", "weak",
];

const RISK_TERMS: &[&str] = &[
    "breach", "default", "fraud", "lawsuit", "liability", "outage", "penalty", "termination",
    "vulnerability",
];

const REGULATED_TERMS: &[&str] = &[
    "compliance", "consent", "gdpr", "hipaa", "personal", "regulation", "regulatory", "sox",
];

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "from", "have", "into", "more", "other", "over", "should",
    "than", "that", "their", "there", "these", "they", "this", "those", "were", "which", "will",
    "with", "would",
];

/// Deterministic, offline reasoner built on lexical heuristics.
///
/// Stands in for a remote model in the CLI and in tests; the same input
/// always yields the same response.
#[derive(Debug, Default, Clone)]
pub struct HeuristicReasoner;

impl HeuristicReasoner {
    pub fn new() -> Self {
        Self
    }

    fn extract(&self, input: &Json) -> Result<Json, AgentError> {
        let document = input_str(input, "document")?;
        let words = tokenize(document);
        let sentences = document
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count();

        let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for word in &words {
            if word.len() > 3 && !STOPWORDS.contains(&word.as_str()) {
                *frequency.entry(word.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let keywords: Vec<&str> = ranked.iter().take(5).map(|(w, _)| *w).collect();

        let regulated = words.iter().any(|w| REGULATED_TERMS.contains(&w.as_str()));

        Ok(json!({
            "word_count": words.len(),
            "sentence_count": sentences,
            "keywords": keywords,
            "regulated": regulated,
        }))
    }

    fn sentiment(&self, input: &Json) -> Result<Json, AgentError> {
        let words = tokenize(input_str(input, "document")?);
        let positive = count_matches(&words, POSITIVE);
        let negative = count_matches(&words, NEGATIVE);
        let score = if positive + negative == 0 {
            0.0
        } else {
            (positive as f64 - negative as f64) / (positive + negative) as f64
        };
        let label = if score > 0.2 {
            "positive"
        } else if score < -0.2 {
            "negative"
        } else {
            "neutral"
        };
        Ok(json!({ "score": score, "label": label }))
    }

    fn risk(&self, input: &Json) -> Result<Json, AgentError> {
        let words = tokenize(input_str(input, "document")?);
        let mut flags: Vec<&str> = RISK_TERMS
            .iter()
            .copied()
            .filter(|term| words.iter().any(|w| w == term))
            .collect();
        flags.sort_unstable();
        let score = (flags.len() as f64 * 25.0).min(100.0);
        Ok(json!({ "score": score, "flags": flags }))
    }

    fn compliance(&self, input: &Json) -> Result<Json, AgentError> {
        let words = tokenize(input_str(input, "document")?);
        let has = |term: &str| words.iter().any(|w| w == term);

        let mut issues = Vec::new();
        if has("personal") && !has("consent") {
            issues.push("personal data handled without consent language");
        }
        if !has("retention") {
            issues.push("no data retention period stated");
        }
        if has("breach") && !has("notification") {
            issues.push("breach mentioned without a notification procedure");
        }
        Ok(json!({ "compliant": issues.is_empty(), "issues": issues }))
    }

    fn synthesis(&self, input: &Json) -> Result<Json, AgentError> {
        let sentiment = input_f64(input, "sentiment_score")?;
        let risk = input_f64(input, "risk_score")?;
        let issues = input.get("compliance_issues").and_then(Json::as_f64).unwrap_or(0.0);
        let word_count = input.get("word_count").and_then(Json::as_f64).unwrap_or(0.0);
        let revision = input.get("revision").and_then(Json::as_f64).unwrap_or(0.0);
        let label = input.get("sentiment_label").and_then(Json::as_str).unwrap_or("neutral");

        let score = (70.0 + 20.0 * sentiment - 0.5 * risk - 10.0 * issues).clamp(0.0, 100.0);
        let confidence = (0.4 + (word_count / 300.0).min(0.45) + 0.15 * revision).min(0.95);

        let mut summary = format!("{} tone, risk {:.0}/100", label, risk);
        if issues > 0.0 {
            summary.push_str(&format!(", {} compliance issue(s)", issues));
        }
        if let Some(critique) = input.get("critique").and_then(Json::as_str) {
            summary.push_str(&format!(" (revised: {})", critique));
        }

        Ok(json!({ "summary": summary, "score": score, "confidence": confidence }))
    }

    fn critique(&self, input: &Json) -> Result<String, AgentError> {
        let confidence = input_f64(input, "confidence")?;
        let threshold = input_f64(input, "threshold")?;
        let keywords = input
            .get("keywords")
            .and_then(Json::as_array)
            .map(|k| k.iter().filter_map(Json::as_str).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        Ok(format!(
            "confidence {:.2} below {:.2}; ground the summary in: {}",
            confidence, threshold, keywords
        ))
    }

    fn report(&self, input: &Json) -> Result<String, AgentError> {
        let summary = input_str(input, "summary")?;
        let score = input_f64(input, "score")?;
        Ok(format!("Review score {:.0}: {}", score, summary))
    }
}

#[async_trait]
impl ReasoningService for HeuristicReasoner {
    async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningResponse, AgentError> {
        tracing::debug!(task = %request.task, "Heuristic reasoning");
        let input = &request.input;
        match request.task.as_str() {
            "extract" => self.extract(input).map(ReasoningResponse::Structured),
            "sentiment" => self.sentiment(input).map(ReasoningResponse::Structured),
            "risk" => self.risk(input).map(ReasoningResponse::Structured),
            "compliance" => self.compliance(input).map(ReasoningResponse::Structured),
            "synthesis" => self.synthesis(input).map(ReasoningResponse::Structured),
            "critique" => self.critique(input).map(ReasoningResponse::Text),
            "report" => self.report(input).map(ReasoningResponse::Text),
            other => Err(AgentError::Service(format!("unsupported task '{}'", other))),
        }
    }
}

/// Send a structured request and check the response carries `keys`.
pub(crate) async fn request_structured(
    service: &dyn ReasoningService,
    request: ReasoningRequest,
    keys: &[&str],
) -> Result<Json, AgentError> {
    let task = request.task.clone();
    let json = service.reason(request).await?.into_structured(&task)?;
    ensure_keys(&task, &json, keys)?;
    Ok(json)
}

/// Check that a structured response carries every key a stage relies on.
pub(crate) fn ensure_keys(task: &str, json: &Json, keys: &[&str]) -> Result<(), AgentError> {
    match keys.iter().find(|key| json.get(**key).map_or(true, Json::is_null)) {
        Some(key) => Err(AgentError::Service(format!(
            "{} response is missing '{}'",
            task, key
        ))),
        None => Ok(()),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn count_matches(words: &[String], vocabulary: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| vocabulary.contains(&w.as_str()))
        .count()
}

fn input_str<'a>(input: &'a Json, key: &str) -> Result<&'a str, AgentError> {
    input
        .get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| AgentError::Service(format!("request input missing string '{}'", key)))
}

fn input_f64(input: &Json, key: &str) -> Result<f64, AgentError> {
    input
        .get(key)
        .and_then(Json::as_f64)
        .ok_or_else(|| AgentError::Service(format!("request input missing number '{}'", key)))
}
