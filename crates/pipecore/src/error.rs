use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Agent '{agent}' failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: AgentError,
    },

    #[error("Unsatisfiable dependencies for agents: {}", .0.join(", "))]
    UnsatisfiableDependencies(Vec<String>),

    #[error("Incomplete state: {}", format_missing(.0))]
    IncompleteState(Vec<MissingField>),

    #[error("Round limit of {0} exceeded")]
    RoundLimit(usize),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn agent(agent: impl Into<String>, source: AgentError) -> Self {
        PipelineError::Agent {
            agent: agent.into(),
            source,
        }
    }

    /// Agent ids named by an `IncompleteState` error, in report order.
    pub fn missing_agents(&self) -> Vec<&str> {
        match self {
            PipelineError::IncompleteState(missing) => {
                let mut agents: Vec<&str> = Vec::new();
                for m in missing {
                    if !agents.contains(&m.agent.as_str()) {
                        agents.push(&m.agent);
                    }
                }
                agents
            }
            _ => Vec::new(),
        }
    }
}

/// A mandatory state field that was absent at result assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub field: String,
    /// Agent responsible for producing the field.
    pub agent: String,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' (from agent '{}')", self.field, self.agent)
    }
}

fn format_missing(missing: &[MissingField]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid type for field '{field}': expected {expected}, got {actual}")]
    InvalidFieldType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Reasoning service error: {0}")]
    Service(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Wrote field '{field}' it does not own")]
    OwnershipViolation { field: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Duplicate agent id: {0}")]
    DuplicateId(String),

    #[error("Agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },

    #[error("Field '{field}' is owned by '{owner}' and cannot also be owned by '{claimant}'")]
    FieldConflict {
        field: String,
        owner: String,
        claimant: String,
    },

    #[error("Agent '{agent}' cannot own reserved field '{field}'")]
    ReservedField { agent: String, field: String },

    #[error("Cyclic dependency detected among: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("More than one refinement agent registered: {0:?}")]
    MultipleRefinementAgents(Vec<String>),

    #[error("Refinement agent '{agent}' cannot refine '{target}': not one of its upstream agents")]
    InvalidRefinementTarget { agent: String, target: String },

    #[error("Agent '{agent}' depends on refinement agent '{refinement}' without a condition")]
    UnconditionalRefinementDependency { agent: String, refinement: String },

    #[error("Agent not found: {0}")]
    NotFound(String),
}
