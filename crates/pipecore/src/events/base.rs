use crate::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: ExecutionId,
        driver: String,
        agents: usize,
        timestamp: DateTime<Utc>,
    },
    RoundStarted {
        execution_id: ExecutionId,
        round: usize,
        agents: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },
    AgentStarted {
        execution_id: ExecutionId,
        agent_id: AgentId,
        round: usize,
        timestamp: DateTime<Utc>,
    },
    AgentCompleted {
        execution_id: ExecutionId,
        agent_id: AgentId,
        fields: Vec<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    AgentFailed {
        execution_id: ExecutionId,
        agent_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    AgentDegraded {
        execution_id: ExecutionId,
        agent_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RefinementTriggered {
        execution_id: ExecutionId,
        agent_id: AgentId,
        count: u64,
        max: u64,
        rerun: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Agent {
        execution_id: ExecutionId,
        agent_id: AgentId,
        event: AgentEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events raised by an agent while it works
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AgentEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter for agents to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    agent_id: AgentId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        agent_id: AgentId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            agent_id,
            sender,
        }
    }

    /// Emitter wired to a channel nobody listens on.
    pub fn detached(agent_id: impl Into<AgentId>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(Uuid::nil(), agent_id.into(), sender)
    }

    pub fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(ExecutionEvent::Agent {
            execution_id: self.execution_id,
            agent_id: self.agent_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(AgentEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(AgentEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(AgentEvent::Progress { percent, message });
    }
}

/// Broadcast bus shared by the drivers and their subscribers
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, agent_id: &str) -> EventEmitter {
        EventEmitter::new(execution_id, agent_id.to_string(), self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
