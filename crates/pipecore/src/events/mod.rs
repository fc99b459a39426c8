// crates/pipecore/src/events/mod.rs

mod base;

pub use base::{AgentEvent, EventBus, EventEmitter, ExecutionEvent, ExecutionId};
