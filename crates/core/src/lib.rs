// Core types and engine for the Weft workflow orchestrator

pub mod agent;
pub mod error;
pub mod events;
pub mod storage;
pub mod template;
pub mod types;
pub mod workflow;

pub use error::{AgentError, EngineError, EngineResult, ValidationError};
pub use types::*;
