//! 核心编排层：错误类型与单回合编排循环

pub mod error;
pub mod orchestrator;

pub use error::{AgentError, LlmError, ServiceError, ToolError};
pub use orchestrator::{
    Orchestrator, Termination, ToolCallRecord, TurnOutcome, TurnRequest, DEFAULT_MAX_ITERATIONS,
    TIMEOUT_FALLBACK,
};
