//! Error taxonomy for the agent core.
//!
//! Tool-level failures (unknown tool, invalid parameters, execution failure) are recovered
//! locally into [`crate::message::ToolResult`] records and never reach [`AgentError`]. Provider
//! errors and cancellation propagate through every boundary up to the caller of
//! [`crate::agent_loop::AgentLoop::run`].

use thiserror::Error;

/// Transport/protocol failures from an LLM provider. Never retried by the core.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("stream decode error: {0}")]
    Decode(String),
}

/// Failure categories a tool invocation can resolve to. Always recovered into a
/// [`crate::message::ToolResult`]; never surfaced as an [`AgentError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

impl ToolError {
    /// The `category` field carried in a [`crate::message::ToolResult`]'s extras bag.
    pub fn category(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidParameters(_) => "invalid_usage",
            ToolError::ExecutionFailed(_) => "execution_error",
        }
    }
}

/// Top-level error surfaced from [`crate::agent_loop::AgentLoop::run`] and
/// [`crate::step::Step::run`]. Terminal stop reasons (max-iterations, failure-threshold,
/// completed) are *not* variants here — they are reported via
/// [`crate::agent_loop::AgentOutcome::stop_reason`], matching the rule that terminal states are
/// not errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("operation was cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
