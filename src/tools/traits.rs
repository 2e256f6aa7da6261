//! The `Tool` trait every concrete tool implements, and [`ToolDefinition`], the declared-schema
//! shape exposed to the model via [`crate::tools::Toolset::tools`].
//!
//! The async trait every tool implements, plus the info/result shapes the router exchanges
//! with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::ToolResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A single callable tool. Implementations should check `cancel` at any suspension point inside
/// `execute` and return promptly once it fires rather than being
/// forcibly aborted.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool. `args` has already passed schema validation. Errors here are recovered by
    /// [`crate::tools::Toolset::handle`] into a `ToolResult` with category `execution_error` —
    /// implementations should return `Err` with a human-readable message, not panic.
    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolResult, String>;
}
