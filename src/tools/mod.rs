//! The toolset: tool trait, registry/dispatch (`handle`), schema validation, and cancellable
//! futures.
//!
//! A name-keyed registry over the [`crate::tools::traits::Tool`] trait, with schema validation
//! at the dispatch boundary.

pub mod builtins;
pub mod cancellable;
pub mod mcp;
pub mod router;
pub mod skill;
pub mod traits;

pub use cancellable::CancellableFuture;
pub use traits::{Tool, ToolDefinition};

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::message::{ToolCall, ToolResult};

/// Maps a tool name to a callable; validates arguments against a declared schema; dispatches to
/// [`Tool::execute`] and recovers every failure mode into a [`ToolResult`].
pub struct Toolset {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Toolset {
    pub fn new() -> Self {
        Toolset { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Declared tool definitions visible to the model.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
                .collect()
    }

    /// Run `call` to completion, wrapped in a [`CancellableFuture`]. Never panics or returns an
    /// `Err` — every failure mode (unknown tool, bad JSON, schema mismatch, execution error) is
    /// recovered into an error [`ToolResult`].
    pub fn handle(&self, call: ToolCall) -> CancellableFuture<ToolResult> {
        let tool = self.tools.get(&call.name).cloned();
        let token = CancellationToken::new();
        let child = token.clone();

        let fut = async move {
            let Some(tool) = tool else {
                let err = ToolError::UnknownTool(call.name.clone());
                return ToolResult::error(call.id, err.to_string(), err.category());
            };

            let args: serde_json::Value = match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    let err = ToolError::InvalidParameters(format!("not valid JSON: {e}"));
                    return ToolResult::error(call.id, err.to_string(), err.category());
                }
            };

            if let Some(schema) = compile_schema(&tool.parameters_schema()) {
                if let Err(first) = schema.validate(&args).map_err(|mut errs| {
                    errs.next().map(|e| e.to_string()).unwrap_or_else(|| "schema validation failed".to_string())
                }) {
                    let err = ToolError::InvalidParameters(first);
                    return ToolResult::error(call.id, err.to_string(), err.category());
                }
            }

            match tool.execute(args, child).await {
                Ok(result) => ToolResult { tool_call_id: call.id, ..result },
                Err(e) => {
                    let err = ToolError::ExecutionFailed(e);
                    ToolResult::error(call.id, err.to_string(), err.category())
                }
            }
        };

        CancellableFuture::new(fut, token)
    }
}

impl Default for Toolset {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_schema(schema: &serde_json::Value) -> Option<JSONSchema> {
    if schema.get("properties").is_none() && schema.get("type").is_none() {
        return None;
    }
    JSONSchema::compile(schema).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] })
        }
        async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<ToolResult, String> {
            let text = args["text"].as_str().unwrap_or_default();
            Ok(ToolResult::ok("", text))
        }
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), arguments: args.into() }
    }

    #[tokio::test]
    async fn unknown_tool_never_throws() {
        let ts = Toolset::new();
        let result = ts.handle(call("nope", "{}")).await;
        assert!(result.is_error);
        assert!(result.message.contains("Unknown tool"));
        assert_eq!(result.category.as_deref(), Some("unknown_tool"));
    }

    #[tokio::test]
    async fn invalid_json_becomes_invalid_usage() {
        let mut ts = Toolset::new();
        ts.register(Arc::new(EchoTool));
        let result = ts.handle(call("echo", "not json")).await;
        assert!(result.is_error);
        assert_eq!(result.category.as_deref(), Some("invalid_usage"));
    }

    #[tokio::test]
    async fn schema_violation_becomes_invalid_usage() {
        let mut ts = Toolset::new();
        ts.register(Arc::new(EchoTool));
        let result = ts.handle(call("echo", "{}")).await;
        assert!(result.is_error);
        assert_eq!(result.category.as_deref(), Some("invalid_usage"));
    }

    #[tokio::test]
    async fn success_preserves_call_id() {
        let mut ts = Toolset::new();
        ts.register(Arc::new(EchoTool));
        let result = ts.handle(call("echo", r#"{"text":"hi"}"#)).await;
        assert!(!result.is_error);
        assert_eq!(result.output, "hi");
        assert_eq!(result.tool_call_id, "c1");
    }
}
