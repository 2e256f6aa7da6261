//! MCP (Model Context Protocol) client: one stdio-JSON-RPC child process per registered server,
//! exposing its tools under the `mcp:{module}:{tool}` naming convention the router expects
//!.
//!
//! An initialize → notifications/initialized → tools/list handshake over stdin/stdout-framed
//! JSON-RPC 2.0, with request/response bookkeeping keyed by request id.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;

use crate::message::CommandResult;
use crate::tools::router::McpArgs;

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

struct McpProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    next_id: AtomicU64,
    tools: Vec<McpToolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct McpToolInfo {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: String,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

impl McpProcess {
    async fn spawn(command: &str, args: &[String]) -> Result<Self, String> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn mcp server {command}: {e}"))?;
        let stdin = child.stdin.take().ok_or("no stdin handle")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("no stdout handle")?);
        let mut process = McpProcess { child, stdin, stdout, next_id: AtomicU64::new(1), tools: Vec::new() };
        process.handshake().await?;
        Ok(process)
    }

    async fn handshake(&mut self) -> Result<(), String> {
        self.request(
            "initialize",
            json!({ "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "synapse-agent-core", "version": "0.1.0" } }),
        )
            .await?;
        self.notify("notifications/initialized", json!({})).await?;
        let tools_resp = self.request("tools/list", json!({})).await?;
        let tools: Vec<McpToolInfo> = serde_json::from_value(tools_resp["tools"].clone()).unwrap_or_default();
        self.tools = tools;
        Ok(())
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), String> {
        let payload = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let line = format!("{}\n", payload);
        self.stdin.write_all(line.as_bytes()).await.map_err(|e| e.to_string())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest { jsonrpc: "2.0", id, method: method.to_string(), params };
        let line = format!("{}\n", serde_json::to_string(&req).map_err(|e| e.to_string())?);
        self.stdin.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
        let mut buf = String::new();
        self.stdout.read_line(&mut buf).await.map_err(|e| e.to_string())?;
        let resp: JsonRpcResponse = serde_json::from_str(&buf).map_err(|e| format!("bad mcp response: {e}"))?;
        if let Some(err) = resp.error {
            return Err(err.message);
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, String> {
        self.request("tools/call", json!({ "name": name, "arguments": arguments })).await
    }
}

impl Drop for McpProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Registry of MCP servers keyed by module id. Each entry owns one [`McpProcess`]; calls to the
/// same module serialize through its mutex, matching "the persistent shell session is accessed
/// serially" pattern for native commands — extension subprocesses are independent of that
/// session but are still one-at-a-time per module.
#[derive(Default)]
pub struct McpRegistry {
    processes: Mutex<HashMap<String, Arc<Mutex<McpProcess>>>>,
    timeout: Duration,
}

impl McpRegistry {
    pub fn new(timeout: Duration) -> Self {
        McpRegistry { processes: Mutex::new(HashMap::new()), timeout }
    }

    pub async fn register(&self, module: impl Into<String>, command: &str, args: &[String]) -> Result<(), String> {
        let process = McpProcess::spawn(command, args).await?;
        self.processes.lock().await.insert(module.into(), Arc::new(Mutex::new(process)));
        Ok(())
    }

    /// Bind positional args against the tool's declared `required` schema order, then apply
    /// named flags as overrides.
    pub async fn call(&self, module: &str, tool: &str, args: McpArgs) -> CommandResult {
        let Some(process) = self.processes.lock().await.get(module).cloned() else {
            return CommandResult::err(format!("mcp: unknown module {module}"));
        };
        let mut guard = process.lock().await;
        let Some(info) = guard.tools.iter().find(|t| t.name == tool).cloned() else {
            return CommandResult::err(format!("mcp: unknown tool {module}:{tool}"));
        };
        let mut bound = bind_arguments(&info.input_schema, &args.positional);
        if let Value::Object(ref mut map) = bound {
            for (k, v) in args.flags {
                map.insert(k, v);
            }
        }
        let call = tokio::time::timeout(self.timeout, guard.call_tool(tool, bound)).await;
        match call {
            Ok(Ok(result)) => CommandResult::ok(stringify_tool_content(&result)),
            Ok(Err(e)) => CommandResult::err(e),
            Err(_) => CommandResult::err(format!("mcp call {module}:{tool} timed out")),
        }
    }
}

fn bind_arguments(schema: &Value, positional: &[String]) -> Value {
    let required = schema["required"].as_array().cloned().unwrap_or_default();
    let properties = schema["properties"].as_object();
    let mut out = serde_json::Map::new();
    for (i, name_value) in required.iter().enumerate() {
        let Some(name) = name_value.as_str() else { continue };
        let Some(raw) = positional.get(i) else { continue };
        let prop_type = properties.and_then(|p| p.get(name)).and_then(|p| p["type"].as_str());
        out.insert(name.to_string(), coerce(raw, prop_type));
    }
    Value::Object(out)
}

fn coerce(raw: &str, prop_type: Option<&str>) -> Value {
    match prop_type {
        Some("integer") => raw.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        Some("number") => raw.parse::<f64>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        Some("boolean") => raw.parse::<bool>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        _ => json!(raw),
    }
}

fn stringify_tool_content(result: &Value) -> String {
    if let Some(content) = result["content"].as_array() {
        content
            .iter()
            .filter_map(|c| c["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        result.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_positional_by_required_order() {
        let schema = json!({
            "properties": { "owner": {"type": "string"}, "count": {"type": "integer"} },
            "required": ["owner", "count"],
        });
        let bound = bind_arguments(&schema, &["acme".to_string(), "3".to_string()]);
        assert_eq!(bound["owner"], json!("acme"));
        assert_eq!(bound["count"], json!(3));
    }

    #[test]
    fn stringifies_content_blocks() {
        let result = json!({ "content": [{"type": "text", "text": "hello"}, {"type": "text", "text": "world"}] });
        assert_eq!(stringify_tool_content(&result), "hello\nworld");
    }
}
