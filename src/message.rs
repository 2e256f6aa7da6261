//! Conversation data model: [`Message`], [`ToolCall`], [`ToolResult`], [`Role`], [`ContentPart`].
//!
//! A message holds an ordered list of content parts (text, thinking, image) rather than a
//! single string, so multi-part model turns round-trip without lossy concatenation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a message's content. Messages hold an ordered list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Thinking { text: String, signature: Option<String> },
    Image { media_type: String, data: String },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text { text: s.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single tool invocation the model requested. The `arguments` string is the raw,
/// possibly-empty-normalized-to-`"{}"` JSON text accumulated by the
/// [`crate::assembler::MessageAssembler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The outcome of running one [`ToolCall`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub is_error: bool,
    /// Visible to the model.
    pub output: String,
    /// Diagnostic appended to `output` when rendered into history.
    pub message: String,
    /// Short user-facing summary.
    pub brief: String,
    /// Failure-category metadata (`unknown_tool` | `invalid_usage` | `execution_error`), empty
    /// on success.
    pub category: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ToolResult {
            tool_call_id: tool_call_id.into(),
            is_error: false,
            output: output.into(),
            message: String::new(),
            brief: String::new(),
            category: None,
        }
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        message: impl Into<String>,
        category: &'static str,
    ) -> Self {
        let message = message.into();
        ToolResult {
            tool_call_id: tool_call_id.into(),
            is_error: true,
            output: String::new(),
            brief: message.clone(),
            message,
            category: Some(category.to_string()),
        }
    }

    /// The body appended to history for this result's tool-role message: `output`, then a
    /// blank line, then `message` if non-empty.
    pub fn rendered_body(&self) -> String {
        if self.message.is_empty() {
            self.output.clone()
        } else {
            format!("{}\n\n{}", self.output, self.message)
        }
    }
}

/// The uniform result shape every command-routing path returns, before the toolset
/// wraps it into a [`ToolResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandResult { stdout: stdout.into(), stderr: String::new(), exit_code: 0 }
    }

    pub fn err(stderr: impl Into<String>) -> Self {
        CommandResult { stdout: String::new(), stderr: stderr.into(), exit_code: 1 }
    }

    /// Wrap into a [`ToolResult`]: `output` = stdout, augmented with a
    /// `[stderr]` block when the command failed; `isError` = (`exit_code` != 0).
    pub fn into_tool_result(self, tool_call_id: impl Into<String>) -> ToolResult {
        let is_error = self.exit_code != 0;
        let output = if is_error && !self.stderr.is_empty() {
            format!("{}\n[stderr]\n{}", self.stdout, self.stderr)
        } else {
            self.stdout
        };
        ToolResult {
            tool_call_id: tool_call_id.into(),
            is_error,
            output,
            message: String::new(),
            brief: String::new(),
            category: None,
        }
    }
}

/// A message in the conversation history. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Vec<ContentPart>, tool_calls: Vec<ToolCall>) -> Self {
        Message {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, body: impl Into<String>) -> Self {
        let tool_call_id = tool_call_id.into();
        Message {
            role: Role::Tool,
            content: vec![ContentPart::text(body)],
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id),
        }
    }

    /// Concatenation of this message's text parts, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Fast character-based token-size heuristic used by the offload trigger: roughly
    /// four characters per token, summed across content parts and rendered tool calls.
    pub fn token_estimate(&self) -> usize {
        let content_chars: usize = self
            .content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::Thinking { text, .. } => text.len(),
                ContentPart::Image { data, .. } => data.len(),
            })
            .sum();
        let tool_call_chars: usize = self
            .tool_calls
            .iter()
            .map(|tc| tc.name.len() + tc.arguments.len())
            .sum();
        (content_chars + tool_call_chars) / 4
    }
}
