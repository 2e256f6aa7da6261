//! Folds a sequence of [`StreamedPart`]s into one assistant [`Message`] plus an ordered list of
//! [`ToolCall`]s.
//!
//! An incremental fold driven directly off the provider's part stream, rather than a post-hoc
//! parse of a finished text blob.

use crate::message::{ContentPart, Message, Role, ToolCall};
use crate::stream::{StreamedPart, TokenUsage};

#[derive(Debug, Default)]
struct OpenToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental fold of a provider's streamed parts into one assistant message.
///
/// Content parts preserve first-seen order; tool calls are tracked in a separate ordered list
/// preserving the order their `tool-call-start` parts were emitted.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    content: Vec<ContentPart>,
    finished_tool_calls: Vec<ToolCall>,
    open_tool_call: Option<OpenToolCall>,
    current_text: String,
    current_thinking: String,
    usage: TokenUsage,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed part. Call [`Self::finish`] once the stream ends.
    ///
    /// Returns the tool call that was just finalized, if this part's arrival closed one (i.e. a
    /// `tool-call-start` arrived while another call's slot was still open) — the step engine uses
    /// this to start execution eagerly, before the rest of the turn has streamed in.
    pub fn push(&mut self, part: StreamedPart) -> Option<ToolCall> {
        match part {
            StreamedPart::TextDelta { text } => {
                self.flush_thinking();
                self.current_text.push_str(&text);
                None
            }
            StreamedPart::ThinkingDelta { text, signature } => {
                self.flush_text();
                self.current_thinking.push_str(&text);
                if let Some(signature) = signature {
                    self.content.push(ContentPart::Thinking {
                        text: std::mem::take(&mut self.current_thinking),
                        signature: Some(signature),
                    });
                }
                None
            }
            StreamedPart::ToolCallStart { id, name, initial_input } => {
                let finalized = self.finalize_open_tool_call();
                let arguments = if initial_input.is_null() {
                    String::new()
                } else if let serde_json::Value::Object(ref obj) = initial_input {
                    if obj.is_empty() {
                        String::new()
                    } else {
                        initial_input.to_string()
                    }
                } else {
                    initial_input.to_string()
                };
                self.open_tool_call = Some(OpenToolCall { id, name, arguments });
                finalized
            }
            StreamedPart::ToolCallArgumentDelta { fragment } => {
                if let Some(open) = self.open_tool_call.as_mut() {
                    open.arguments.push_str(&fragment);
                }
                // Orphan deltas (no open slot) are silently discarded.
                None
            }
            StreamedPart::Usage { usage } => {
                self.usage.add(&usage);
                None
            }
            StreamedPart::Terminal => None,
        }
    }

    fn flush_text(&mut self) {
        if !self.current_text.is_empty() {
            self.content.push(ContentPart::Text {
                text: std::mem::take(&mut self.current_text),
            });
        }
    }

    fn flush_thinking(&mut self) {
        if !self.current_thinking.is_empty() {
            self.content.push(ContentPart::Thinking {
                text: std::mem::take(&mut self.current_thinking),
                signature: None,
            });
        }
    }

    fn finalize_open_tool_call(&mut self) -> Option<ToolCall> {
        let open = self.open_tool_call.take()?;
        let arguments = if open.arguments.is_empty() { "{}".to_string() } else { open.arguments };
        let call = ToolCall { id: open.id, name: open.name, arguments };
        self.finished_tool_calls.push(call.clone());
        Some(call)
    }

    /// Finish assembling: flush any pending text/thinking run and finalize any still-open tool
    /// call (normalizing an empty argument string to `"{}"`). The step engine is
    /// responsible for eagerly starting whatever call this finalizes, since no further
    /// `tool-call-start` will arrive to trigger it.
    pub fn finish(mut self) -> (Message, TokenUsage, Option<ToolCall>) {
        self.flush_text();
        self.flush_thinking();
        let last = self.finalize_open_tool_call();
        let message = Message::assistant(self.content, self.finished_tool_calls);
        (message, self.usage, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concatenates_text_deltas() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::TextDelta { text: "hel".into() });
        asm.push(StreamedPart::TextDelta { text: "lo".into() });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.text(), "hello");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn accumulates_tool_call_arguments_across_deltas() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ToolCallStart {
            id: "c1".into(),
            name: "Bash".into(),
            initial_input: json!({}),
        });
        asm.push(StreamedPart::ToolCallArgumentDelta { fragment: "{\"command\":".into() });
        asm.push(StreamedPart::ToolCallArgumentDelta { fragment: "\"echo x\"}".into() });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].arguments, "{\"command\":\"echo x\"}");
    }

    #[test]
    fn empty_arguments_normalize_to_empty_object() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ToolCallStart {
            id: "c1".into(),
            name: "Bash".into(),
            initial_input: json!({}),
        });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn non_empty_initial_input_seeds_starting_argument_string() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ToolCallStart {
            id: "c1".into(),
            name: "Bash".into(),
            initial_input: json!({"command": "ls"}),
        });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.tool_calls[0].arguments, json!({"command": "ls"}).to_string());
    }

    #[test]
    fn orphan_argument_delta_before_any_start_is_discarded() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ToolCallArgumentDelta { fragment: "whatever".into() });
        let (msg, _, _) = asm.finish();
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn next_start_finalizes_previous_tool_call() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ToolCallStart { id: "c1".into(), name: "A".into(), initial_input: json!({}) });
        asm.push(StreamedPart::ToolCallArgumentDelta { fragment: "{\"x\":1}".into() });
        asm.push(StreamedPart::ToolCallStart { id: "c2".into(), name: "B".into(), initial_input: json!({}) });
        asm.push(StreamedPart::ToolCallArgumentDelta { fragment: "{\"y\":2}".into() });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].id, "c1");
        assert_eq!(msg.tool_calls[0].arguments, "{\"x\":1}");
        assert_eq!(msg.tool_calls[1].id, "c2");
        assert_eq!(msg.tool_calls[1].arguments, "{\"y\":2}");
    }

    #[test]
    fn thinking_splits_on_signature_arrival() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::ThinkingDelta { text: "pondering".into(), signature: None });
        asm.push(StreamedPart::ThinkingDelta { text: "...".into(), signature: Some("sig123".into()) });
        asm.push(StreamedPart::ThinkingDelta { text: "more".into(), signature: None });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.content.len(), 2);
        match &msg.content[0] {
            ContentPart::Thinking { text, signature } => {
                assert_eq!(text, "pondering...");
                assert_eq!(signature.as_deref(), Some("sig123"));
            }
            other => panic!("expected thinking part, got {other:?}"),
        }
        match &msg.content[1] {
            ContentPart::Thinking { text, signature } => {
                assert_eq!(text, "more");
                assert!(signature.is_none());
            }
            other => panic!("expected thinking part, got {other:?}"),
        }
    }

    #[test]
    fn text_and_thinking_preserve_first_seen_order() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::TextDelta { text: "a".into() });
        asm.push(StreamedPart::ThinkingDelta { text: "b".into(), signature: Some("s".into()) });
        asm.push(StreamedPart::TextDelta { text: "c".into() });
        let (msg, _, _) = asm.finish();
        assert_eq!(msg.content.len(), 3);
        assert_eq!(msg.content[0].as_text(), Some("a"));
        assert_eq!(msg.content[2].as_text(), Some("c"));
    }

    #[test]
    fn usage_accumulates_across_parts() {
        let mut asm = MessageAssembler::new();
        asm.push(StreamedPart::Usage { usage: TokenUsage { input_tokens: 10, output_tokens: 5, ..Default::default() } });
        asm.push(StreamedPart::Usage { usage: TokenUsage { input_tokens: 1, output_tokens: 2, ..Default::default() } });
        let (_, usage, _) = asm.finish();
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 7);
    }
}
