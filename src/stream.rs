//! The streamed-part tagged union a [`crate::provider::Provider`] emits, and the token-usage
//! record that rides along with it.
//!
//! A full tagged union (text / thinking / tool-call-start / tool-call-argument-delta / usage /
//! terminal) rather than a flat `{delta, is_final, finish_reason}` shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}

/// One fragment of a provider's streamed response. The [`crate::assembler::MessageAssembler`]
/// folds a sequence of these into one assistant [`crate::message::Message`] plus an ordered
/// list of [`crate::message::ToolCall`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamedPart {
    TextDelta { text: String },
    ThinkingDelta { text: String, signature: Option<String> },
    ToolCallStart { id: String, name: String, initial_input: serde_json::Value },
    /// Appends to whichever tool-call slot was opened most recently by a [`StreamedPart::ToolCallStart`]
    /// that has not yet been finalized (finalization happens on the next start or end-of-stream).
    ToolCallArgumentDelta { fragment: String },
    Usage { usage: TokenUsage },
    Terminal,
}
