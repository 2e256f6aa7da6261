//! Concrete [`Provider`] implementation for OpenAI/Anthropic/OpenAI-compatible-gateway HTTP
//! endpoints, streamed over server-sent events.
//!
//! Built on a `reqwest` + `eventsource_stream` streaming backbone, with per-provider header
//! quirks handled explicitly (Anthropic's `anthropic-version`/`x-api-key`, OpenAI's `o1*`-family dropping
//! `temperature`/`system`). The teacher's `execute_with_retry` exponential-backoff wrapper is
//! deliberately **not** ported — transparent retry in the adapter would hide provider failures the caller needs to see.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{ContentPart, Role};
use crate::stream::{StreamedPart, TokenUsage};
use crate::tools::ToolDefinition;

use super::{GenerateRequest, Provider, StreamedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    Anthropic,
    /// Any other OpenAI-wire-compatible gateway (OpenRouter, Ollama, Vercel AI gateway,...).
    OpenAiCompatible,
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    flavor: Flavor,
    context_limit: usize,
}

impl OpenAiCompatibleProvider {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            flavor: Flavor::OpenAi,
            context_limit: 128_000,
        }
    }

    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            flavor: Flavor::Anthropic,
            context_limit: 200_000,
        }
    }

    pub fn compatible(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        context_limit: usize,
    ) -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            flavor: Flavor::OpenAiCompatible,
            context_limit,
        }
    }

    fn is_reasoning_model(&self) -> bool {
        self.flavor == Flavor::OpenAi && (self.model.starts_with("o1") || self.model.starts_with("o3"))
    }

    fn build_request_body(&self, req: &GenerateRequest) -> Value {
        match self.flavor {
            Flavor::Anthropic => self.build_anthropic_body(req),
            Flavor::OpenAi | Flavor::OpenAiCompatible => self.build_openai_body(req),
        }
    }

    fn build_openai_body(&self, req: &GenerateRequest) -> Value {
        let mut messages = Vec::new();
        if !self.is_reasoning_model() {
            messages.push(json!({ "role": "system", "content": req.system_prompt }));
        }
        for m in &req.history {
            messages.push(render_openai_message(m));
        }
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !self.is_reasoning_model() {
            body["temperature"] = json!(1.0);
        }
        if !req.tools.is_empty() {
            body["tools"] = json!(req.tools.iter().map(render_openai_tool).collect::<Vec<_>>());
        }
        body
    }

    fn build_anthropic_body(&self, req: &GenerateRequest) -> Value {
        let messages: Vec<Value> = req.history.iter().map(render_anthropic_message).collect();
        let mut body = json!({
            "model": self.model,
            "system": req.system_prompt,
            "messages": messages,
            "max_tokens": 4096,
            "stream": true,
        });
        if !req.tools.is_empty() {
            body["tools"] = json!(req
                .tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                    .collect::<Vec<_>>());
        }
        body
    }

    fn endpoint(&self) -> String {
        match self.flavor {
            Flavor::Anthropic => format!("{}/messages", self.base_url),
            Flavor::OpenAi | Flavor::OpenAiCompatible => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.flavor {
            Flavor::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
            Flavor::OpenAi | Flavor::OpenAiCompatible => {
                builder.header("Authorization", format!("Bearer {}", self.api_key))
            }
        }
    }
}

fn render_openai_message(m: &crate::message::Message) -> Value {
    match m.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.text(),
        }),
        Role::Assistant => {
            let mut v = json!({ "role": "assistant", "content": m.text() });
            if !m.tool_calls.is_empty() {
                v["tool_calls"] = json!(m
                    .tool_calls
                    .iter()
                    .map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments },
                    }))
                        .collect::<Vec<_>>());
            }
            v
        }
        Role::User => json!({ "role": "user", "content": m.text() }),
        Role::System => json!({ "role": "system", "content": m.text() }),
    }
}

fn render_anthropic_message(m: &crate::message::Message) -> Value {
    match m.role {
        Role::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.text(),
            }],
        }),
        Role::Assistant => {
            let mut blocks: Vec<Value> = vec![json!({ "type": "text", "text": m.text() })];
            for tc in &m.tool_calls {
                let input: Value = serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": input,
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
        Role::User | Role::System => json!({ "role": "user", "content": m.text() }),
    }
}

fn render_openai_tool(t: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": t.name,
            "description": t.description,
            "parameters": t.input_schema,
        },
    })
}

/// Parse one SSE data payload into zero or more [`StreamedPart`]s, tracking per-stream state
/// (the currently open tool-call index) via `open_tool_call_index`.
fn parse_openai_chunk(
    data: &str,
    open_tool_call_index: &mut Option<u64>,
) -> Vec<StreamedPart> {
    let mut out = Vec::new();
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return out;
    };
    let Some(choice) = v["choices"].get(0) else {
        if let Some(usage) = v.get("usage") {
            out.push(StreamedPart::Usage { usage: parse_openai_usage(usage) });
        }
        return out;
    };
    let delta = &choice["delta"];
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            out.push(StreamedPart::TextDelta { text: text.to_string() });
        }
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            let index = call["index"].as_u64().unwrap_or(0);
            let is_new = *open_tool_call_index != Some(index);
            if is_new {
                *open_tool_call_index = Some(index);
                out.push(StreamedPart::ToolCallStart {
                    id: call["id"].as_str().unwrap_or_default().to_string(),
                    name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                    initial_input: json!({}),
                });
            }
            if let Some(frag) = call["function"]["arguments"].as_str() {
                if !frag.is_empty() {
                    out.push(StreamedPart::ToolCallArgumentDelta { fragment: frag.to_string() });
                }
            }
        }
    }
    if let Some(usage) = v.get("usage") {
        out.push(StreamedPart::Usage { usage: parse_openai_usage(usage) });
    }
    out
}

fn parse_openai_usage(usage: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens: usage["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0),
        cache_creation_tokens: 0,
    }
}

fn parse_anthropic_chunk(event_name: &str, data: &str) -> Vec<StreamedPart> {
    let mut out = Vec::new();
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return out;
    };
    match event_name {
        "content_block_start" => {
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                out.push(StreamedPart::ToolCallStart {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    initial_input: json!({}),
                });
            }
        }
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => {
                    if let Some(text) = delta["text"].as_str() {
                        out.push(StreamedPart::TextDelta { text: text.to_string() });
                    }
                }
                Some("input_json_delta") => {
                    if let Some(frag) = delta["partial_json"].as_str() {
                        out.push(StreamedPart::ToolCallArgumentDelta { fragment: frag.to_string() });
                    }
                }
                Some("signature_delta") => {
                    out.push(StreamedPart::ThinkingDelta {
                        text: String::new(),
                        signature: delta["signature"].as_str().map(|s| s.to_string()),
                    });
                }
                Some("thinking_delta") => {
                    if let Some(text) = delta["thinking"].as_str() {
                        out.push(StreamedPart::ThinkingDelta { text: text.to_string(), signature: None });
                    }
                }
                _ => {}
            }
        }
        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                out.push(StreamedPart::Usage {
                    usage: TokenUsage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                        cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
                        cache_creation_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0),
                    },
                });
            }
        }
        "message_stop" => out.push(StreamedPart::Terminal),
        _ => {}
    }
    out
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamedMessage, ProviderError> {
        let body = self.build_request_body(&request);
        let builder = self.client.post(self.endpoint()).json(&body);
        let builder = self.authorize(builder);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let flavor = self.flavor;
        let byte_stream = response.bytes_stream().eventsource();

        let (id_tx, id_rx) = tokio::sync::oneshot::channel();
        let (usage_tx, usage_rx) = tokio::sync::oneshot::channel();

        struct State {
            byte_stream: std::pin::Pin<Box<dyn futures::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>,
            cancel: CancellationToken,
            open_tool_call_index: Option<u64>,
            total_usage: TokenUsage,
            id_tx: Option<tokio::sync::oneshot::Sender<String>>,
            usage_tx: Option<tokio::sync::oneshot::Sender<TokenUsage>>,
            pending: std::collections::VecDeque<Result<StreamedPart, ProviderError>>,
            done: bool,
            has_content: bool,
        }

        let state = State {
            byte_stream: Box::pin(byte_stream),
            cancel,
            open_tool_call_index: None,
            total_usage: TokenUsage::default(),
            id_tx: Some(id_tx),
            usage_tx: Some(usage_tx),
            pending: std::collections::VecDeque::new(),
            done: false,
            has_content: false,
        };

        let parts = futures::stream::unfold(state, move |mut st| async move {
            loop {
                if let Some(part) = st.pending.pop_front() {
                    return Some((part, st));
                }
                if st.done {
                    return None;
                }
                let next = tokio::select! {
                    biased;
                    _ = st.cancel.cancelled() => {
                        st.done = true;
                        if let Some(tx) = st.usage_tx.take() {
                            let _ = tx.send(st.total_usage.clone());
                        }
                        return Some((Err(ProviderError::Connection("cancelled".to_string())), st));
                    }
                    next = st.byte_stream.next() => next,
                };
                let Some(event) = next else {
                    st.done = true;
                    if let Some(tx) = st.usage_tx.take() {
                        let _ = tx.send(st.total_usage.clone());
                    }
                    if !st.has_content {
                        return Some((Err(ProviderError::EmptyResponse), st));
                    }
                    continue;
                };
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(ProviderError::Decode(e.to_string())), st));
                    }
                };
                if event.data == "[DONE]" {
                    st.done = true;
                    if let Some(tx) = st.usage_tx.take() {
                        let _ = tx.send(st.total_usage.clone());
                    }
                    if !st.has_content {
                        return Some((Err(ProviderError::EmptyResponse), st));
                    }
                    continue;
                }
                if let Some(tx) = st.id_tx.take() {
                    let _ = tx.send(String::new());
                }
                let parsed = match flavor {
                    Flavor::Anthropic => parse_anthropic_chunk(&event.event, &event.data),
                    Flavor::OpenAi | Flavor::OpenAiCompatible => {
                        parse_openai_chunk(&event.data, &mut st.open_tool_call_index)
                    }
                };
                for part in parsed {
                    match &part {
                        StreamedPart::Usage { usage } => st.total_usage.add(usage),
                        StreamedPart::Terminal => {}
                        _ => st.has_content = true,
                    }
                    st.pending.push_back(Ok(part));
                }
            }
        });

        Ok(StreamedMessage::new(Box::pin(parts), id_rx, usage_rx))
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn provider_name(&self) -> &str {
        match self.flavor {
            Flavor::OpenAi => "openai",
            Flavor::Anthropic => "anthropic",
            Flavor::OpenAiCompatible => "openai-compatible",
        }
    }
}
