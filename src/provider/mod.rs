//! LLM provider contract.
//!
//! A typed [`ProviderError`] surface instead of a flat `Result<T, String>`, and a properly
//! streamed [`StreamedMessage`] instead of a single-shot completion.

pub mod openai_compatible;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;
use crate::stream::{StreamedPart, TokenUsage};
use crate::tools::ToolDefinition;

pub use openai_compatible::OpenAiCompatibleProvider;

/// A streamed response: the part stream plus futures for the provider-assigned message id and
/// final usage, both resolved only once the stream is fully drained.
pub struct StreamedMessage {
    pub parts: BoxStream<'static, Result<StreamedPart, ProviderError>>,
    /// Resolves to the provider message id once known; empty string if the provider never
    /// sends one before the stream ends.
    pub id: tokio::sync::oneshot::Receiver<String>,
    /// Resolves to the turn's total usage once the stream terminates.
    pub usage: tokio::sync::oneshot::Receiver<TokenUsage>,
}

impl StreamedMessage {
    pub fn new(
        parts: BoxStream<'static, Result<StreamedPart, ProviderError>>,
        id: tokio::sync::oneshot::Receiver<String>,
        usage: tokio::sync::oneshot::Receiver<TokenUsage>,
    ) -> Self {
        StreamedMessage { parts, id, usage }
    }
}

/// One turn's worth of request context handed to a provider.
pub struct GenerateRequest {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream a completion for `request`. Cancellation: if `cancel` fires while iterating the
    /// returned stream, the implementation must stop promptly and the stream's next item must
    /// be a [`ProviderError`] distinguishing cancellation is the *caller's* responsibility (the
    /// step engine wraps consumption in a cancel-aware select, see `crate::step`); the provider
    /// itself only needs to stop producing once the underlying transport is aborted.
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamedMessage, ProviderError>;

    fn context_limit(&self) -> usize;

    fn provider_name(&self) -> &str;
}

#[cfg(test)]
pub mod mock {
    //! Scripted provider for tests, mirroring `agent::loop_::tests::MockProvider` in the
    //! teacher: a queue of canned responses, one consumed per `generate` call.

    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    pub struct MockProvider {
        responses: Mutex<std::collections::VecDeque<Vec<StreamedPart>>>,
    }

    impl MockProvider {
        pub fn new(responses: Vec<Vec<StreamedPart>>) -> Self {
            MockProvider {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn generate(
            &self,
            _request: GenerateRequest,
            _cancel: CancellationToken,
        ) -> Result<StreamedMessage, ProviderError> {
            let parts = {
                let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
                guard.pop_front().unwrap_or_default()
            };
            let (id_tx, id_rx) = tokio::sync::oneshot::channel();
            let (usage_tx, usage_rx) = tokio::sync::oneshot::channel();
            let usage_total = parts.iter().fold(TokenUsage::default(), |mut acc, p| {
                if let StreamedPart::Usage { usage } = p {
                    acc.add(usage);
                }
                acc
            });
            let _ = id_tx.send("mock-message-id".to_string());
            let _ = usage_tx.send(usage_total);
            let stream = stream::iter(parts.into_iter().map(Ok));
            Ok(StreamedMessage::new(Box::pin(stream), id_rx, usage_rx))
        }

        fn context_limit(&self) -> usize {
            128_000
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
