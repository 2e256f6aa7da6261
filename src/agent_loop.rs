//! The agent loop: iterates steps, appends turns to history, detects failure patterns,
//! enforces iteration caps, triggers history offload, fans out events, runs stop hooks.
//!
//! A run/run_streamed split over an ambient `CancellationToken`, with a sliding-window
//! failure detector and a history-offload trigger layered on top.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::failure_window::FailureWindow;
use crate::hooks::{ConversationSnapshot, HookRegistry};
use crate::message::{Message, ToolResult};
use crate::offload::{self, OffloadConfig};
use crate::provider::Provider;
use crate::step::{NullObserver, Step, StepObserver};
use crate::stream::{StreamedPart, TokenUsage};
use crate::tools::Toolset;
use crate::usage::UsageAccumulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    MaxIterations,
    FailureThreshold,
    Cancelled,
}

pub struct AgentOutcome {
    pub stop_reason: StopReason,
    pub final_text: String,
    pub still_exceeds_offload_threshold: bool,
}

pub enum AgentEvent {
    MessagePart(StreamedPart),
    ToolCall(crate::message::ToolCall),
    ToolResult(ToolResult),
    Usage(TokenUsage),
    /// Free-form progress text, e.g. from a stop hook reporting on its own work.
    Progress(String),
    Stopped(StopReason),
}

pub struct AgentLoopConfig {
    pub max_iterations: usize,
    pub max_parallel_tasks: usize,
    pub failure_window_size: usize,
    pub failure_threshold: usize,
    pub offload: OffloadConfig,
    pub offload_dir: PathBuf,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        AgentLoopConfig {
            max_iterations: 50,
            max_parallel_tasks: 5,
            failure_window_size: 10,
            failure_threshold: 3,
            offload: OffloadConfig::default(),
            offload_dir: std::env::temp_dir().join("synapse-offload"),
        }
    }
}

/// One conversation's worth of iteration state: history, failure window, usage, hooks. A fresh
/// instance should be constructed per top-level conversation or per sub-agent spawn — the
/// failure window is scoped to the instance, not reset between steps.
pub struct AgentLoop<'a> {
    provider: &'a dyn Provider,
    toolset: &'a Toolset,
    system_prompt: String,
    config: AgentLoopConfig,
    history: Vec<Message>,
    failures: FailureWindow,
    usage: UsageAccumulator,
    hooks: HookRegistry,
    working_dir: PathBuf,
    session_id: Option<String>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        toolset: &'a Toolset,
        system_prompt: impl Into<String>,
        config: AgentLoopConfig,
    ) -> Self {
        AgentLoop {
            provider,
            toolset,
            system_prompt: system_prompt.into(),
            failures: FailureWindow::new(config.failure_window_size, config.failure_threshold),
            usage: UsageAccumulator::new(50),
            hooks: HookRegistry::new(),
            history: Vec::new(),
            config,
            working_dir: std::env::current_dir().unwrap_or_default(),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn register_hook(&mut self, hook: std::sync::Arc<dyn crate::hooks::StopHook>) {
        self.hooks.register(hook);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }

    /// Run the loop to a terminal state against callback-style observation.
    pub async fn run(
        &mut self,
        user_message: impl Into<String>,
        observer: &dyn StepObserver,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        self.history.push(Message::user(user_message));
        let mut iterations = 0usize;
        let mut still_exceeds_offload_threshold = false;

        loop {
            if cancel.is_cancelled() {
                return self
                    .finish(StopReason::Cancelled, String::new(), still_exceeds_offload_threshold, observer)
                    .await;
            }
            if iterations >= self.config.max_iterations {
                let final_text = last_assistant_text(&self.history);
                return self
                    .finish(StopReason::MaxIterations, final_text, still_exceeds_offload_threshold, observer)
                    .await;
            }
            iterations += 1;

            let outcome =
                offload::maybe_offload(&mut self.history, &self.config.offload_dir, &self.config.offload)
                    .await
                    .map_err(|e| AgentError::Provider(crate::error::ProviderError::Connection(e.to_string())))?;
            still_exceeds_offload_threshold = outcome.still_exceeds_threshold;

            let step = Step::new(self.provider, self.toolset, self.config.max_parallel_tasks);
            let result = step
                .run(self.system_prompt.clone(), self.history.clone(), observer, cancel.clone())
                .await?;

            self.usage.record(&result.usage);
            self.history.push(result.message.clone());

            if result.tool_calls.is_empty() {
                let final_text = result.message.text();
                return self
                    .finish(StopReason::Completed, final_text, still_exceeds_offload_threshold, observer)
                    .await;
            }

            for tool_result in result.tool_results() {
                self.failures.push(tool_result.is_error);
                self.history.push(Message::tool_result(tool_result.tool_call_id.clone(), tool_result.rendered_body()));
            }

            if self.failures.tripped() {
                let final_text = last_assistant_text(&self.history);
                return self
                    .finish(StopReason::FailureThreshold, final_text, still_exceeds_offload_threshold, observer)
                    .await;
            }
        }
    }

    /// Streaming variant: same algorithm as [`Self::run`], fanning events out over a channel
    /// instead of direct callbacks.
    pub async fn run_streamed(
        &mut self,
        user_message: impl Into<String>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(256);
        struct ChannelObserver(mpsc::Sender<AgentEvent>);
        impl StepObserver for ChannelObserver {
            fn on_message_part(&self, part: &StreamedPart) {
                let _ = self.0.try_send(AgentEvent::MessagePart(part.clone()));
            }
            fn on_tool_call(&self, call: &crate::message::ToolCall) {
                let _ = self.0.try_send(AgentEvent::ToolCall(call.clone()));
            }
            fn on_tool_result(&self, result: &ToolResult) {
                let _ = self.0.try_send(AgentEvent::ToolResult(result.clone()));
            }
            fn on_usage(&self, usage: &TokenUsage, _model: &str) {
                let _ = self.0.try_send(AgentEvent::Usage(usage.clone()));
            }
            fn on_progress(&self, message: &str) {
                let _ = self.0.try_send(AgentEvent::Progress(message.to_string()));
            }
        }
        let observer = ChannelObserver(tx.clone());
        let message = user_message.into();

        // The loop itself must run without borrowing `self` across the spawned task, since
        // `AgentLoop` holds non-'static references (`provider`, `toolset`); callers that want a
        // genuinely decoupled receiver should drive `run` on their own task. Here we drive it
        // inline and forward the final stop reason once `run` resolves.
        let result = self.run(message, &observer, cancel).await;
        match result {
            Ok(outcome) => {
                let _ = tx.try_send(AgentEvent::Stopped(outcome.stop_reason));
            }
            Err(_) => {
                let _ = tx.try_send(AgentEvent::Stopped(StopReason::Cancelled));
            }
        }
        rx
    }

    async fn finish(
        &self,
        stop_reason: StopReason,
        final_text: String,
        still_exceeds_offload_threshold: bool,
        observer: &dyn StepObserver,
    ) -> Result<AgentOutcome, AgentError> {
        if stop_reason != StopReason::Cancelled {
            let on_progress = |message: &str| observer.on_progress(message);
            let snapshot = ConversationSnapshot {
                session_id: self.session_id.as_deref(),
                working_dir: &self.working_dir,
                messages: &self.history,
                final_text: &final_text,
                on_progress: &on_progress,
            };
            self.hooks.run(&snapshot).await;
        }
        if stop_reason == StopReason::Cancelled {
            return Err(AgentError::Cancelled);
        }
        Ok(AgentOutcome { stop_reason, final_text, still_exceeds_offload_threshold })
    }
}

fn last_assistant_text(history: &[Message]) -> String {
    history
        .iter()
        .rev()
        .find(|m| m.role == crate::message::Role::Assistant)
        .map(|m| m.text())
        .unwrap_or_default()
}
