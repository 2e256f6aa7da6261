//! The step engine: one LLM turn, eager tool execution, grouped bounded-parallel
//! dispatch, ordered result collection, cancellation.
//!
//! Streaming-driven eager start-on-parse (a tool call begins executing as soon as its arguments
//! finish parsing, not after the whole turn's text blob completes) plus task-batch grouping with
//! `tokio::sync::Semaphore`-bounded parallelism.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, ProviderError};
use crate::message::{Message, ToolCall, ToolResult};
use crate::provider::{GenerateRequest, Provider};
use crate::stream::{StreamedPart, TokenUsage};
use crate::tools::router::is_task_batch_call;
use crate::tools::Toolset;

use futures::StreamExt;

/// Observers receive these events as the step unfolds. All callbacks are best-effort: a
/// callback that panics is caught and logged, never allowed to break the step.
pub trait StepObserver: Send + Sync {
    fn on_message_part(&self, _part: &StreamedPart) {}
    fn on_tool_call(&self, _call: &ToolCall) {}
    fn on_tool_result(&self, _result: &ToolResult) {}
    fn on_usage(&self, _usage: &TokenUsage, _model: &str) {}
    /// Free-form progress text, e.g. from a stop hook reporting on its own work.
    fn on_progress(&self, _message: &str) {}
}

/// An observer that does nothing; the default when the caller doesn't need callbacks.
pub struct NullObserver;
impl StepObserver for NullObserver {}

fn invoke<F: FnOnce()>(label: &str, f: F) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::warn!(callback = label, "step observer callback panicked; swallowed");
    }
}

pub struct StepResult {
    pub message_id: String,
    pub message: Message,
    pub usage: TokenUsage,
    pub tool_calls: Vec<ToolCall>,
    results: Vec<ToolResult>,
}

impl StepResult {
    /// Tool results in call order, regardless of settlement order.
    pub fn tool_results(&self) -> &[ToolResult] {
        &self.results
    }
}

pub struct Step<'a> {
    pub provider: &'a dyn Provider,
    pub toolset: &'a Toolset,
    pub max_parallel_tasks: usize,
}

impl<'a> Step<'a> {
    pub fn new(provider: &'a dyn Provider, toolset: &'a Toolset, max_parallel_tasks: usize) -> Self {
        Step { provider, toolset, max_parallel_tasks }
    }

    /// Run one turn: stream the provider's response, eagerly start each tool call's execution as
    /// soon as it's fully parsed, then collect results group by group.
    pub async fn run(
        &self,
        system_prompt: String,
        history: Vec<Message>,
        observer: &dyn StepObserver,
        cancel: CancellationToken,
    ) -> Result<StepResult, AgentError> {
        let request = GenerateRequest { system_prompt, history, tools: self.toolset.tools() };
        let streamed = self.provider.generate(request, cancel.clone()).await?;

        let mut parts_stream = streamed.parts;
        let mut assembler = crate::assembler::MessageAssembler::new();
        let mut pending: Vec<(ToolCall, crate::tools::CancellableFuture<ToolResult>)> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    for (_, fut) in &pending {
                        fut.cancel();
                    }
                    for (_, fut) in pending {
                        let _ = fut.await;
                    }
                    return Err(AgentError::Cancelled);
                }
                item = parts_stream.next() => item,
            };
            let Some(item) = next else { break };
            let part = item?;
            invoke("on_message_part", || observer.on_message_part(&part));

            if let Some(finished) = assembler.push(part) {
                start_tool(self.toolset, finished, observer, &mut pending);
            }
        }

        let (message, usage, trailing) = assembler.finish();
        if let Some(last) = trailing {
            start_tool(self.toolset, last, observer, &mut pending);
        }

        if usage != TokenUsage::default() {
            invoke("on_usage", || observer.on_usage(&usage, self.provider.provider_name()));
        }

        let message_id = streamed.id.await.unwrap_or_default();
        let tool_calls = message.tool_calls.clone();
        let results = self
            .collect_results(pending, &tool_calls, observer, &cancel)
            .await?;

        Ok(StepResult { message_id, message, usage, tool_calls, results })
    }

    async fn collect_results(
        &self,
        pending: Vec<(ToolCall, crate::tools::CancellableFuture<ToolResult>)>,
        tool_calls: &[ToolCall],
        observer: &dyn StepObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>, AgentError> {
        let mut by_id: std::collections::HashMap<String, crate::tools::CancellableFuture<ToolResult>> =
            pending.into_iter().map(|(c, f)| (c.id, f)).collect();

        let groups = group_by_task_batch(tool_calls);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_tasks.max(1)));
        let mut ordered = std::collections::HashMap::new();

        for group in groups {
            if cancel.is_cancelled() {
                for call in &group {
                    if let Some(fut) = by_id.get(&call.id) {
                        fut.cancel();
                    }
                }
                for call in &group {
                    if let Some(fut) = by_id.remove(&call.id) {
                        let _ = fut.await;
                    }
                }
                return Err(AgentError::Cancelled);
            }

            if group.len() == 1 || !is_task_batch_call(&group[0].name_or_command()) {
                for call in &group {
                    let Some(mut fut) = by_id.remove(&call.id) else { continue };
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            fut.cancel();
                            let result = fut.await;
                            result
                        }
                        result = &mut fut => result,
                    };
                    invoke("on_tool_result", || observer.on_tool_result(&result));
                    ordered.insert(call.id.clone(), result);
                    if cancel.is_cancelled() {
                        return Err(AgentError::Cancelled);
                    }
                }
                continue;
            }

            // Each spawned task races its own cancel request against completion, so a
            // cancellation that fires while the group is still running reaches every
            // in-flight task rather than only the ones not yet started.
            let mut set = JoinSet::new();
            for call in group.clone() {
                let Some(mut fut) = by_id.remove(&call.id) else { continue };
                let permit = semaphore.clone();
                let task_cancel = cancel.clone();
                set.spawn(async move {
                    let _permit = permit.acquire_owned().await;
                    let result = tokio::select! {
                        biased;
                        _ = task_cancel.cancelled() => {
                            fut.cancel();
                            fut.await
                        }
                        result = &mut fut => result,
                    };
                    (call.id, result)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((id, result)) => {
                        invoke("on_tool_result", || observer.on_tool_result(&result));
                        ordered.insert(id, result);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tool task join failed");
                    }
                }
            }
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
        }

        Ok(tool_calls
            .iter()
            .map(|c| {
                ordered.remove(&c.id).unwrap_or_else(|| {
                    ToolResult::error(c.id.clone(), "Tool execution failed: task was dropped", "execution_error")
                })
            })
                .collect())
    }
}

fn start_tool(
    toolset: &Toolset,
    call: ToolCall,
    observer: &dyn StepObserver,
    pending: &mut Vec<(ToolCall, crate::tools::CancellableFuture<ToolResult>)>,
) {
    invoke("on_tool_call", || observer.on_tool_call(&call));
    let fut = toolset.handle(call.clone());
    pending.push((call, fut));
}

/// Partition tool calls into maximal contiguous groups where consecutive calls are all
/// task-batch calls; everything else forms singleton groups.
fn group_by_task_batch(tool_calls: &[ToolCall]) -> Vec<Vec<ToolCall>> {
    let mut groups: Vec<Vec<ToolCall>> = Vec::new();
    for call in tool_calls {
        let is_batch = is_task_batch_call(&call.name_or_command());
        let extends_last = is_batch
            && groups
                .last()
                .is_some_and(|g| g.iter().all(|c| is_task_batch_call(&c.name_or_command())));
        if extends_last {
            groups.last_mut().expect("checked above").push(call.clone());
        } else {
            groups.push(vec![call.clone()]);
        }
    }
    groups
}

trait CommandStringExt {
    fn name_or_command(&self) -> String;
}

impl CommandStringExt for ToolCall {
    /// Tasks are dispatched as `Bash` calls whose `command` argument starts with `task:`; pull
    /// that string out of the raw argument JSON for classification purposes.
    fn name_or_command(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.arguments)
            .ok()
            .and_then(|v| v.get("command").and_then(|c| c.as_str()).map(str::to_string))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, command: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "Bash".into(),
            arguments: serde_json::json!({ "command": command }).to_string(),
        }
    }

    #[test]
    fn groups_contiguous_task_batch_calls_together() {
        let calls = vec![
            call("c1", "task:explore --prompt A"),
            call("c2", "task:explore --prompt B"),
            call("c3", "echo hi"),
            call("c4", "task:general --prompt C"),
        ];
        let groups = group_by_task_batch(&calls);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].len(), 1);
    }

    #[test]
    fn all_singleton_when_no_task_batches() {
        let calls = vec![call("c1", "echo a"), call("c2", "echo b")];
        let groups = group_by_task_batch(&calls);
        assert_eq!(groups.len(), 2);
    }

    /// A scripted `Bash` stand-in: sleeps according to the command text, fails if it contains
    /// `"fail"`, observes its own cancellation token otherwise.
    struct ScriptedTool;

    #[async_trait::async_trait]
    impl crate::tools::Tool for ScriptedTool {
        fn name(&self) -> &str {
            "Bash"
        }
        fn description(&self) -> &str {
            "scripted"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": { "command": { "type": "string" } }, "required": ["command"] })
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            cancel: CancellationToken,
        ) -> Result<ToolResult, String> {
            let command = args["command"].as_str().unwrap_or_default().to_string();
            let delay = if command.contains("slow") {
                std::time::Duration::from_millis(90)
            } else {
                std::time::Duration::from_millis(15)
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            if command.contains("fail") {
                Ok(ToolResult::error("", "scripted failure", "execution_error"))
            } else {
                Ok(ToolResult::ok("", "scripted ok"))
            }
        }
    }

    fn tool_call_starts(commands: &[(&str, &str)]) -> Vec<StreamedPart> {
        let mut parts: Vec<StreamedPart> = commands
            .iter()
            .map(|(id, command)| StreamedPart::ToolCallStart {
                id: id.to_string(),
                name: "Bash".into(),
                initial_input: serde_json::json!({ "command": command }),
            })
                .collect();
        parts.push(StreamedPart::Terminal);
        parts
    }

    fn scripted_step(provider: &crate::provider::mock::MockProvider, toolset: &Toolset) -> Step<'_> {
        Step::new(provider, toolset, 5)
    }

    #[tokio::test]
    async fn task_batch_results_stay_in_call_order_with_one_failure() {
        let provider = crate::provider::mock::MockProvider::new(vec![tool_call_starts(&[
            ("c1", "task:explore --prompt \"A\""),
            ("c2", "task:explore --prompt \"fail\""),
            ("c3", "task:general --prompt \"C\""),
        ])]);
        let mut toolset = Toolset::new();
        toolset.register(std::sync::Arc::new(ScriptedTool));
        let step = scripted_step(&provider, &toolset);
        let result = step
            .run(String::new(), Vec::new(), &NullObserver, CancellationToken::new())
            .await
            .unwrap();
        let flags: Vec<bool> = result.tool_results().iter().map(|r| r.is_error).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    struct OrderObserver(std::sync::Mutex<Vec<String>>);
    impl StepObserver for OrderObserver {
        fn on_tool_result(&self, result: &ToolResult) {
            self.0.lock().unwrap_or_else(|e| e.into_inner()).push(result.tool_call_id.clone());
        }
    }

    #[tokio::test]
    async fn fast_task_results_settle_before_the_slow_one() {
        let provider = crate::provider::mock::MockProvider::new(vec![tool_call_starts(&[
            ("fast1", "task:explore --prompt \"A\""),
            ("slow", "task:general --prompt \"slow\""),
            ("fast2", "task:explore --prompt \"C\""),
        ])]);
        let mut toolset = Toolset::new();
        toolset.register(std::sync::Arc::new(ScriptedTool));
        let step = scripted_step(&provider, &toolset);
        let observer = OrderObserver(std::sync::Mutex::new(Vec::new()));
        let result = step.run(String::new(), Vec::new(), &observer, CancellationToken::new()).await.unwrap();
        assert!(result.tool_results().iter().all(|r| !r.is_error));
        let settlement_order = observer.0.into_inner().unwrap_or_else(|e| e.into_inner());
        let slow_pos = settlement_order.iter().position(|id| id == "slow").unwrap();
        assert_eq!(slow_pos, settlement_order.len() - 1);
    }

    #[tokio::test]
    async fn cancellation_mid_batch_is_delivered_to_every_in_flight_task() {
        let provider = crate::provider::mock::MockProvider::new(vec![tool_call_starts(&[
            ("c1", "task:explore --prompt \"slow\""),
            ("c2", "task:explore --prompt \"slow\""),
            ("c3", "task:general --prompt \"slow\""),
        ])]);
        let mut toolset = Toolset::new();
        toolset.register(std::sync::Arc::new(ScriptedTool));
        let step = scripted_step(&provider, &toolset);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result = step.run(String::new(), Vec::new(), &NullObserver, cancel).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
