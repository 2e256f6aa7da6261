//! The sub-agent executor: runs a permission-scoped, isolated child [`crate::agent_loop::AgentLoop`]
//! for a `task:<type>[:<action>]` invocation, with bounded recursion depth and per-lane shell
//! isolation.
//!
//! A `depth`-incrementing bounded-recursion guard plus `agent:{agent_id}:subagent:{lane}`
//! lane-id namespacing, funneling every classified operation through one
//! [`crate::tools::router::BashTool`] instance per sub-agent rather than a tool-registry-per-type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent_loop::{AgentLoop, AgentLoopConfig, StopReason};
use crate::message::CommandResult;
use crate::permissions::Permissions;
use crate::provider::Provider;
use crate::step::NullObserver;
use crate::tools::builtins::BuiltinState;
use crate::tools::router::{tokenize, ShellSession, SubagentDispatch};
use crate::tools::skill::SkillLoader;
use crate::tools::Toolset;

/// The fixed closed set of sub-agent invocation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubagentType {
    Explore,
    General,
    SkillSearch,
    SkillEnhance,
}

impl SubagentType {
    fn parse(type_str: &str, action: Option<&str>) -> Option<Self> {
        match (type_str, action) {
            ("explore", _) => Some(SubagentType::Explore),
            ("general", _) => Some(SubagentType::General),
            ("skill", Some("search")) => Some(SubagentType::SkillSearch),
            ("skill", Some("enhance")) => Some(SubagentType::SkillEnhance),
            _ => None,
        }
    }

    /// Permission set: `explore` is read-only, `general` can write but not recurse,
    /// `skill search` has no tools at all, `skill enhance` behaves like `general`.
    fn permissions(self) -> Permissions {
        match self {
            SubagentType::Explore => Permissions::all().excluding(["write", "edit", "task"]),
            SubagentType::General => Permissions::all().excluding(["task"]),
            SubagentType::SkillSearch => Permissions::only(Vec::<String>::new()),
            SubagentType::SkillEnhance => Permissions::all().excluding(["task"]),
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            SubagentType::Explore => "You explore the codebase read-only and report findings.",
            SubagentType::General => "You complete the given task using the available tools.",
            SubagentType::SkillSearch => "You search for a matching skill and report its name.",
            SubagentType::SkillEnhance => "You enhance the given skill definition.",
        }
    }
}

/// Returns a fresh, isolated `(Toolset, cleanup)` pair for a spawned sub-agent — its own
/// persistent shell session, never shared with the parent or siblings.
#[async_trait]
pub trait ToolFactory: Send + Sync {
    async fn build(&self, lane: &str, depth: usize) -> (Toolset, Cleanup);
}

/// A one-shot teardown action, always run on every exit path (success, error, or cancellation).
pub struct Cleanup(Option<Box<dyn FnOnce() + Send>>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Cleanup(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Cleanup(None)
    }

    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Builds an isolated `Toolset` backed by a fresh [`ShellSession`] and a [`BashTool`] scoped to
/// the given permissions; the matching `Cleanup` marks the session exited.
pub struct ShellIsolatedToolFactory {
    pub mcp: Arc<crate::tools::mcp::McpRegistry>,
    pub skill_roots: Vec<std::path::PathBuf>,
}

#[async_trait]
impl ToolFactory for ShellIsolatedToolFactory {
    async fn build(&self, _lane: &str, _depth: usize) -> (Toolset, Cleanup) {
        // Permissions are applied by the caller via a dedicated `BashTool` per sub-agent type;
        // this factory only owns the shell-isolation half of `ToolFactory`.
        let session = Arc::new(ShellSession::new(std::env::current_dir().unwrap_or_default()));
        let cleanup_session = session.clone();
        (Toolset::new(), Cleanup::new(move || {
            tokio::spawn(async move { cleanup_session.exit().await });
        }))
    }
}

pub struct SubagentExecutor {
    provider: Arc<dyn Provider>,
    tool_factory: Arc<dyn ToolFactory>,
    mcp: Arc<crate::tools::mcp::McpRegistry>,
    skill_roots: Vec<std::path::PathBuf>,
    max_spawn_depth: usize,
    agent_id: String,
    depth: usize,
    lane_counter: Arc<AtomicU64>,
}

impl SubagentExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        tool_factory: Arc<dyn ToolFactory>,
        mcp: Arc<crate::tools::mcp::McpRegistry>,
        skill_roots: Vec<std::path::PathBuf>,
        max_spawn_depth: usize,
        agent_id: impl Into<String>,
    ) -> Self {
        SubagentExecutor {
            provider,
            tool_factory,
            mcp,
            skill_roots,
            max_spawn_depth,
            agent_id: agent_id.into(),
            depth: 0,
            lane_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A clone of this executor scoped one level deeper, for the child's own `task:` dispatch.
    fn nested(&self) -> Arc<Self> {
        Arc::new(SubagentExecutor {
            provider: self.provider.clone(),
            tool_factory: self.tool_factory.clone(),
            mcp: self.mcp.clone(),
            skill_roots: self.skill_roots.clone(),
            max_spawn_depth: self.max_spawn_depth,
            agent_id: self.agent_id.clone(),
            depth: self.depth + 1,
            lane_counter: self.lane_counter.clone(),
        })
    }

    #[tracing::instrument(skip_all, fields(depth = self.depth))]
    async fn execute(&self, command: &str, cancel: CancellationToken) -> CommandResult {
        if self.depth >= self.max_spawn_depth {
            return CommandResult::err(format!(
                "sub-agent spawn refused: max depth {} reached",
                self.max_spawn_depth
            ));
        }

        let Some((type_token, rest)) = command.trim().strip_prefix("task:").map(|r| {
            let mut parts = r.splitn(2, char::is_whitespace);
            (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
        }) else {
            return CommandResult::err("not a task: command");
        };
        let (type_str, action) = match type_token.split_once(':') {
            Some((t, a)) => (t, Some(a)),
            None => (type_token, None),
        };
        let Some(subagent_type) = SubagentType::parse(type_str, action) else {
            return CommandResult::err(format!("unknown sub-agent type: {type_token}"));
        };

        let tokens = tokenize(rest);
        let prompt = extract_prompt(&tokens);
        let max_iterations = extract_max_iterations(&tokens);

        let lane = self.lane_counter.fetch_add(1, Ordering::SeqCst);
        let lane_id = format!("agent:{}:subagent:{lane}", self.agent_id);

        let (mut toolset, cleanup) = self.tool_factory.build(&lane_id, self.depth).await;
        let permissions = subagent_type.permissions();
        if permissions.allows("bash") {
            let session = Arc::new(ShellSession::new(std::env::current_dir().unwrap_or_default()));
            let state = Arc::new(BuiltinState::default());
            let skills = Arc::new(SkillLoader::new(self.skill_roots.clone()));
            toolset.register(Arc::new(crate::tools::router::BashTool::new(
                session,
                self.mcp.clone(),
                skills,
                self.nested(),
                state,
                permissions,
            )));
        }

        let config = AgentLoopConfig {
            max_iterations: max_iterations.unwrap_or(25),
            ..AgentLoopConfig::default()
        };
        let mut loop_ = AgentLoop::new(self.provider.as_ref(), &toolset, subagent_type.system_prompt(), config)
            .with_session_id(lane_id);

        let result = loop_.run(prompt, &NullObserver, cancel).await;
        cleanup.run();

        match result {
            Ok(outcome) => match outcome.stop_reason {
                StopReason::Completed | StopReason::MaxIterations => CommandResult::ok(outcome.final_text),
                StopReason::FailureThreshold => CommandResult::err(format!(
                    "sub-agent stopped after repeated tool failures: {}",
                    outcome.final_text
                )),
                StopReason::Cancelled => CommandResult::err("sub-agent cancelled"),
            },
            Err(e) => CommandResult::err(format!("sub-agent error: {e}")),
        }
    }
}

fn extract_prompt(tokens: &[String]) -> String {
    for (i, token) in tokens.iter().enumerate() {
        if token == "--prompt" {
            return tokens.get(i + 1).cloned().unwrap_or_default();
        }
    }
    String::new()
}

fn extract_max_iterations(tokens: &[String]) -> Option<usize> {
    for (i, token) in tokens.iter().enumerate() {
        if token == "--max-iterations" {
            return tokens.get(i + 1).and_then(|v| v.parse().ok());
        }
    }
    None
}

#[async_trait]
impl SubagentDispatch for SubagentExecutor {
    async fn dispatch(&self, command: &str, cancel: CancellationToken) -> CommandResult {
        self.execute(command, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::stream::StreamedPart;

    fn factory() -> Arc<ShellIsolatedToolFactory> {
        Arc::new(ShellIsolatedToolFactory { mcp: Arc::new(crate::tools::mcp::McpRegistry::new(std::time::Duration::from_secs(5))), skill_roots: vec![] })
    }

    #[tokio::test]
    async fn refuses_to_spawn_past_max_depth() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let mcp = Arc::new(crate::tools::mcp::McpRegistry::new(std::time::Duration::from_secs(5)));
        let mut executor = SubagentExecutor::new(provider, factory(), mcp, vec![], 1, "agent1");
        executor.depth = 1;
        let result = executor.execute("task:explore --prompt x", CancellationToken::new()).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("max depth"));
    }

    #[tokio::test]
    async fn explore_subagent_runs_to_completion() {
        let provider = Arc::new(MockProvider::new(vec![vec![StreamedPart::TextDelta { text: "found it".into() }]]));
        let mcp = Arc::new(crate::tools::mcp::McpRegistry::new(std::time::Duration::from_secs(5)));
        let executor = SubagentExecutor::new(provider, factory(), mcp, vec![], 3, "agent1");
        let result = executor.execute(r#"task:explore --prompt "find the bug""#, CancellationToken::new()).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "found it");
    }

    #[tokio::test]
    async fn skill_search_has_no_tools() {
        assert_eq!(SubagentType::SkillSearch.permissions().allows("bash"), false);
    }

    #[tokio::test]
    async fn unknown_subagent_type_errors() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let mcp = Arc::new(crate::tools::mcp::McpRegistry::new(std::time::Duration::from_secs(5)));
        let executor = SubagentExecutor::new(provider, factory(), mcp, vec![], 3, "agent1");
        let result = executor.execute("task:bogus --prompt x", CancellationToken::new()).await;
        assert_eq!(result.exit_code, 1);
    }
}
