//! Headless CLI harness: wires a provider, the built-in toolset, and an [`AgentLoop`]
//! together, printing streamed events to stdout. Clap-derived flags, env-sourced API keys,
//! one `tracing` init call up front.

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use synapse_agent_core::agent_loop::{AgentEvent, AgentLoop, AgentLoopConfig};
use synapse_agent_core::config::Config;
use synapse_agent_core::logging;
use synapse_agent_core::provider::{OpenAiCompatibleProvider, Provider};
use synapse_agent_core::subagent::{ShellIsolatedToolFactory, SubagentExecutor};
use synapse_agent_core::tools::builtins::BuiltinState;
use synapse_agent_core::tools::mcp::McpRegistry;
use synapse_agent_core::tools::router::{BashTool, ShellSession};
use synapse_agent_core::tools::skill::SkillLoader;
use synapse_agent_core::tools::Toolset;
use synapse_agent_core::permissions::Permissions;

#[derive(Parser)]
#[command(name = "synapse", about = "Run a single agent-loop turn against a prompt")]
struct Cli {
    /// Prompt text. Reads stdin if omitted.
    prompt: Option<String>,

    /// "openai", "anthropic", or a base URL for an OpenAI-compatible gateway.
    #[arg(long, default_value = "anthropic")]
    provider: String,

    #[arg(long, default_value = "claude-sonnet-4-5")]
    model: String,

    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

fn build_provider(cli: &Cli) -> Arc<dyn Provider> {
    match cli.provider.as_str() {
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            Arc::new(OpenAiCompatibleProvider::openai(key, cli.model.clone()))
        }
        "anthropic" => {
            let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
            Arc::new(OpenAiCompatibleProvider::anthropic(key, cli.model.clone()))
        }
        base_url => {
            let key = std::env::var("SYNAPSE_API_KEY").unwrap_or_default();
            Arc::new(OpenAiCompatibleProvider::compatible(base_url, key, cli.model.clone(), 128_000))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    logging::init(config.log_format, config.log_dir.clone());

    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let provider = build_provider(&cli);
    let mcp = Arc::new(McpRegistry::new(std::time::Duration::from_millis(config.mcp_timeout_ms)));
    let skill_roots = vec![dirs::home_dir().unwrap_or_default().join(".synapse/skills")];

    let agent_id = uuid::Uuid::new_v4().to_string();
    let subagents = Arc::new(SubagentExecutor::new(
        provider.clone(),
        Arc::new(ShellIsolatedToolFactory { mcp: mcp.clone(), skill_roots: skill_roots.clone() }),
        mcp.clone(),
        skill_roots.clone(),
        config.max_spawn_depth,
        agent_id.clone(),
    ));

    let session = Arc::new(ShellSession::new(std::env::current_dir()?));
    let state = Arc::new(BuiltinState::default());
    let skills = Arc::new(SkillLoader::new(skill_roots));

    let mut toolset = Toolset::new();
    toolset.register(Arc::new(BashTool::new(
        session,
        mcp,
        skills,
        subagents,
        state,
        Permissions::all(),
    )));

    let loop_config = AgentLoopConfig {
        max_iterations: config.max_iterations,
        max_parallel_tasks: config.max_parallel_tasks,
        failure_window_size: config.failure_window_size,
        failure_threshold: config.failure_threshold,
        ..AgentLoopConfig::default()
    };

    let mut agent = AgentLoop::new(
        provider.as_ref(),
        &toolset,
        "You are a careful, methodical coding assistant.",
        loop_config,
    )
        .with_session_id(agent_id);

    let mut events = agent.run_streamed(prompt, CancellationToken::new()).await;
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::MessagePart(_) => {}
            AgentEvent::ToolCall(call) => println!("[tool call] {} {}", call.name, call.arguments),
            AgentEvent::ToolResult(result) => println!("[tool result] {}", result.rendered_body()),
            AgentEvent::Usage(usage) => {
                tracing::debug!(?usage, "turn usage");
            }
            AgentEvent::Progress(message) => println!("[progress] {message}"),
            AgentEvent::Stopped(reason) => {
                println!("[stopped] {reason:?}");
            }
        }
    }

    Ok(())
}
