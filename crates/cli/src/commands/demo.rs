//! `agentbus demo`: Several echo agents sharing one in-process broker.
//!
//! Each agent answers the same message in turn, so later agents see the
//! earlier ones in their shared context. The first agent then calls a tool
//! through the host bridge.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use agentbus_agent::{AgentWorker, HostBridge, WorkerEvent, WorkerHandle};
use agentbus_broker::BrokerHandle;
use agentbus_config::AppConfig;
use agentbus_core::agent::AgentConfig;
use agentbus_core::model::ToolDefinition;
use agentbus_core::tool::{Tool, ToolRegistry};
use agentbus_providers::{EchoAdapter, ModelRegistry};
use async_trait::async_trait;
use tracing::{info, warn};

const DEFAULT_MESSAGE: &str = "Hello from the AgentBus demo";
const CHUNK_DELAY: Duration = Duration::from_millis(30);

/// Counts the words of `text`.
struct WordCountTool;

#[async_trait]
impl Tool for WordCountTool {
    fn name(&self) -> &str {
        "word_count"
    }

    fn description(&self) -> &str {
        "Count the words in a piece of text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, String> {
        let text = arguments["text"]
            .as_str()
            .ok_or("Missing 'text' argument")?;
        Ok(serde_json::json!(text.split_whitespace().count()))
    }
}

/// Configured agents, or `count` generated echo agents when none are configured.
/// Agents that list no tools of their own get the host's.
fn demo_agents(config: &AppConfig, count: usize, host_tools: &[ToolDefinition]) -> Vec<AgentConfig> {
    let mut agents = config.agent_configs();
    if agents.is_empty() {
        agents = (1..=count.max(1))
            .map(|n| {
                AgentConfig::new(format!("agent-{n}"))
                    .with_model("echo")
                    .with_system_prompt(format!("You are demo agent {n}."))
            })
            .collect();
    }
    for agent in &mut agents {
        if agent.tools.is_empty() {
            agent.tools = host_tools.to_vec();
        }
    }
    agents
}

pub async fn run(agents: usize, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let message = message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    let broker = BrokerHandle::spawn(&config.broker);

    let mut tools = ToolRegistry::new();
    tools.register(Box::new(WordCountTool));
    let host = HostBridge::new(tools);
    let host_tools = host.definitions();
    let _host = host.spawn(&broker)?;

    let mut models = ModelRegistry::with_builtin();
    models.register(Arc::new(EchoAdapter::new().with_chunk_delay(CHUNK_DELAY)));

    println!("🦀 AgentBus Demo");
    println!("   Models: {}", models.list().join(", "));
    let tool_names: Vec<&str> = host_tools.iter().map(|t| t.name.as_str()).collect();
    println!("   Tools:  {}", tool_names.join(", "));

    let mut workers: Vec<(String, WorkerHandle)> = Vec::new();
    for agent in demo_agents(&config, agents, &host_tools) {
        let agent_id = agent.id.clone();
        let mut worker = AgentWorker::spawn(broker.connect()?, models.clone(), config.worker.clone());
        worker.init(agent)?;
        match worker.recv().await {
            Some(WorkerEvent::Ready { .. }) => {
                info!(agent_id = %agent_id, "Demo agent ready");
                println!("   ✅ {agent_id} ready");
            }
            Some(WorkerEvent::Error { message, .. }) => {
                return Err(format!("{agent_id} failed to start: {message}").into());
            }
            other => return Err(format!("{agent_id}: unexpected {other:?}").into()),
        }
        workers.push((agent_id, worker));
    }
    println!();

    for (agent_id, worker) in &mut workers {
        worker.message(message.clone())?;
        drain_turn(agent_id, worker).await?;
    }

    if let Some((agent_id, worker)) = workers.first_mut() {
        let args = serde_json::json!({ "text": message });
        worker.message(format!("!tool word_count {args}"))?;
        drain_turn(agent_id, worker).await?;
    }

    let snapshot = broker.snapshot().await?;
    println!();
    println!(
        "📊 {} agents, {} connections, ring {}/{}",
        snapshot.stats.agents,
        snapshot.stats.connections,
        snapshot.stats.ring_size,
        snapshot.stats.ring_capacity
    );

    for (_, worker) in workers {
        worker.shutdown();
    }

    Ok(())
}

/// Print one message's events until it is done or fails.
async fn drain_turn(
    agent_id: &str,
    worker: &mut WorkerHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    while let Some(event) = worker.recv().await {
        match &event {
            WorkerEvent::Start { .. } => print!("  {agent_id} > "),
            WorkerEvent::Chunk { text, .. } => print!("{text}"),
            WorkerEvent::Queued { position, .. } => println!("  {agent_id} queued at {position}"),
            WorkerEvent::ToolCall { tool, .. } => print!("[🔧 {} {}] ", tool.name, tool.arguments),
            WorkerEvent::Done { .. } => println!(),
            WorkerEvent::Error { message, .. } => {
                warn!(agent_id = %agent_id, error = %message, "Demo turn failed");
                println!("\n  [Error] {message}");
            }
            WorkerEvent::Ready { .. } => {}
        }
        std::io::stdout().flush()?;
        if event.is_terminal() {
            return Ok(());
        }
    }
    Err(format!("{agent_id} stopped unexpectedly").into())
}
