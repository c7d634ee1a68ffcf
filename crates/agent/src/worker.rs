//! The agent worker.
//!
//! Each worker is two tasks:
//!
//! - a **dispatcher** that owns the broker connection and the command
//!   channel. It answers `init`, settles tool results, mirrors ring updates
//!   and decides whether an incoming message runs now or waits (`queued`).
//! - a **turn task** consuming one FIFO channel of jobs. It runs at most one
//!   model turn at a time, so an agent's messages are never interleaved or
//!   reordered.
//!
//! Failures inside a turn become an `error` event for that message; neither
//! task stops because of them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agentbus_broker::BrokerConnection;
use agentbus_config::WorkerConfig;
use agentbus_core::agent::AgentConfig;
use agentbus_core::error::{Error, Result};
use agentbus_core::message::{ConversationState, Turn};
use agentbus_core::model::{ModelAdapter, ModelEvent, ModelRequest};
use agentbus_core::protocol::BrokerEvent;
use agentbus_core::tool::ToolCallRequest;
use agentbus_providers::ModelRegistry;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{BrokerClient, ToolBridge};
use crate::prompt::{assemble_turns, build_system_prompt};
use crate::worker_event::{WorkerCommand, WorkerEvent};

const EVENT_BUFFER: usize = 256;

/// Host-side handle to a running worker. Dropping it shuts the worker down.
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    events: mpsc::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionLost("worker has stopped".into()))
    }

    pub fn init(&self, config: AgentConfig) -> Result<()> {
        self.send(WorkerCommand::Init { config })
    }

    pub fn message(&self, content: impl Into<String>) -> Result<()> {
        self.send(WorkerCommand::Message {
            content: content.into(),
            id: None,
        })
    }

    pub fn message_with_id(&self, id: impl Into<String>, content: impl Into<String>) -> Result<()> {
        self.send(WorkerCommand::Message {
            content: content.into(),
            id: Some(id.into()),
        })
    }

    pub fn tool_result(
        &self,
        call_id: impl Into<String>,
        result: serde_json::Value,
        error: Option<String>,
    ) -> Result<()> {
        self.send(WorkerCommand::ToolResult {
            call_id: call_id.into(),
            result,
            error,
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.send(WorkerCommand::Reset {})
    }

    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    pub fn split(self) -> (mpsc::UnboundedSender<WorkerCommand>, mpsc::Receiver<WorkerEvent>) {
        (self.commands, self.events)
    }

    /// Stop accepting commands and unregister. Messages already queued still run.
    pub fn shutdown(self) {
        drop(self);
    }
}

/// Spawns agent workers.
pub struct AgentWorker;

impl AgentWorker {
    /// Start a worker on an open broker connection.
    ///
    /// The worker does nothing until it receives `init`.
    pub fn spawn(
        connection: BrokerConnection,
        models: ModelRegistry,
        settings: WorkerConfig,
    ) -> WorkerHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (sender, broker_events) = connection.split();
        let client = Arc::new(BrokerClient::new(sender, &settings));

        let dispatcher = Dispatcher {
            client,
            models,
            settings,
            events: events_tx,
            state: DispatchState::Uninitialized,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        tokio::spawn(dispatcher.run(command_rx, broker_events));

        WorkerHandle { commands, events }
    }
}

enum DispatchState {
    Uninitialized,
    /// Register sent, waiting for the broker's `registered`.
    /// Jobs accepted meanwhile wait in `backlog`, oldest first.
    Registering {
        config: AgentConfig,
        adapter: Arc<dyn ModelAdapter>,
        backlog: VecDeque<TurnJob>,
    },
    Ready {
        agent_id: String,
        jobs: mpsc::UnboundedSender<TurnJob>,
    },
}

enum TurnJob {
    Message { id: String, content: String },
    Reset,
}

struct Dispatcher {
    client: Arc<BrokerClient>,
    models: ModelRegistry,
    settings: WorkerConfig,
    events: mpsc::Sender<WorkerEvent>,
    state: DispatchState,
    /// Messages accepted and not finished, the running one included
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
        mut broker_events: mpsc::Receiver<BrokerEvent>,
    ) {
        let mut broker_open = true;
        let mut heartbeat = self
            .settings
            .heartbeat_interval()
            .map(tokio::time::interval);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                event = broker_events.recv(), if broker_open => match event {
                    Some(event) => self.on_broker_event(event).await,
                    None => {
                        broker_open = false;
                        self.client.mark_offline();
                        self.abandon_registration().await;
                    }
                },
                _ = tick(&mut heartbeat) => self.send_heartbeat(),
            }
        }

        if let DispatchState::Ready { agent_id, .. } = &self.state {
            info!(agent_id = %agent_id, "Worker shutting down");
            if let Err(e) = self.client.unregister() {
                debug!(error = %e, "Unregister not delivered");
            }
        }
    }

    async fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event).await;
    }

    async fn on_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Init { config } => self.init(config).await,
            WorkerCommand::Message { content, id } => self.accept_message(content, id).await,
            WorkerCommand::ToolResult {
                call_id,
                result,
                error,
            } => {
                if !self.client.resolve_tool(&call_id, result, error) {
                    debug!(call_id = %call_id, "Direct tool result for unknown call");
                }
            }
            WorkerCommand::Reset {} => {
                if matches!(self.state, DispatchState::Uninitialized) {
                    debug!("Reset before init ignored");
                } else {
                    let _ = self.enqueue(TurnJob::Reset);
                }
            }
        }
    }

    async fn init(&mut self, config: AgentConfig) {
        if !matches!(self.state, DispatchState::Uninitialized) {
            self.emit(WorkerEvent::Error {
                message_id: None,
                message: "worker is already initialized".into(),
            })
            .await;
            return;
        }

        let prepared = config
            .validate()
            .and_then(|()| self.models.resolve(&config.model))
            .and_then(|adapter| self.client.register(&config.id).map(|()| adapter));

        match prepared {
            Ok(adapter) => {
                debug!(agent_id = %config.id, model = %config.model, "Registering worker");
                self.state = DispatchState::Registering {
                    config,
                    adapter,
                    backlog: VecDeque::new(),
                };
            }
            Err(e) => {
                warn!(agent_id = %config.id, error = %e, "Worker init failed");
                self.emit(WorkerEvent::Error {
                    message_id: None,
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Start the turn task, replaying anything accepted while registering.
    /// `ready` goes out before the first job can start.
    async fn finish_init(&mut self) {
        let DispatchState::Registering {
            config,
            adapter,
            backlog,
        } = std::mem::replace(&mut self.state, DispatchState::Uninitialized)
        else {
            return;
        };
        let agent_id = config.id.clone();
        let (jobs, job_rx) = mpsc::unbounded_channel();
        let backlog_len = backlog.len();
        for job in backlog {
            // job_rx is still held here, so this cannot fail
            let _ = jobs.send(job);
        }
        let runner = TurnRunner {
            config,
            adapter,
            client: self.client.clone(),
            history: ConversationState::new(),
            context_limit: self.settings.context_limit,
            events: self.events.clone(),
            in_flight: self.in_flight.clone(),
        };
        self.state = DispatchState::Ready {
            agent_id: agent_id.clone(),
            jobs,
        };
        info!(agent_id = %agent_id, backlog = backlog_len, "Worker ready");
        self.emit(WorkerEvent::Ready { agent_id }).await;
        tokio::spawn(runner.run(job_rx));
    }

    /// The broker went away mid-registration: fail init and every buffered message.
    async fn abandon_registration(&mut self) {
        let DispatchState::Registering { config, backlog, .. } =
            std::mem::replace(&mut self.state, DispatchState::Uninitialized)
        else {
            return;
        };
        let message = format!("broker closed before '{}' was registered", config.id);
        self.emit(WorkerEvent::Error {
            message_id: None,
            message: message.clone(),
        })
        .await;
        for job in backlog {
            if let TurnJob::Message { id, .. } = job {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.emit(WorkerEvent::Error {
                    message_id: Some(id),
                    message: message.clone(),
                })
                .await;
            }
        }
    }

    /// Hand a job to the turn task, or park it until registration completes.
    fn enqueue(&mut self, job: TurnJob) -> bool {
        match &mut self.state {
            DispatchState::Uninitialized => false,
            DispatchState::Registering { backlog, .. } => {
                backlog.push_back(job);
                true
            }
            DispatchState::Ready { jobs, .. } => jobs.send(job).is_ok(),
        }
    }

    async fn accept_message(&mut self, content: String, id: Option<String>) {
        let message_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let agent_id = match &self.state {
            DispatchState::Uninitialized => {
                self.emit(WorkerEvent::Error {
                    message_id: Some(message_id),
                    message: "worker is not initialized".into(),
                })
                .await;
                return;
            }
            DispatchState::Registering { config, .. } => config.id.clone(),
            DispatchState::Ready { agent_id, .. } => agent_id.clone(),
        };

        let ahead = self.in_flight.load(Ordering::SeqCst);
        let waiting = ahead.saturating_sub(1);
        if let Some(max) = self.settings.max_queue
            && ahead > 0
            && waiting >= max
        {
            warn!(agent_id = %agent_id, waiting, "Queue full; rejecting message");
            self.emit(WorkerEvent::Error {
                message_id: Some(message_id),
                message: format!("queue full ({max} messages waiting)"),
            })
            .await;
            return;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let job = TurnJob::Message {
            id: message_id.clone(),
            content,
        };
        if !self.enqueue(job) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.emit(WorkerEvent::Error {
                message_id: Some(message_id),
                message: "turn task has stopped".into(),
            })
            .await;
            return;
        }
        if ahead > 0 {
            debug!(agent_id = %agent_id, message_id = %message_id, position = ahead, "Message queued");
            self.emit(WorkerEvent::Queued {
                message_id,
                position: ahead,
            })
            .await;
        }
    }

    async fn on_broker_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Registered { agent_id, .. } => {
                let pending = matches!(
                    &self.state,
                    DispatchState::Registering { config, .. } if config.id == agent_id
                );
                if pending {
                    self.finish_init().await;
                }
            }
            other => {
                let kind = other.kind();
                if !self.client.handle_event(other) {
                    debug!(kind, "Broker event not handled by worker");
                }
            }
        }
    }

    fn send_heartbeat(&self) {
        if let DispatchState::Ready { agent_id, .. } = &self.state {
            let status = if self.in_flight.load(Ordering::SeqCst) > 0 {
                "busy"
            } else {
                "active"
            };
            if let Err(e) = self.client.heartbeat(agent_id, status) {
                debug!(error = %e, "Heartbeat not delivered");
            }
        }
    }
}

/// Waits for the next heartbeat tick, or forever when heartbeats are off.
async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Runs one agent's turns, strictly one at a time.
struct TurnRunner {
    config: AgentConfig,
    adapter: Arc<dyn ModelAdapter>,
    client: Arc<BrokerClient>,
    history: ConversationState,
    context_limit: usize,
    events: mpsc::Sender<WorkerEvent>,
    in_flight: Arc<AtomicUsize>,
}

impl TurnRunner {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<TurnJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                TurnJob::Message { id, content } => self.process(id, content).await,
                TurnJob::Reset => {
                    info!(agent_id = %self.config.id, turns = self.history.len(), "Conversation reset");
                    self.history.reset();
                }
            }
        }
    }

    async fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event).await;
    }

    async fn process(&mut self, message_id: String, content: String) {
        self.emit(WorkerEvent::Start {
            message_id: message_id.clone(),
        })
        .await;

        let started = std::time::Instant::now();
        let outcome = self.run_turn(&message_id, content).await;
        // Release the slot before the final event so a follow-up sent on
        // `done` is not reported as queued.
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok((response, tool_calls)) => {
                info!(
                    agent_id = %self.config.id,
                    message_id = %message_id,
                    chars = response.len(),
                    tool_calls = tool_calls.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Turn finished"
                );
                self.emit(WorkerEvent::Done {
                    message_id,
                    response,
                    tool_calls,
                })
                .await;
            }
            Err(e) => {
                error!(agent_id = %self.config.id, message_id = %message_id, error = %e, "Turn failed");
                self.emit(WorkerEvent::Error {
                    message_id: Some(message_id),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn run_turn(
        &mut self,
        message_id: &str,
        content: String,
    ) -> Result<(String, Vec<ToolCallRequest>)> {
        let agent_id = self.config.id.clone();
        let context = self.client.fetch_context(&agent_id, self.context_limit).await;
        let system_prompt = build_system_prompt(&self.config.system_prompt, &context);
        let messages = assemble_turns(system_prompt, self.history.turns(), &content);

        let tools = Arc::new(ToolBridge::new(self.client.clone(), agent_id.clone()));
        let request = ModelRequest {
            messages,
            config: self.config.clone(),
        };
        let mut stream = self.adapter.stream(request, tools).await?;

        let mut accumulated = String::new();
        let mut tool_calls = Vec::new();
        while let Some(event) = stream.recv().await {
            match event? {
                ModelEvent::Text { text } => {
                    accumulated.push_str(&text);
                    self.emit(WorkerEvent::Chunk {
                        message_id: message_id.to_string(),
                        text,
                        accumulated: accumulated.clone(),
                    })
                    .await;
                }
                ModelEvent::ToolCall { tool } => {
                    debug!(agent_id = %agent_id, tool = %tool.name, "Model requested tool");
                    self.emit(WorkerEvent::ToolCall {
                        message_id: message_id.to_string(),
                        tool: tool.clone(),
                    })
                    .await;
                    tool_calls.push(tool);
                }
            }
        }

        let user = Turn::user(content);
        let assistant = Turn::assistant(accumulated.clone());
        self.history.push(user.clone());
        self.history.push(assistant.clone());
        for turn in [user, assistant] {
            if let Err(e) = self.client.publish(&agent_id, turn) {
                warn!(agent_id = %agent_id, error = %e, "Ring publish failed");
            }
        }

        Ok((accumulated, tool_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_broker::BrokerHandle;
    use agentbus_config::BrokerConfig;
    use agentbus_core::connection::ConnectionRole;
    use agentbus_core::message::Role;
    use agentbus_core::protocol::BrokerRequest;
    use agentbus_providers::{ScriptStep, ScriptedAdapter, ScriptedTurn};
    use std::time::Duration;

    fn registry_with(adapter: Arc<ScriptedAdapter>) -> ModelRegistry {
        let mut models = ModelRegistry::with_builtin();
        models.register_as("anthropic", adapter);
        models
    }

    fn fast_settings() -> WorkerConfig {
        WorkerConfig {
            ring_fetch_timeout_ms: 500,
            ..WorkerConfig::default()
        }
    }

    async fn ready_worker(
        broker: &BrokerHandle,
        models: ModelRegistry,
        settings: WorkerConfig,
        id: &str,
    ) -> WorkerHandle {
        let mut worker = AgentWorker::spawn(broker.connect().unwrap(), models, settings);
        worker.init(AgentConfig::new(id)).unwrap();
        match worker.recv().await {
            Some(WorkerEvent::Ready { agent_id }) => assert_eq!(agent_id, id),
            other => panic!("expected ready, got {other:?}"),
        }
        worker
    }

    async fn until_terminal(worker: &mut WorkerHandle) -> Vec<WorkerEvent> {
        let mut seen = Vec::new();
        while let Some(event) = worker.recv().await {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn streams_chunks_and_completes() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::chunks(&["He", "llo"])]));
        let mut worker = ready_worker(&broker, registry_with(adapter.clone()), fast_settings(), "w1").await;

        worker.message_with_id("m1", "hi").unwrap();
        let events = until_terminal(&mut worker).await;

        assert_eq!(events[0], WorkerEvent::Start { message_id: "m1".into() });
        assert_eq!(
            events[2],
            WorkerEvent::Chunk {
                message_id: "m1".into(),
                text: "llo".into(),
                accumulated: "Hello".into(),
            }
        );
        match events.last() {
            Some(WorkerEvent::Done { response, tool_calls, .. }) => {
                assert_eq!(response, "Hello");
                assert!(tool_calls.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let request = &adapter.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages.last().unwrap(), &Turn::user("hi"));

        // Both turns reached the shared ring.
        let snapshot = broker.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.ring_size, 2);
    }

    #[tokio::test]
    async fn history_carries_into_next_turn_and_reset_clears_it() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::chunks(&["Hello"]),
            ScriptedTurn::chunks(&["Again"]),
            ScriptedTurn::chunks(&["Fresh"]),
        ]));
        let mut worker = ready_worker(&broker, registry_with(adapter.clone()), fast_settings(), "w1").await;

        worker.message("hi").unwrap();
        until_terminal(&mut worker).await;
        worker.message("more").unwrap();
        until_terminal(&mut worker).await;
        worker.reset().unwrap();
        worker.message("new start").unwrap();
        until_terminal(&mut worker).await;

        let requests = adapter.requests();
        let second: Vec<&Turn> = requests[1].messages.iter().skip(1).collect();
        assert_eq!(
            second,
            vec![&Turn::user("hi"), &Turn::assistant("Hello"), &Turn::user("more")]
        );
        assert_eq!(requests[2].messages.len(), 2, "system + new user turn only");
    }

    #[tokio::test]
    async fn second_message_waits_for_first() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::Steps(vec![
                ScriptStep::Text("one-a ".into()),
                ScriptStep::Delay(Duration::from_millis(100)),
                ScriptStep::Text("one-b".into()),
            ]),
            ScriptedTurn::chunks(&["two"]),
        ]));
        let mut worker = ready_worker(&broker, registry_with(adapter), fast_settings(), "w1").await;

        worker.message_with_id("m1", "first").unwrap();
        worker.message_with_id("m2", "second").unwrap();

        let mut events = Vec::new();
        while events.iter().filter(|e: &&WorkerEvent| e.is_terminal()).count() < 2 {
            events.push(worker.recv().await.unwrap());
        }

        assert!(events.contains(&WorkerEvent::Queued {
            message_id: "m2".into(),
            position: 1,
        }));
        let m1_done = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::Done { message_id, .. } if message_id == "m1"))
            .unwrap();
        let first_m2 = events
            .iter()
            .position(|e| {
                e.message_id() == Some("m2") && !matches!(e, WorkerEvent::Queued { .. })
            })
            .unwrap();
        assert!(m1_done < first_m2, "m2 work started before m1 finished");
        assert!(matches!(events.last(), Some(WorkerEvent::Done { message_id, .. }) if message_id == "m2"));
    }

    #[tokio::test]
    async fn queue_bound_rejects_overflow() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::Steps(vec![
                ScriptStep::Delay(Duration::from_millis(200)),
                ScriptStep::Text("slow".into()),
            ]),
            ScriptedTurn::chunks(&["queued"]),
        ]));
        let settings = WorkerConfig {
            max_queue: Some(1),
            ..fast_settings()
        };
        let mut worker = ready_worker(&broker, registry_with(adapter), settings, "w1").await;

        worker.message_with_id("m1", "a").unwrap();
        worker.message_with_id("m2", "b").unwrap();
        worker.message_with_id("m3", "c").unwrap();

        let mut rejected = false;
        let mut done = 0;
        while done < 2 {
            match worker.recv().await.unwrap() {
                WorkerEvent::Error { message_id, message } => {
                    assert_eq!(message_id.as_deref(), Some("m3"));
                    assert!(message.contains("queue full"));
                    rejected = true;
                }
                WorkerEvent::Done { .. } => done += 1,
                _ => {}
            }
        }
        assert!(rejected);
    }

    #[tokio::test]
    async fn unknown_model_fails_init() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let mut worker =
            AgentWorker::spawn(broker.connect().unwrap(), ModelRegistry::new(), fast_settings());
        worker.init(AgentConfig::new("w1").with_model("nope")).unwrap();
        match worker.recv().await {
            Some(WorkerEvent::Error { message_id: None, message }) => {
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(broker.snapshot().await.unwrap().agents.is_empty());
    }

    #[tokio::test]
    async fn missing_id_fails_init() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let mut worker =
            AgentWorker::spawn(broker.connect().unwrap(), ModelRegistry::with_builtin(), fast_settings());
        worker.init(AgentConfig::default()).unwrap();
        assert!(matches!(
            worker.recv().await,
            Some(WorkerEvent::Error { message_id: None, .. })
        ));
    }

    #[tokio::test]
    async fn message_before_init_is_an_error() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let mut worker =
            AgentWorker::spawn(broker.connect().unwrap(), ModelRegistry::with_builtin(), fast_settings());
        worker.message_with_id("m0", "hello?").unwrap();
        assert!(matches!(
            worker.recv().await,
            Some(WorkerEvent::Error { message_id: Some(id), .. }) if id == "m0"
        ));
    }

    #[tokio::test]
    async fn message_sent_during_registration_runs_after_ready() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::chunks(&["first"]),
            ScriptedTurn::chunks(&["second"]),
        ]));
        let mut worker =
            AgentWorker::spawn(broker.connect().unwrap(), registry_with(adapter.clone()), fast_settings());
        worker.init(AgentConfig::new("w1")).unwrap();
        worker.message_with_id("m1", "hi").unwrap();
        worker.message_with_id("m2", "again").unwrap();

        // m2 may report `queued` on either side of `ready`; nothing else may.
        let mut events = Vec::new();
        while events.iter().filter(|e: &&WorkerEvent| e.is_terminal()).count() < 2 {
            match worker.recv().await.unwrap() {
                WorkerEvent::Queued { .. } => {}
                event => events.push(event),
            }
        }
        assert_eq!(events[0], WorkerEvent::Ready { agent_id: "w1".into() });
        assert_eq!(events[1], WorkerEvent::Start { message_id: "m1".into() });
        let m1_done = events
            .iter()
            .position(|e| matches!(e, WorkerEvent::Done { message_id, response, .. } if message_id == "m1" && response == "first"))
            .unwrap();
        assert_eq!(events[m1_done + 1], WorkerEvent::Start { message_id: "m2".into() });
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Done { message_id, .. }) if message_id == "m2"
        ));
        assert_eq!(adapter.requests().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_is_scoped_to_message() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::StartError("rate limited".into()),
            ScriptedTurn::Steps(vec![
                ScriptStep::Text("par".into()),
                ScriptStep::Fail("socket reset".into()),
            ]),
            ScriptedTurn::chunks(&["fine"]),
        ]));
        let mut worker = ready_worker(&broker, registry_with(adapter), fast_settings(), "w1").await;

        for (id, expect) in [("m1", "rate limited"), ("m2", "socket reset")] {
            worker.message_with_id(id, "go").unwrap();
            match until_terminal(&mut worker).await.last() {
                Some(WorkerEvent::Error { message_id, message }) => {
                    assert_eq!(message_id.as_deref(), Some(id));
                    assert!(message.contains(expect));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        worker.message_with_id("m3", "go").unwrap();
        assert!(matches!(
            until_terminal(&mut worker).await.last(),
            Some(WorkerEvent::Done { response, .. }) if response == "fine"
        ));
    }

    #[tokio::test]
    async fn context_from_other_agents_reaches_prompt() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let other = broker.connect().unwrap();
        other
            .send(BrokerRequest::Register {
                agent_id: "a2".into(),
                role: ConnectionRole::Agent,
            })
            .unwrap();
        other
            .send(BrokerRequest::RingAdd {
                agent_id: None,
                message: Turn::assistant("the answer is 42"),
            })
            .unwrap();

        let adapter = Arc::new(ScriptedAdapter::single_text("ok"));
        let mut worker = ready_worker(&broker, registry_with(adapter.clone()), fast_settings(), "w1").await;
        worker.message("what did a2 say?").unwrap();
        until_terminal(&mut worker).await;

        let system = &adapter.requests()[0].messages[0].content;
        assert!(system.contains("[a2/assistant]: the answer is 42"));
        drop(other);
    }

    #[tokio::test]
    async fn direct_tool_result_completes_tool_call() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        // A host that never answers over the broker.
        let host = broker.connect().unwrap();
        host.send(BrokerRequest::Register {
            agent_id: "host".into(),
            role: ConnectionRole::Host,
        })
        .unwrap();
        let (_host_sender, mut host_events) = host.split();

        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::Steps(vec![
            ScriptStep::InvokeTool {
                name: "dom_query".into(),
                args: serde_json::json!({"selector": "h1"}),
            },
            ScriptStep::Text("done".into()),
        ])]));
        let mut worker = ready_worker(&broker, registry_with(adapter.clone()), fast_settings(), "w1").await;
        worker.message("query").unwrap();

        let call_id = loop {
            match host_events.recv().await {
                Some(BrokerEvent::ToolRequest { call_id, .. }) => break call_id,
                Some(_) => continue,
                None => panic!("host connection closed"),
            }
        };
        worker
            .tool_result(call_id, serde_json::json!(["Title"]), None)
            .unwrap();

        let events = until_terminal(&mut worker).await;
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::ToolCall { tool, .. } if tool.name == "dom_query")));
        assert!(matches!(events.last(), Some(WorkerEvent::Done { tool_calls, .. }) if tool_calls.len() == 1));
        let expected: Vec<crate::client::ToolOutcome> = vec![Ok(serde_json::json!(["Title"]))];
        assert_eq!(adapter.tool_results(), expected);
    }
}
