//! The agent execution loop
//!
//! Drives the model through Deciding and Acting phases until it stops
//! requesting tools, the round ceiling is reached, or a human-assistance
//! call suspends the run.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use bunsen_ai::{ChatProvider, Context, Turn, VisionProvider};
use bunsen_exec::PythonExecutor;

use crate::conversation::ConversationState;
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::prompt::{render_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::registry::ToolRegistry;
use crate::store::{SessionStore, SuspensionRecord};
use crate::tool::BoxedTool;
use crate::tools::{self, standard_tools, ArtifactLog, HUMAN_ASSISTANCE_TOOL_NAME};
use crate::usage::{NullUsageSink, UsageSink};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Ceiling on Deciding/Acting round trips per invocation
    pub max_rounds: u32,
    /// System prompt template with `{dataset}`, `{path}`, `{image_path}`
    pub system_prompt: String,
    /// Directory holding uploaded dataset files
    pub data_dir: PathBuf,
    /// Directory where executed code writes plot artifacts
    pub plots_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            data_dir: PathBuf::from("uploads"),
            plots_dir: PathBuf::from("plots"),
        }
    }
}

/// Handle carried back to the caller when a run suspends for human input.
#[derive(Debug, Clone)]
pub struct ResumptionToken {
    pub token: String,
    pub tool_call_id: String,
    pub question: String,
}

/// Terminal result of one loop invocation.
#[derive(Debug)]
pub enum RunOutcome {
    /// The model produced a final answer (or hit the round ceiling)
    Finished {
        state: ConversationState,
        rounds: u32,
    },
    /// The run is parked waiting for a human reply
    Suspended {
        state: ConversationState,
        resumption: ResumptionToken,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &ConversationState {
        match self {
            RunOutcome::Finished { state, .. } => state,
            RunOutcome::Suspended { state, .. } => state,
        }
    }
}

/// The agent: model provider, tool catalog, and the loop that ties them
/// together. One instance drives one logical conversation at a time.
pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn ChatProvider>,
    registry: ToolRegistry,
    artifacts: ArtifactLog,
    store: Option<SessionStore>,
    usage_sink: Arc<dyn UsageSink>,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Agent {
    /// Create an agent with the standard tool catalog.
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        vision: Arc<dyn VisionProvider>,
        executor: Arc<PythonExecutor>,
    ) -> Self {
        let artifacts = ArtifactLog::new();
        let tools = standard_tools(
            executor,
            provider.clone(),
            vision,
            &config.data_dir,
            artifacts.clone(),
        );
        Self::with_tools(config, provider, tools, artifacts)
    }

    /// Create an agent with an explicit tool catalog. The artifact log must
    /// be the one shared with any artifact-producing tools.
    pub fn with_tools(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        tools: Vec<BoxedTool>,
        artifacts: ArtifactLog,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            provider,
            registry: ToolRegistry::new(tools),
            artifacts,
            store: None,
            usage_sink: Arc::new(NullUsageSink),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Persist conversation state and suspension checkpoints in this store.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Send per-run usage accounting to this sink.
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    /// Subscribe to events emitted during execution.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Token that cancels in-flight tool executions when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a fresh conversation for `thread_id`.
    pub async fn run(&self, query: &str, thread_id: &str) -> Result<RunOutcome> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }
        let state = ConversationState::seeded(query);
        self.drive(state, thread_id).await
    }

    /// Continue a previously persisted conversation, or start one if no
    /// snapshot exists for `thread_id`.
    pub async fn continue_conversation(&self, query: &str, thread_id: &str) -> Result<RunOutcome> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }
        let mut state = match &self.store {
            Some(store) => store
                .load_state(thread_id)
                .map_err(Error::Store)?
                .unwrap_or_default(),
            None => ConversationState::default(),
        };
        state.push_turn(Turn::user(query))?;
        self.drive(state, thread_id).await
    }

    /// Resume a suspended run, substituting the human's reply for the
    /// suspended tool call's result.
    pub async fn resume(&self, token: &str, human_reply: &str) -> Result<RunOutcome> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::UnknownResumption(token.to_string()))?;
        let record = store
            .take_suspension(token)
            .map_err(Error::Store)?
            .ok_or_else(|| Error::UnknownResumption(token.to_string()))?;

        let mut state = record.state;
        state.push_turn(Turn::tool_result(
            &record.tool_call_id,
            HUMAN_ASSISTANCE_TOOL_NAME,
            vec![bunsen_ai::Content::text(human_reply)],
            false,
        ))?;
        self.drive(state, &record.thread_id).await
    }

    /// The Deciding/Acting loop.
    async fn drive(&self, mut state: ConversationState, thread_id: &str) -> Result<RunOutcome> {
        let _ = self.event_tx.send(AgentEvent::AgentStart);
        self.ensure_dataset_summary(&mut state);
        let system_prompt = self.render_system_prompt(&state);
        // Scope the shared log to this conversation's artifacts so tools and
        // the default report never see another thread's plots, and snapshot
        // usage so the sink gets this invocation's tokens only.
        self.artifacts.reset(state.artifact_paths.iter().cloned());
        let usage_at_entry = state.total_usage.clone();

        let mut rounds = 0u32;
        while rounds < self.config.max_rounds {
            rounds += 1;
            let _ = self.event_tx.send(AgentEvent::RoundStart { round: rounds });

            let context = self.build_context(&state, &system_prompt);
            let model_turn = match self.provider.complete(&context).await {
                Ok(turn) => turn,
                Err(e) => {
                    let _ = self.event_tx.send(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e.into());
                }
            };

            if let Turn::Model { usage, .. } = &model_turn {
                state.total_usage.absorb(usage);
            }

            let calls: Vec<(String, String, serde_json::Value)> = model_turn
                .tool_calls()
                .into_iter()
                .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                .collect();
            state.push_turn(model_turn)?;

            if calls.is_empty() {
                break;
            }

            let mut suspension: Option<(String, String)> = None;
            for (id, name, args) in &calls {
                if name == HUMAN_ASSISTANCE_TOOL_NAME {
                    if suspension.is_none() {
                        let question = args
                            .get("question")
                            .and_then(|v| v.as_str())
                            .unwrap_or("The agent requested human assistance.")
                            .to_string();
                        suspension = Some((id.clone(), question));
                    } else {
                        // One suspension per round; extra requests get an
                        // error result so the pairing invariant holds.
                        state.push_turn(Turn::tool_result(
                            id,
                            name,
                            vec![bunsen_ai::Content::text(
                                "Error: only one human assistance request per round is supported. Please fix your approach and try again.",
                            )],
                            true,
                        ))?;
                    }
                    continue;
                }

                let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: args.clone(),
                });
                let result = self
                    .registry
                    .dispatch(id, name, args, self.cancel.clone())
                    .await;
                let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    result: result.text_content(),
                    is_error: result.is_error,
                });
                state.push_turn(Turn::tool_result(id, name, result.content, result.is_error))?;
            }

            state.record_artifacts(self.artifacts.all());

            if let Some((tool_call_id, question)) = suspension {
                self.usage_sink
                    .record(thread_id, &state.total_usage.since(&usage_at_entry));
                return self
                    .suspend(state, thread_id, tool_call_id, question)
                    .await;
            }
        }

        state.record_artifacts(self.artifacts.all());
        self.persist(thread_id, &state);
        self.usage_sink
            .record(thread_id, &state.total_usage.since(&usage_at_entry));
        let _ = self.event_tx.send(AgentEvent::AgentEnd {
            total_rounds: rounds,
            total_usage: state.total_usage.clone(),
        });
        Ok(RunOutcome::Finished { state, rounds })
    }

    /// Park the run: checkpoint state under a fresh token and hand control
    /// back to the caller. The checkpoint write must succeed for resume to
    /// be possible, so its failure is surfaced.
    async fn suspend(
        &self,
        state: ConversationState,
        thread_id: &str,
        tool_call_id: String,
        question: String,
    ) -> Result<RunOutcome> {
        let token = uuid::Uuid::new_v4().to_string();
        if let Some(store) = &self.store {
            let record = SuspensionRecord {
                token: token.clone(),
                thread_id: thread_id.to_string(),
                tool_call_id: tool_call_id.clone(),
                question: question.clone(),
                state: state.clone(),
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            store.save_suspension(&record).map_err(Error::Store)?;
        }
        self.persist(thread_id, &state);

        let _ = self.event_tx.send(AgentEvent::Suspended {
            resumption_token: token.clone(),
            question: question.clone(),
        });
        Ok(RunOutcome::Suspended {
            state,
            resumption: ResumptionToken {
                token,
                tool_call_id,
                question,
            },
        })
    }

    /// Best-effort state snapshot; failures are logged, never fatal.
    fn persist(&self, thread_id: &str, state: &ConversationState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_state(thread_id, state) {
                tracing::warn!("failed to persist thread {}: {}", thread_id, e);
            }
        }
    }

    /// Memoize the dataset summary so repeated rounds don't rescan.
    fn ensure_dataset_summary(&self, state: &mut ConversationState) {
        if state.dataset_cache.is_none() {
            let summary = match tools::summarize_directory(&self.config.data_dir) {
                Ok(s) if !s.is_empty() => s,
                Ok(_) => "No datasets found.".to_string(),
                Err(e) => {
                    tracing::warn!("dataset summary failed: {}", e);
                    "No dataset summary available.".to_string()
                }
            };
            state.dataset_cache = Some(summary);
        }
    }

    fn render_system_prompt(&self, state: &ConversationState) -> String {
        render_prompt(
            &self.config.system_prompt,
            state.dataset_cache.as_deref().unwrap_or("No datasets found."),
            &self.config.data_dir.display().to_string(),
            &self.config.plots_dir.display().to_string(),
        )
    }

    fn build_context(&self, state: &ConversationState, system_prompt: &str) -> Context {
        let mut context = Context::with_system(system_prompt);
        context.turns = state.turns.clone();
        context.tools = self.registry.api_tools();
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bunsen_ai::{Content, UsageStats};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use crate::tool::{Tool, ToolResult};
    use crate::tools::HumanAssistanceTool;

    /// Provider that replays a fixed script of model turns.
    struct ScriptedProvider {
        turns: Mutex<VecDeque<Turn>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Turn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, _context: &Context) -> bunsen_ai::Result<Turn> {
            self.turns
                .lock()
                .pop_front()
                .ok_or_else(|| bunsen_ai::Error::api("test", "script exhausted"))
        }
    }

    struct CountingTool {
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counter"
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            *self.calls.lock() += 1;
            ToolResult::text("counted")
        }
    }

    /// Tool that logs a fixed plot path, like code execution does.
    struct PlottingTool {
        log: ArtifactLog,
        path: PathBuf,
    }

    #[async_trait]
    impl Tool for PlottingTool {
        fn name(&self) -> &str {
            "plotter"
        }
        fn description(&self) -> &str {
            "Produces a plot"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            self.log.record([self.path.clone()]);
            ToolResult::text("plotted")
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, UsageStats)>>,
    }

    impl UsageSink for RecordingSink {
        fn record(&self, run_id: &str, usage: &UsageStats) {
            self.records.lock().push((run_id.to_string(), usage.clone()));
        }
    }

    fn usage(tokens: u64) -> UsageStats {
        UsageStats {
            input_tokens: tokens,
            output_tokens: tokens,
            total_tokens: tokens * 2,
            model_name: Some("test-model".into()),
        }
    }

    fn model_text(text: &str) -> Turn {
        Turn::model(vec![Content::text(text)], usage(10))
    }

    fn model_call(id: &str, name: &str) -> Turn {
        Turn::model(
            vec![Content::tool_call(id, name, serde_json::json!({}))],
            usage(10),
        )
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            data_dir: std::env::temp_dir().join("bunsen-agent-nodata"),
            ..AgentConfig::default()
        }
    }

    fn agent_with(provider: Arc<ScriptedProvider>, tools: Vec<BoxedTool>) -> Agent {
        Agent::with_tools(test_config(), provider, tools, ArtifactLog::new())
    }

    #[tokio::test]
    async fn test_direct_answer_terminates_in_one_round() {
        let provider = ScriptedProvider::new(vec![model_text("{\"summary\": \"done\"}")]);
        let agent = agent_with(provider, vec![]);

        let outcome = agent.run("question", "t1").await.unwrap();
        match outcome {
            RunOutcome::Finished { state, rounds } => {
                assert_eq!(rounds, 1);
                assert_eq!(state.turns.len(), 2);
                assert_eq!(state.total_usage.total_tokens, 20);
            }
            RunOutcome::Suspended { .. } => panic!("expected finished"),
        }
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let calls = Arc::new(Mutex::new(0));
        let provider = ScriptedProvider::new(vec![
            model_call("c1", "counter"),
            model_text("final answer"),
        ]);
        let agent = agent_with(
            provider,
            vec![Arc::new(CountingTool { calls: calls.clone() })],
        );

        let outcome = agent.run("question", "t1").await.unwrap();
        match outcome {
            RunOutcome::Finished { state, rounds } => {
                assert_eq!(rounds, 2);
                assert_eq!(*calls.lock(), 1);
                // user, model(call), tool result, model(answer)
                assert_eq!(state.turns.len(), 4);
                assert!(state.unanswered_calls().is_empty());
                // Usage summed across both model turns.
                assert_eq!(state.total_usage.total_tokens, 40);
            }
            RunOutcome::Suspended { .. } => panic!("expected finished"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_absorbed_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            model_call("c1", "no_such_tool"),
            model_text("recovered"),
        ]);
        let agent = agent_with(provider, vec![]);

        let outcome = agent.run("question", "t1").await.unwrap();
        let state = outcome.state();
        let error_result = state
            .turns
            .iter()
            .find_map(|t| match t {
                Turn::ToolResult {
                    is_error, content, ..
                } if *is_error => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        let text: String = error_result.iter().filter_map(|c| c.as_text()).collect();
        assert!(text.contains("unknown tool"));
        assert!(text.ends_with("Please fix your approach and try again."));
    }

    #[tokio::test]
    async fn test_round_ceiling_terminates() {
        // The model requests a tool every round, forever.
        let script: Vec<Turn> = (0..10)
            .map(|i| model_call(&format!("c{}", i), "counter"))
            .collect();
        let provider = ScriptedProvider::new(script);
        let calls = Arc::new(Mutex::new(0));
        let mut config = test_config();
        config.max_rounds = 3;
        let agent = Agent::with_tools(
            config,
            provider,
            vec![Arc::new(CountingTool { calls: calls.clone() })],
            ArtifactLog::new(),
        );

        let outcome = agent.run("question", "t1").await.unwrap();
        match outcome {
            RunOutcome::Finished { rounds, .. } => {
                assert_eq!(rounds, 3);
                assert_eq!(*calls.lock(), 3);
            }
            RunOutcome::Suspended { .. } => panic!("expected finished"),
        }
    }

    #[tokio::test]
    async fn test_fresh_run_does_not_inherit_stale_artifacts() {
        let log = ArtifactLog::new();
        log.record([PathBuf::from("plots/old-run/figure_0.png")]);

        let provider = ScriptedProvider::new(vec![model_text("done")]);
        let agent = Agent::with_tools(test_config(), provider, vec![], log.clone());

        let outcome = agent.run("question", "t-new").await.unwrap();
        assert!(outcome.state().artifact_paths.is_empty());
        assert!(log.all().is_empty());
    }

    #[tokio::test]
    async fn test_artifacts_scoped_per_conversation() {
        let log = ArtifactLog::new();
        let plot = PathBuf::from("plots/run-a/figure_0.png");
        let provider = ScriptedProvider::new(vec![
            model_call("c1", "plotter"),
            model_text("first done"),
            model_text("second done"),
        ]);
        let agent = Agent::with_tools(
            test_config(),
            provider,
            vec![Arc::new(PlottingTool {
                log: log.clone(),
                path: plot.clone(),
            })],
            log,
        );

        let first = agent.run("plot something", "t-a").await.unwrap();
        assert_eq!(first.state().artifact_paths, vec![plot]);

        // A fresh thread starts with no artifacts in state or default report.
        let second = agent.run("no plots here", "t-b").await.unwrap();
        assert!(second.state().artifact_paths.is_empty());
    }

    #[tokio::test]
    async fn test_usage_sink_gets_per_invocation_delta() {
        let store_dir =
            std::env::temp_dir().join(format!("bunsen-agent-usage-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&store_dir);

        let provider = ScriptedProvider::new(vec![
            model_text("first answer"),
            model_text("second answer"),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let agent = agent_with(provider, vec![])
            .with_store(SessionStore::new(&store_dir).unwrap())
            .with_usage_sink(sink.clone());

        agent.run("first question", "t1").await.unwrap();
        agent
            .continue_conversation("second question", "t1")
            .await
            .unwrap();

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.total_tokens, 20);
        // The continued run reports only its own tokens, not the reloaded
        // conversation total.
        assert_eq!(records[1].1.total_tokens, 20);
        drop(records);

        let _ = std::fs::remove_dir_all(&store_dir);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = agent_with(provider, vec![]);
        let err = agent.run("   ", "t1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_human_assistance_suspends_and_resumes() {
        let store_dir =
            std::env::temp_dir().join(format!("bunsen-agent-suspend-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&store_dir);

        let provider = ScriptedProvider::new(vec![
            Turn::model(
                vec![Content::tool_call(
                    "c1",
                    HUMAN_ASSISTANCE_TOOL_NAME,
                    serde_json::json!({"question": "which column is the target?"}),
                )],
                usage(5),
            ),
            model_text("thanks, done"),
        ]);
        let agent = Agent::with_tools(
            test_config(),
            provider,
            vec![Arc::new(HumanAssistanceTool)],
            ArtifactLog::new(),
        )
        .with_store(SessionStore::new(&store_dir).unwrap());

        let outcome = agent.run("analyze", "t1").await.unwrap();
        let resumption = match outcome {
            RunOutcome::Suspended { resumption, .. } => {
                assert_eq!(resumption.question, "which column is the target?");
                resumption
            }
            RunOutcome::Finished { .. } => panic!("expected suspension"),
        };

        let resumed = agent.resume(&resumption.token, "column y").await.unwrap();
        match resumed {
            RunOutcome::Finished { state, .. } => {
                // The human reply is paired with the suspended call.
                let reply = state
                    .turns
                    .iter()
                    .find_map(|t| match t {
                        Turn::ToolResult {
                            tool_call_id,
                            content,
                            ..
                        } if tool_call_id == "c1" => Some(content.clone()),
                        _ => None,
                    })
                    .unwrap();
                let text: String = reply.iter().filter_map(|c| c.as_text()).collect();
                assert_eq!(text, "column y");
            }
            RunOutcome::Suspended { .. } => panic!("expected finished"),
        }

        // The token is single-use.
        let err = agent.resume(&resumption.token, "again").await.unwrap_err();
        assert!(matches!(err, Error::UnknownResumption(_)));

        let _ = std::fs::remove_dir_all(&store_dir);
    }

    #[tokio::test]
    async fn test_continue_conversation_appends_to_saved_state() {
        let store_dir =
            std::env::temp_dir().join(format!("bunsen-agent-cont-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&store_dir);

        let provider = ScriptedProvider::new(vec![
            model_text("first answer"),
            model_text("second answer"),
        ]);
        let agent = agent_with(provider, vec![])
            .with_store(SessionStore::new(&store_dir).unwrap());

        agent.run("first question", "t1").await.unwrap();
        let outcome = agent
            .continue_conversation("second question", "t1")
            .await
            .unwrap();
        match outcome {
            RunOutcome::Finished { state, .. } => {
                // user, model, user, model
                assert_eq!(state.turns.len(), 4);
            }
            RunOutcome::Suspended { .. } => panic!("expected finished"),
        }

        let _ = std::fs::remove_dir_all(&store_dir);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = agent_with(provider, vec![]);
        let err = agent.run("question", "t1").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
