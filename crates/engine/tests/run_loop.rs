//! End-to-end run-loop scenarios against a scripted provider client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use mc_domain::{
    AssistantContent, AssistantMessage, BoxStream, CancelToken, ChatMessage, EngineConfig, Error,
    ProfileConfig, Result, StateLayout, StreamEvent, TokenCost, Usage,
};
use mc_engine::{AgentEvent, AgentEngine, RunRequest};
use mc_providers::{CallOptions, ChatContext, LlmClient, ProviderDescriptor};
use mc_sessions::{messages_to_transcript, TranscriptLog, ORPHANED_TOOL_RESULT_TEXT};
use mc_tools::{Tool, ToolOutput, ToolRegistry};

const KEY: &str = "agent:main:channel:cli:account:default:peer:direct:tester";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Step {
    Reply(AssistantMessage),
    Fail { status: Option<u16>, message: String },
}

/// Plays back a fixed script of responses and records every call context
/// and credential it saw.
struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    contexts: Mutex<Vec<ChatContext>>,
    keys_used: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            contexts: Mutex::new(Vec::new()),
            keys_used: Mutex::new(Vec::new()),
        })
    }

    fn next_step(&self, context: &ChatContext, options: &CallOptions) -> Result<AssistantMessage> {
        self.contexts.lock().push(context.clone());
        self.keys_used.lock().push(options.api_key.clone());
        match self.script.lock().pop_front() {
            Some(Step::Reply(message)) => Ok(message),
            Some(Step::Fail { status, message }) => Err(Error::Provider {
                provider: "scripted".into(),
                status,
                message,
            }),
            None => Err(Error::Other("script exhausted".into())),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(
        &self,
        _descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<AssistantMessage> {
        self.next_step(context, options)
    }

    async fn stream(
        &self,
        _descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let message = self.next_step(context, options)?;

        // Replay the scripted message as a plausible event stream.
        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        for block in &message.content {
            match block {
                AssistantContent::Text { text } => {
                    events.push(Ok(StreamEvent::TextDelta { text: text.clone() }));
                }
                AssistantContent::Thinking { text } => {
                    events.push(Ok(StreamEvent::ThinkingDelta { text: text.clone() }));
                }
                AssistantContent::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                    }));
                    events.push(Ok(StreamEvent::ToolCallFinished {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: arguments.clone(),
                    }));
                }
            }
        }
        events.push(Ok(StreamEvent::Done {
            usage: Some(message.usage),
            stop_reason: message.stop_reason.clone(),
        }));

        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn usage(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        cache_read_tokens: 0,
        cache_write_tokens: 0,
        cost: TokenCost::default(),
    }
}

fn reply(text: &str, u: Usage) -> Step {
    Step::Reply(AssistantMessage {
        content: vec![AssistantContent::Text { text: text.into() }],
        provider: "scripted".into(),
        model: "test-model".into(),
        usage: u,
        stop_reason: Some("stop".into()),
        ts: 0,
    })
}

fn tool_call_reply(call_id: &str, tool: &str, u: Usage) -> Step {
    Step::Reply(AssistantMessage {
        content: vec![AssistantContent::ToolCall {
            id: call_id.into(),
            name: tool.into(),
            arguments: serde_json::json!({"patch": "..."}),
        }],
        provider: "scripted".into(),
        model: "test-model".into(),
        usage: u,
        stop_reason: Some("tool_calls".into()),
        ts: 0,
    })
}

struct StubTool {
    name: String,
    output: String,
    invocations: AtomicUsize,
}

#[async_trait::async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        "Stub"
    }
    fn description(&self) -> &str {
        "Scripted test tool."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn invoke(
        &self,
        _call_id: &str,
        _args: serde_json::Value,
        _cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text(self.output.clone()))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: StateLayout,
    config: EngineConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let layout = StateLayout::with_root(dir.path());
    layout.ensure().unwrap();

    let mut config = EngineConfig::new("scripted", "test-model", layout.workspace_dir());
    config.profiles = vec![ProfileConfig {
        id: "primary".into(),
        api_key: "key-primary".into(),
    }];

    Fixture {
        _dir: dir,
        layout,
        config,
    }
}

fn stub_registry(tool_name: &str, output: &str) -> (ToolRegistry, Arc<StubTool>) {
    let tool = Arc::new(StubTool {
        name: tool_name.into(),
        output: output.into(),
        invocations: AtomicUsize::new(0),
    });
    let mut registry = ToolRegistry::new();
    registry.register(tool.clone());
    (registry, tool)
}

type EventLog = Arc<Mutex<Vec<AgentEvent>>>;

fn recording_callback() -> (EventLog, mc_engine::EventCallback) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: mc_engine::EventCallback = Box::new(move |event| {
        sink.lock().push(event.clone());
    });
    (log, callback)
}

fn kinds(log: &EventLog) -> Vec<&'static str> {
    log.lock()
        .iter()
        .map(|e| e.kind())
        .filter(|k| *k != "llm_stream")
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_without_tools() {
    let fx = fixture();
    let client = ScriptedClient::new(vec![reply("Hello!", usage(100, 50))]);
    let engine = AgentEngine::new(client.clone(), &fx.layout);

    let outcome = engine
        .run(RunRequest::new(KEY, "Hi", fx.config.clone()))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Hello!");
    assert_eq!(outcome.iterations, 1);
    assert!(!outcome.max_iterations_reached);
    assert_eq!(outcome.usage.total_tokens, 150);
    assert_eq!(outcome.last_call_usage.input_tokens, 100);

    // Transcript tail: user then assistant.
    let records = engine.transcripts().load(KEY).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].role, "user");
    assert_eq!(records[0].content, "Hi");
    assert_eq!(records[1].role, "assistant");
    assert_eq!(records[1].content, "Hello!");

    // Index row carries model and cumulative tokens.
    let entries = engine.index().load().unwrap();
    let entry = entries.get(KEY).unwrap();
    assert_eq!(entry.model.as_deref(), Some("test-model"));
    assert_eq!(entry.total_tokens, Some(150));
    assert!(entry.session_file.ends_with(".jsonl"));

    // The provider saw the system prompt and the user message.
    let contexts = client.contexts.lock();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].system_prompt.contains("## Safety"));
    assert_eq!(contexts[0].messages.len(), 1);
}

#[tokio::test]
async fn tool_call_then_reply_emits_ordered_events() {
    let fx = fixture();
    let client = ScriptedClient::new(vec![
        tool_call_reply("tc1", "apply_patch", usage(10, 5)),
        reply("Done!", usage(20, 5)),
    ]);
    let (registry, tool) = stub_registry("apply_patch", "ok");
    let engine = AgentEngine::new(client.clone(), &fx.layout).with_registry(registry);

    let (events, callback) = recording_callback();
    let mut request = RunRequest::new(KEY, "patch it", fx.config.clone());
    request.on_event = Some(callback);

    let outcome = engine.run(request).await.unwrap();

    assert_eq!(outcome.reply, "Done!");
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.usage.total_tokens, 40);
    assert_eq!(tool.invocations.load(Ordering::SeqCst), 1);

    assert_eq!(
        kinds(&events),
        vec![
            "llm_start",
            "llm_end",
            "tool_start",
            "tool_end",
            "llm_start",
            "llm_end",
            "done"
        ]
    );

    // The tool result the second call saw is the stub's output.
    let contexts = client.contexts.lock();
    let second = &contexts[1];
    let result = second
        .messages
        .iter()
        .find_map(|m| m.as_tool_result())
        .unwrap();
    assert_eq!(result.tool_call_id, "tc1");
    assert_eq!(result.text_content(), "ok");
    assert!(!result.is_error);

    let tool_end_ok = events.lock().iter().any(|e| {
        matches!(e, AgentEvent::ToolEnd { tool_name, is_error, .. }
            if tool_name == "apply_patch" && !is_error)
    });
    assert!(tool_end_ok);
}

#[tokio::test]
async fn auth_failure_rotates_to_fallback_profile() {
    let mut fx = fixture();
    fx.config.profiles = vec![
        ProfileConfig {
            id: "primary".into(),
            api_key: "key-primary".into(),
        },
        ProfileConfig {
            id: "fallback".into(),
            api_key: "key-fallback".into(),
        },
    ];

    let client = ScriptedClient::new(vec![
        Step::Fail {
            status: Some(401),
            message: "invalid api key".into(),
        },
        reply("recovered", usage(5, 5)),
    ]);
    let engine = AgentEngine::new(client.clone(), &fx.layout);

    let (events, callback) = recording_callback();
    let mut request = RunRequest::new(KEY, "hello", fx.config.clone());
    request.on_event = Some(callback);

    let outcome = engine.run(request).await.unwrap();
    assert_eq!(outcome.reply, "recovered");

    // Exactly one retry event, naming the profile that serves the retry.
    let retries: Vec<(usize, String, String)> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Retry {
                attempt,
                reason,
                profile_id,
            } => Some((*attempt, reason.clone(), profile_id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, "auth".to_string(), "fallback".to_string())]);

    // The second call used the fallback credential.
    let keys = client.keys_used.lock();
    assert_eq!(keys.as_slice(), ["key-primary", "key-fallback"]);
}

#[tokio::test]
async fn retries_exhausted_surfaces_and_persists_nothing() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.max_retries = 1;

    let client = ScriptedClient::new(vec![
        Step::Fail {
            status: Some(429),
            message: "rate limited".into(),
        },
        Step::Fail {
            status: Some(429),
            message: "rate limited".into(),
        },
    ]);
    let engine = AgentEngine::new(client, &fx.layout);

    let err = engine
        .run(RunRequest::new(KEY, "hello", config))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));

    // Failed turns leave no trace.
    assert_eq!(engine.transcripts().count(KEY).unwrap(), 0);
    assert!(engine.index().load().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_provider_error_propagates_verbatim() {
    let fx = fixture();
    let client = ScriptedClient::new(vec![Step::Fail {
        status: None,
        message: "the model is feeling shy".into(),
    }]);
    let engine = AgentEngine::new(client, &fx.layout);

    let err = engine
        .run(RunRequest::new(KEY, "hello", fx.config.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider { .. }));
    assert!(err.to_string().contains("feeling shy"));
}

#[tokio::test]
async fn max_iterations_cap_persists_partial_progress() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.max_iterations = 3;

    let client = ScriptedClient::new(vec![
        tool_call_reply("tc1", "probe", usage(1, 1)),
        tool_call_reply("tc2", "probe", usage(1, 1)),
        tool_call_reply("tc3", "probe", usage(1, 1)),
    ]);
    let (registry, tool) = stub_registry("probe", "pong");
    let engine = AgentEngine::new(client.clone(), &fx.layout).with_registry(registry);

    let outcome = engine
        .run(RunRequest::new(KEY, "loop forever", config))
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 3);
    assert!(outcome.max_iterations_reached);
    assert_eq!(client.contexts.lock().len(), 3);
    assert_eq!(tool.invocations.load(Ordering::SeqCst), 3);

    // user + 3 assistants + 3 tool results.
    let records = engine.transcripts().load(KEY).unwrap();
    assert_eq!(records.len(), 7);
    assert_eq!(records.iter().filter(|r| r.role == "assistant").count(), 3);
    assert_eq!(records.iter().filter(|r| r.role == "tool").count(), 3);
}

#[tokio::test]
async fn pre_aborted_token_fails_without_touching_the_transcript() {
    let fx = fixture();
    let client = ScriptedClient::new(vec![reply("never seen", usage(1, 1))]);
    let engine = AgentEngine::new(client.clone(), &fx.layout);

    let mut request = RunRequest::new(KEY, "hello", fx.config.clone());
    request.cancel = CancelToken::new();
    request.cancel.cancel();

    let err = engine.run(request).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));

    assert_eq!(engine.transcripts().count(KEY).unwrap(), 0);
    assert!(client.contexts.lock().is_empty());
}

#[tokio::test]
async fn orphaned_tool_call_is_repaired_before_the_provider_sees_history() {
    let fx = fixture();

    // Persist an interrupted session: a tool call with no result.
    let log = TranscriptLog::new(fx.layout.sessions_dir());
    let interrupted = vec![
        ChatMessage::User(mc_domain::UserMessage::text("go")),
        ChatMessage::Assistant(AssistantMessage {
            content: vec![
                AssistantContent::Text {
                    text: "running it".into(),
                },
                AssistantContent::ToolCall {
                    id: "tc1".into(),
                    name: "exec".into(),
                    arguments: serde_json::json!({"command": "ls"}),
                },
            ],
            provider: "scripted".into(),
            model: "test-model".into(),
            usage: Usage::default(),
            stop_reason: Some("tool_calls".into()),
            ts: 1,
        }),
        ChatMessage::Assistant(AssistantMessage::text("next turn")),
    ];
    log.append_batch(KEY, &messages_to_transcript(&interrupted))
        .unwrap();

    let client = ScriptedClient::new(vec![reply("all good", usage(5, 5))]);
    let engine = AgentEngine::new(client.clone(), &fx.layout);

    let outcome = engine
        .run(RunRequest::new(KEY, "continue", fx.config.clone()))
        .await
        .unwrap();
    assert_eq!(outcome.reply, "all good");

    // The provider must have seen a valid conversation: the synthetic
    // result sits between the two assistant messages.
    let contexts = client.contexts.lock();
    let messages = &contexts[0].messages;
    assert_eq!(messages.len(), 5);

    let repaired = messages[2].as_tool_result().unwrap();
    assert_eq!(repaired.tool_call_id, "tc1");
    assert_eq!(repaired.tool_name, "exec");
    assert!(repaired.is_error);
    assert_eq!(repaired.text_content(), ORPHANED_TOOL_RESULT_TEXT);
}

#[tokio::test]
async fn overflow_recovery_compacts_then_retries() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.overflow.keep_recent_messages = 2;

    // Seed a long prior conversation so compaction has something to fold.
    let log = TranscriptLog::new(fx.layout.sessions_dir());
    let history: Vec<ChatMessage> = (0..6)
        .flat_map(|i| {
            vec![
                ChatMessage::User(mc_domain::UserMessage::text(format!("question {i}"))),
                ChatMessage::Assistant(AssistantMessage::text(format!("answer {i}"))),
            ]
        })
        .collect();
    log.append_batch(KEY, &messages_to_transcript(&history))
        .unwrap();

    let client = ScriptedClient::new(vec![
        // First attempt overflows.
        Step::Fail {
            status: None,
            message: "context_length_exceeded".into(),
        },
        // The compaction summary call.
        reply("summary of the early questions", usage(2, 2)),
        // Retried attempt succeeds.
        reply("fresh answer", usage(5, 5)),
    ]);
    let engine = AgentEngine::new(client.clone(), &fx.layout);

    let (events, callback) = recording_callback();
    let mut request = RunRequest::new(KEY, "one more", config);
    request.on_event = Some(callback);

    let outcome = engine.run(request).await.unwrap();
    assert_eq!(outcome.reply, "fresh answer");
    assert_eq!(outcome.iterations, 1, "overflow recovery must not consume an iteration");

    let compactions: Vec<(usize, usize)> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Compaction {
                old_count,
                new_count,
            } => Some((*old_count, *new_count)),
            _ => None,
        })
        .collect();
    // 12 prior messages + 1 new user → summary + last 2.
    assert_eq!(compactions, vec![(13, 3)]);

    // The retried call saw the compacted history.
    let contexts = client.contexts.lock();
    let retried = contexts.last().unwrap();
    assert_eq!(retried.messages.len(), 3);
    let ChatMessage::User(summary) = &retried.messages[0] else {
        panic!("expected the summary message first");
    };
    assert!(summary.text_content().starts_with("[Conversation summary]"));
    assert!(summary.text_content().contains("summary of the early questions"));
}

#[tokio::test]
async fn overflow_after_both_stages_is_terminal() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.overflow.keep_recent_messages = 10;

    // History too short to compact and nothing to truncate, so both
    // stages run dry and the overflow becomes terminal.
    let client = ScriptedClient::new(vec![Step::Fail {
        status: None,
        message: "prompt is too long".into(),
    }]);
    let engine = AgentEngine::new(client, &fx.layout);

    let err = engine
        .run(RunRequest::new(KEY, "hi", config))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Overflow(_)));
    assert_eq!(engine.transcripts().count(KEY).unwrap(), 0);
}
