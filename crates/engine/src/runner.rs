//! The per-turn run loop.
//!
//! One call to [`AgentEngine::run`] drives a full turn: load and repair the
//! transcript, append the user message, then iterate provider calls and
//! tool dispatch until the model stops asking for tools or the iteration
//! cap is hit. Provider failures rotate through the credential profiles
//! with doubling cooldowns; context overflow runs the two-stage recovery;
//! cancellation is honoured at every suspension point. Only a successful
//! (or capped) turn persists; failed turns leave the transcript at the
//! last completed turn.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;

use mc_domain::{
    now_ms, AssistantContent, AssistantMessage, CancelToken, ChatMessage, EngineConfig, Error,
    Result, StateLayout, StreamEvent, ToolDefinition, Usage, UserMessage,
};
use mc_providers::{
    classify_error, resolve_descriptor, CallOptions, ChatContext, ErrorCategory, LlmClient,
    ProfileChain, ProviderDescriptor,
};
use mc_sessions::{
    messages_to_transcript, repair_orphaned_tool_calls, transcript_to_messages, SessionIndex,
    SessionMetaPatch, TranscriptLog,
};
use mc_tools::{run_tool_call, workspace_registry, ToolRegistry};

use crate::bootstrap::{
    load_bootstrap_files, scaffold_workspace, DEFAULT_PER_FILE_CAP, DEFAULT_TOTAL_CAP,
};
use crate::composer::{compose_system_prompt, ComposerInput};
use crate::events::{AgentEvent, EventCallback};
use crate::overflow::{compact_history, truncate_tool_results, OverflowRecovery};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one turn.
pub struct RunRequest {
    pub session_key: String,
    pub user_text: String,
    pub config: EngineConfig,
    pub cancel: CancelToken,
    pub on_event: Option<EventCallback>,
}

impl RunRequest {
    pub fn new(
        session_key: impl Into<String>,
        user_text: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            user_text: user_text.into(),
            config,
            cancel: CancelToken::new(),
            on_event: None,
        }
    }
}

/// What a completed turn returns.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Concatenated text blocks of the final assistant message.
    pub reply: String,
    /// Usage summed over every provider call of the turn.
    pub usage: Usage,
    /// Usage of the last provider call alone.
    pub last_call_usage: Usage,
    pub iterations: usize,
    pub max_iterations_reached: bool,
}

/// The engine: one provider client plus the session stores. Cheap to keep
/// around; each [`Self::run`] call is an independent turn.
pub struct AgentEngine {
    client: Arc<dyn LlmClient>,
    transcripts: TranscriptLog,
    index: SessionIndex,
    registry: Option<Arc<ToolRegistry>>,
}

impl AgentEngine {
    pub fn new(client: Arc<dyn LlmClient>, layout: &StateLayout) -> Self {
        Self {
            client,
            transcripts: TranscriptLog::new(layout.sessions_dir()),
            index: SessionIndex::new(layout.sessions_dir()),
            registry: None,
        }
    }

    /// Replace the default workspace tool set.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn transcripts(&self) -> &TranscriptLog {
        &self.transcripts
    }

    pub fn index(&self) -> &SessionIndex {
        &self.index
    }

    /// Drive one conversation turn to completion.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let config = &request.config;
        if config.profiles.is_empty() {
            return Err(Error::Config(
                "at least one credential profile is required".into(),
            ));
        }
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled("run cancelled before start".into()));
        }

        // ── Setup ────────────────────────────────────────────────────
        scaffold_workspace(&config.workspace_dir)?;
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => Arc::new(workspace_registry(&config.workspace_dir)),
        };

        let bootstrap_files =
            load_bootstrap_files(&config.workspace_dir, DEFAULT_PER_FILE_CAP, DEFAULT_TOTAL_CAP);
        let tool_names = registry.names();
        let system_prompt = compose_system_prompt(&ComposerInput {
            identity: None,
            bootstrap_files: &bootstrap_files,
            tool_names: &tool_names,
            model: Some(&config.model),
            workspace_dir: &config.workspace_dir,
        });

        let descriptor =
            resolve_descriptor(&config.provider, &config.model, config.base_url.as_deref());

        let records = self.transcripts.load(&request.session_key)?;
        let mut messages = repair_orphaned_tool_calls(transcript_to_messages(&records));
        messages.push(ChatMessage::User(UserMessage::text(&request.user_text)));
        let history_base = messages.len();

        let mut chain = ProfileChain::new(config.profiles.len());
        let tool_defs = registry.definitions();
        let mut recovery = OverflowRecovery::default();
        let mut total_usage = Usage::default();
        let mut last_call_usage = Usage::default();

        // ── Iterate ──────────────────────────────────────────────────
        for iteration in 0..config.max_iterations {
            if request.cancel.is_cancelled() {
                return Err(Error::Cancelled("run cancelled".into()));
            }

            let assistant = self
                .call_with_failover(
                    &request,
                    &descriptor,
                    &system_prompt,
                    &tool_defs,
                    &mut messages,
                    &mut chain,
                    &mut recovery,
                    iteration,
                )
                .await?;

            total_usage.accumulate(&assistant.usage);
            last_call_usage = assistant.usage;
            self.emit(
                &request,
                AgentEvent::LlmEnd {
                    message: assistant.clone(),
                },
            );

            let calls = assistant.tool_calls();
            messages.push(ChatMessage::Assistant(assistant));

            if calls.is_empty() {
                let reply = last_assistant_text(&messages);
                self.finish_turn(&request, &messages, history_base, &total_usage)?;
                let outcome = RunOutcome {
                    reply,
                    usage: total_usage,
                    last_call_usage,
                    iterations: iteration + 1,
                    max_iterations_reached: false,
                };
                self.emit(
                    &request,
                    AgentEvent::Done {
                        result: outcome.clone(),
                    },
                );
                return Ok(outcome);
            }

            for call in &calls {
                if request.cancel.is_cancelled() {
                    return Err(Error::Cancelled("run cancelled during tool dispatch".into()));
                }
                self.emit(
                    &request,
                    AgentEvent::ToolStart {
                        tool_name: call.tool_name.clone(),
                        tool_call_id: call.call_id.clone(),
                    },
                );
                let started = Instant::now();
                let result =
                    run_tool_call(&registry, call, &request.cancel, config.tool_result_max_chars)
                        .await;
                self.emit(
                    &request,
                    AgentEvent::ToolEnd {
                        tool_name: call.tool_name.clone(),
                        tool_call_id: call.call_id.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        is_error: result.is_error,
                    },
                );
                messages.push(ChatMessage::ToolResult(result));
            }

            // A fresh batch of tool results may overflow again later;
            // re-arm both recovery stages.
            recovery.reset();
        }

        // ── Iteration cap ────────────────────────────────────────────
        tracing::warn!(
            max_iterations = config.max_iterations,
            "iteration cap reached before a final reply"
        );
        let reply = last_assistant_text(&messages);
        self.finish_turn(&request, &messages, history_base, &total_usage)?;
        let outcome = RunOutcome {
            reply,
            usage: total_usage,
            last_call_usage,
            iterations: config.max_iterations,
            max_iterations_reached: true,
        };
        self.emit(
            &request,
            AgentEvent::Done {
                result: outcome.clone(),
            },
        );
        Ok(outcome)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provider call with failover
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[allow(clippy::too_many_arguments)]
    async fn call_with_failover(
        &self,
        request: &RunRequest,
        descriptor: &ProviderDescriptor,
        system_prompt: &str,
        tool_defs: &[ToolDefinition],
        messages: &mut Vec<ChatMessage>,
        chain: &mut ProfileChain,
        recovery: &mut OverflowRecovery,
        iteration: usize,
    ) -> Result<AssistantMessage> {
        let config = &request.config;
        let mut attempt = 0usize;

        loop {
            if request.cancel.is_cancelled() {
                return Err(Error::Cancelled("run cancelled".into()));
            }

            // Select an available profile, sleeping out cooldowns.
            let profile_idx = loop {
                match chain.select(now_ms()) {
                    Some(idx) => break idx,
                    None => {
                        let wait = chain.shortest_remaining_cooldown(now_ms());
                        tracing::debug!(wait_ms = wait, "all profiles cooling down");
                        sleep_cancellable(wait, &request.cancel).await?;
                    }
                }
            };
            let profile = &config.profiles[profile_idx];

            self.emit(request, AgentEvent::LlmStart { iteration });

            let context = ChatContext {
                system_prompt: system_prompt.to_owned(),
                messages: messages.clone(),
                tools: tool_defs.to_vec(),
            };
            let options = CallOptions {
                api_key: profile.api_key.clone(),
                cancel: request.cancel.clone(),
            };

            let err = match self.perform_call(descriptor, &context, &options, request).await {
                Ok(message) => {
                    chain.mark_good(profile_idx);
                    return Ok(message);
                }
                Err(err) => err,
            };
            if matches!(err, Error::Cancelled(_)) {
                return Err(err);
            }

            let category = classify_error(&err);
            tracing::warn!(category = %category, error = %err, "provider call failed");

            match category {
                ErrorCategory::ContextOverflow => {
                    if self
                        .recover_overflow(request, messages, recovery, descriptor, &options)
                        .await?
                    {
                        // Retry this iteration without consuming a retry.
                        continue;
                    }
                    return Err(Error::Overflow(format!(
                        "context overflow persisted after recovery: {err}"
                    )));
                }
                category if category.is_retriable() => {
                    chain.mark_failed(profile_idx, now_ms());
                    chain.advance();
                    attempt += 1;
                    if attempt > config.max_retries {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let next_profile = &config.profiles[chain.current()];
                    self.emit(
                        request,
                        AgentEvent::Retry {
                            attempt,
                            reason: category.as_str().to_owned(),
                            profile_id: next_profile.id.clone(),
                        },
                    );
                }
                _ => return Err(err),
            }
        }
    }

    /// Run the overflow guard stages in order. Returns whether a stage
    /// mutated the messages (meaning the call should be retried).
    async fn recover_overflow(
        &self,
        request: &RunRequest,
        messages: &mut Vec<ChatMessage>,
        recovery: &mut OverflowRecovery,
        descriptor: &ProviderDescriptor,
        options: &CallOptions,
    ) -> Result<bool> {
        let config = &request.config;

        if !recovery.compaction_attempted {
            recovery.compaction_attempted = true;
            let old_count = messages.len();

            // The compactor gets the provider as a closure; it never sees
            // the client directly.
            let client = self.client.clone();
            let desc = descriptor.clone();
            let opts = options.clone();
            let summarize = move |prompt: String| async move {
                let context = ChatContext {
                    system_prompt: String::new(),
                    messages: vec![ChatMessage::User(UserMessage::text(prompt))],
                    tools: Vec::new(),
                };
                let reply = client.complete(&desc, &context, &opts).await?;
                Ok(reply.text_content())
            };

            match compact_history(
                messages.clone(),
                config.overflow.keep_recent_messages,
                summarize,
            )
            .await
            {
                Ok(compacted) if compacted != *messages => {
                    let new_count = compacted.len();
                    *messages = compacted;
                    self.emit(
                        request,
                        AgentEvent::Compaction {
                            old_count,
                            new_count,
                        },
                    );
                    return Ok(true);
                }
                Ok(_) => {}
                Err(Error::Cancelled(reason)) => return Err(Error::Cancelled(reason)),
                Err(e) => {
                    tracing::warn!(error = %e, "compaction failed; trying truncation");
                }
            }
        }

        if !recovery.truncation_attempted {
            recovery.truncation_attempted = true;
            let count = messages.len();
            if truncate_tool_results(messages, config.overflow.tool_result_max_chars) {
                self.emit(
                    request,
                    AgentEvent::Compaction {
                        old_count: count,
                        new_count: messages.len(),
                    },
                );
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// One provider call. With an event callback the streaming path is
    /// used and every stream event is forwarded; otherwise the buffered
    /// path. Both resolve to the final assistant message.
    async fn perform_call(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
        request: &RunRequest,
    ) -> Result<AssistantMessage> {
        if request.on_event.is_none() {
            return self.client.complete(descriptor, context, options).await;
        }

        let mut stream = self.client.stream(descriptor, context, options).await?;
        let mut assembly = StreamAssembly::default();

        while let Some(event) = stream.next().await {
            if request.cancel.is_cancelled() {
                return Err(Error::Cancelled("run cancelled during streaming".into()));
            }
            let event = event?;
            self.emit(
                request,
                AgentEvent::LlmStream {
                    event: event.clone(),
                },
            );
            assembly.apply(&event, &descriptor.name)?;
        }

        Ok(assembly.finish(descriptor))
    }

    fn finish_turn(
        &self,
        request: &RunRequest,
        messages: &[ChatMessage],
        history_base: usize,
        total_usage: &Usage,
    ) -> Result<()> {
        // The new user message plus everything produced since.
        let tail = &messages[history_base - 1..];
        let records = messages_to_transcript(tail);
        self.transcripts
            .append_batch(&request.session_key, &records)?;

        let previous_total = self
            .index
            .load()?
            .get(&request.session_key)
            .and_then(|entry| entry.total_tokens)
            .unwrap_or(0);
        self.index.upsert_meta(
            &request.session_key,
            SessionMetaPatch {
                model: Some(request.config.model.clone()),
                total_tokens: Some(previous_total + total_usage.total_tokens),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    fn emit(&self, request: &RunRequest, event: AgentEvent) {
        if let Some(callback) = &request.on_event {
            callback(&event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Folds a provider event stream into the final assistant message.
///
/// Consecutive text/thinking deltas merge into one block. Tool calls are
/// taken from `ToolCallFinished` events; calls that only ever produced
/// started/delta events (providers without a finish marker) are assembled
/// from the buffered fragments when the stream ends.
#[derive(Default)]
struct StreamAssembly {
    blocks: Vec<AssistantContent>,
    pending: Vec<(String, String, String)>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl StreamAssembly {
    fn apply(&mut self, event: &StreamEvent, provider: &str) -> Result<()> {
        match event {
            StreamEvent::TextDelta { text } => {
                if let Some(AssistantContent::Text { text: buffer }) = self.blocks.last_mut() {
                    buffer.push_str(text);
                } else {
                    self.blocks.push(AssistantContent::Text { text: text.clone() });
                }
            }
            StreamEvent::ThinkingDelta { text } => {
                if let Some(AssistantContent::Thinking { text: buffer }) = self.blocks.last_mut() {
                    buffer.push_str(text);
                } else {
                    self.blocks
                        .push(AssistantContent::Thinking { text: text.clone() });
                }
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                self.pending
                    .push((call_id.clone(), tool_name.clone(), String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, _, buffer)) =
                    self.pending.iter_mut().find(|(id, _, _)| id == call_id)
                {
                    buffer.push_str(delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                self.pending.retain(|(id, _, _)| id != call_id);
                self.blocks.push(AssistantContent::ToolCall {
                    id: call_id.clone(),
                    name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
            }
            StreamEvent::Done { usage, stop_reason } => {
                if usage.is_some() {
                    self.usage = *usage;
                }
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason.clone();
                }
            }
            StreamEvent::Error { message } => {
                return Err(Error::provider(provider, message.clone()));
            }
        }
        Ok(())
    }

    fn finish(mut self, descriptor: &ProviderDescriptor) -> AssistantMessage {
        // Calls that never saw a finish marker.
        for (call_id, tool_name, buffer) in self.pending.drain(..) {
            let arguments = if buffer.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&buffer).unwrap_or_else(|e| {
                    tracing::warn!(call_id = %call_id, error = %e, "unparseable tool arguments");
                    serde_json::Value::Object(Default::default())
                })
            };
            self.blocks.push(AssistantContent::ToolCall {
                id: call_id,
                name: tool_name,
                arguments,
            });
        }

        AssistantMessage {
            content: self.blocks,
            provider: descriptor.name.clone(),
            model: descriptor.model.clone(),
            usage: self.usage.unwrap_or_default(),
            stop_reason: self.stop_reason,
            ts: now_ms(),
        }
    }
}

fn last_assistant_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find_map(|m| m.as_assistant())
        .map(|m| m.text_content())
        .unwrap_or_default()
}

async fn sleep_cancellable(ms: u64, cancel: &CancelToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled("cancelled during cooldown".into())),
    }
}
