//! OpenAI-compatible chat-completions adapter.
//!
//! Works with OpenAI, OpenRouter, Groq, DeepSeek, Together, Ollama, vLLM,
//! LM Studio, and any other endpoint that follows the OpenAI contract. One
//! client instance serves every descriptor; the credential arrives per call
//! from whichever profile the failover chain selected.

use futures_util::StreamExt;
use serde_json::Value;

use mc_domain::{
    now_ms, AssistantContent, AssistantMessage, BoxStream, ChatMessage, Error, Result,
    StreamEvent, ToolDefinition, TokenCost, Usage,
};

use crate::sse::SseDecoder;
use crate::traits::{CallOptions, ChatContext, LlmClient, ProviderDescriptor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatClient {
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { http })
    }

    fn chat_url(descriptor: &ProviderDescriptor) -> String {
        format!("{}/chat/completions", descriptor.base_url)
    }

    async fn post_chat(
        &self,
        descriptor: &ProviderDescriptor,
        options: &CallOptions,
        body: &Value,
    ) -> Result<reqwest::Response> {
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled("provider call aborted".into()));
        }

        let url = Self::chat_url(descriptor);
        tracing::debug!(provider = %descriptor.name, url = %url, "chat request");

        let request = self
            .http
            .post(&url)
            .bearer_auth(&options.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send();

        let response = tokio::select! {
            result = request => result.map_err(from_reqwest)?,
            _ = options.cancel.cancelled() => {
                return Err(Error::Cancelled("provider call aborted".into()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: descriptor.name.clone(),
                status: Some(status.as_u16()),
                message,
            });
        }

        Ok(response)
    }
}

/// Fold a transport error into the domain error. Timeouts keep their own
/// variant so the failover classifier sees them as such.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<AssistantMessage> {
        let body = build_chat_body(descriptor, context, false);
        let response = self.post_chat(descriptor, options, &body).await?;
        let json: Value = response.json().await.map_err(from_reqwest)?;
        parse_chat_response(descriptor, &json)
    }

    async fn stream(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = build_chat_body(descriptor, context, true);
        let response = self.post_chat(descriptor, options, &body).await?;

        let stream = async_stream::stream! {
            let mut frames = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut state = StreamState::default();

            while let Some(chunk) = frames.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        return;
                    }
                };
                for payload in decoder.feed(&chunk) {
                    for event in state.parse_data(&payload) {
                        yield event;
                    }
                }
            }

            for payload in decoder.finish() {
                for event in state.parse_data(&payload) {
                    yield event;
                }
            }

            // Some endpoints cut the body without a finish chunk or the
            // [DONE] sentinel. Close the stream for them, keeping any
            // usage that already arrived.
            if !state.done_sent {
                yield Ok(StreamEvent::Done {
                    usage: state.usage,
                    stop_reason: Some("stop".into()),
                });
            }
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_chat_body(descriptor: &ProviderDescriptor, context: &ChatContext, stream: bool) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(context.messages.len() + 1);
    if !context.system_prompt.is_empty() {
        messages.push(serde_json::json!({
            "role": "system",
            "content": context.system_prompt,
        }));
    }
    for message in &context.messages {
        messages.push(message_to_wire(message));
    }

    let mut body = serde_json::json!({
        "model": descriptor.model,
        "messages": messages,
        "stream": stream,
    });

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context.tools.iter().map(tool_to_wire).collect();
        body["tools"] = Value::Array(tools);
    }
    if stream {
        body["stream_options"] = serde_json::json!({"include_usage": true});
    }
    body
}

fn message_to_wire(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::User(m) => serde_json::json!({
            "role": "user",
            "content": m.text_content(),
        }),
        ChatMessage::Assistant(m) => {
            let mut obj = serde_json::json!({"role": "assistant"});

            let text = m.text_content();
            obj["content"] = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };

            let tool_calls: Vec<Value> = m
                .content
                .iter()
                .filter_map(|part| match part {
                    AssistantContent::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": arguments.to_string(),
                        }
                    })),
                    _ => None,
                })
                .collect();
            if !tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(tool_calls);
            }
            obj
        }
        ChatMessage::ToolResult(m) => serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id,
            "content": m.text_content(),
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(descriptor: &ProviderDescriptor, body: &Value) -> Result<AssistantMessage> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::provider(&descriptor.name, "no choices in response"))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::provider(&descriptor.name, "no message in choice"))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("reasoning_content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            content.push(AssistantContent::Thinking { text: text.into() });
        }
    }
    if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            content.push(AssistantContent::Text { text: text.into() });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let Some(id) = call.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(function) = call.get("function") else {
                continue;
            };
            let Some(name) = function.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let args_str = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            content.push(AssistantContent::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            });
        }
    }

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(&descriptor.model)
        .to_owned();

    Ok(AssistantMessage {
        content,
        provider: descriptor.name.clone(),
        model,
        usage: body.get("usage").map(parse_usage).unwrap_or_default(),
        stop_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
        ts: now_ms(),
    })
}

fn parse_usage(v: &Value) -> Usage {
    let input_tokens = v.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = v
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let cache_read_tokens = v
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Usage {
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_write_tokens: 0,
        total_tokens: v
            .get("total_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(input_tokens + output_tokens),
        cost: TokenCost::default(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call chunks arrive keyed by index: the id and name once, then
/// argument fragments. This state reassembles them so downstream consumers
/// only see events keyed by the real call id.
#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct StreamState {
    calls: Vec<(u64, PendingCall)>,
    usage: Option<Usage>,
    done_sent: bool,
}

impl StreamState {
    fn parse_data(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            if self.done_sent {
                return Vec::new();
            }
            let mut events = self.flush_finished();
            self.done_sent = true;
            events.push(Ok(StreamEvent::Done {
                usage: self.usage,
                stop_reason: Some("stop".into()),
            }));
            return events;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").filter(|u| !u.is_null()).map(parse_usage) {
                self.usage = Some(usage);
            }
            return Vec::new();
        };

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            if let Some(usage) = v.get("usage").filter(|u| !u.is_null()).map(parse_usage) {
                self.usage = Some(usage);
            }
            let mut events = self.flush_finished();
            self.done_sent = true;
            events.push(Ok(StreamEvent::Done {
                usage: self.usage,
                stop_reason: Some(reason.to_owned()),
            }));
            return events;
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let mut events = Vec::new();

        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let entry = self.call_mut(index);

                if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                    entry.id = id.to_owned();
                    if let Some(name) = call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                    {
                        entry.name = name.to_owned();
                    }
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: entry.id.clone(),
                        tool_name: entry.name.clone(),
                    }));
                }

                if let Some(args) = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() {
                        let entry = self.call_mut(index);
                        entry.arguments.push_str(args);
                        let call_id = if entry.id.is_empty() {
                            index.to_string()
                        } else {
                            entry.id.clone()
                        };
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id,
                            delta: args.to_owned(),
                        }));
                    }
                }
            }
            return events;
        }

        // Reasoning content (DeepSeek and friends).
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ThinkingDelta { text: text.into() }));
            }
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextDelta { text: text.into() }));
            }
        }

        events
    }

    fn call_mut(&mut self, index: u64) -> &mut PendingCall {
        if let Some(pos) = self.calls.iter().position(|(i, _)| *i == index) {
            return &mut self.calls[pos].1;
        }
        self.calls.push((index, PendingCall::default()));
        let last = self.calls.len() - 1;
        &mut self.calls[last].1
    }

    /// Emit a `ToolCallFinished` for every assembled call, in index order.
    fn flush_finished(&mut self) -> Vec<Result<StreamEvent>> {
        let mut calls = std::mem::take(&mut self.calls);
        calls.sort_by_key(|(i, _)| *i);

        calls
            .into_iter()
            .map(|(index, call)| {
                let arguments: Value = if call.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                        tracing::warn!(
                            call_id = %call.id,
                            tool = %call.name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                let call_id = if call.id.is_empty() {
                    index.to_string()
                } else {
                    call.id
                };
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name: call.name,
                    arguments,
                })
            })
            .collect()
    }
}
