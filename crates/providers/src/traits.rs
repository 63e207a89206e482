use mc_domain::{
    AssistantMessage, BoxStream, CancelToken, ChatMessage, Result, StreamEvent, ToolDefinition,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor / context / options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where and what to call: resolved once per run from the configuration
/// snapshot (provider name, model id, optional base URL override).
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Provider name as configured (e.g. `"openai"`).
    pub name: String,
    /// Model identifier sent on every request.
    pub model: String,
    /// Chat-completions base URL, no trailing slash.
    pub base_url: String,
}

/// What to send: system prompt, conversation, and tool definitions.
/// System prompts are not messages; they ride alongside the sequence.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Per-call options. The credential comes from whichever profile the
/// failover chain selected for this attempt.
#[derive(Clone)]
pub struct CallOptions {
    pub api_key: String,
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM wire adapter implements.
///
/// Streaming and buffered calls are one abstraction: both resolve to the
/// final assistant message, [`LlmClient::stream`] additionally yields the
/// fine-grained events on the way there.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request and wait for the full response.
    async fn complete(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<AssistantMessage>;

    /// Send a chat request and return a stream of events. The caller
    /// assembles the final assistant message from the stream.
    async fn stream(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ChatContext,
        options: &CallOptions,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
