//! LLM provider layer: the provider-agnostic client trait, the descriptor
//! registry, failure classification, per-credential failover state, and the
//! OpenAI-compatible streaming HTTP adapter.

pub mod classify;
pub mod failover;
pub mod openai_compat;
pub mod registry;
mod sse;
pub mod traits;

pub use classify::{classify_error, ErrorCategory};
pub use failover::{next_index, ProfileChain, ProfileState, INITIAL_COOLDOWN_MS, MAX_COOLDOWN_MS};
pub use openai_compat::OpenAiCompatClient;
pub use registry::resolve_descriptor;
pub use traits::{CallOptions, ChatContext, LlmClient, ProviderDescriptor};
