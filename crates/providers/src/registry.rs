//! Provider descriptor registry.
//!
//! Maps a configured provider name to its default chat-completions base
//! URL. All listed endpoints speak the OpenAI-compatible wire format the
//! bundled adapter implements. Unknown names still resolve, to a minimal
//! descriptor with reasonable defaults, so a self-hosted endpoint only
//! needs a base URL override, not a registry entry.

use crate::traits::ProviderDescriptor;

struct KnownProvider {
    name: &'static str,
    base_url: &'static str,
}

const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        name: "openai",
        base_url: "https://api.openai.com/v1",
    },
    KnownProvider {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
    },
    KnownProvider {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
    },
    KnownProvider {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1",
    },
    KnownProvider {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
    },
    KnownProvider {
        name: "together",
        base_url: "https://api.together.xyz/v1",
    },
    KnownProvider {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
    },
];

/// Base URL used when the provider is unknown and no override was given.
const FALLBACK_BASE_URL: &str = "http://localhost:11434/v1";

/// Resolve a provider descriptor from the configured (name, model, base
/// URL). An explicit base URL always wins; otherwise the registry default
/// or, for unknown providers, a minimal local default is used.
pub fn resolve_descriptor(
    provider: &str,
    model: &str,
    base_url: Option<&str>,
) -> ProviderDescriptor {
    let name = provider.trim().to_lowercase();

    let default_url = KNOWN_PROVIDERS
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.base_url);

    if default_url.is_none() && base_url.is_none() {
        tracing::warn!(
            provider = %name,
            "unknown provider with no base URL; using a minimal local descriptor"
        );
    }

    let url = base_url
        .or(default_url)
        .unwrap_or(FALLBACK_BASE_URL)
        .trim_end_matches('/')
        .to_owned();

    ProviderDescriptor {
        name,
        model: model.to_owned(),
        base_url: url,
    }
}
