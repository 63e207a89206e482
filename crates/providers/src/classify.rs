//! Provider failure classification.
//!
//! Maps an opaque failure into a recovery category. Status-code rules win
//! over message-substring rules, and within the message rules the overflow
//! patterns are tested before the timeout patterns, which are tested before
//! the quota patterns.

use mc_domain::Error;

/// Recovery category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    Billing,
    Timeout,
    Quota,
    ContextOverflow,
    Unknown,
}

impl ErrorCategory {
    /// Retriable categories rotate to the next credential profile.
    /// `ContextOverflow` takes the recovery path instead; `Quota` and
    /// `Unknown` are terminal.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Auth
                | ErrorCategory::RateLimit
                | ErrorCategory::Billing
                | ErrorCategory::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Billing => "billing",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Quota => "quota",
            ErrorCategory::ContextOverflow => "context_overflow",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const OVERFLOW_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "too many tokens",
    "token limit",
    "maximum context",
    "prompt is too long",
    "request too large",
    "max_tokens",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnaborted",
    "socket hang up",
    "network error",
];

const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "exceeded your current",
    "insufficient_quota",
    "billing hard limit",
];

/// Classify a provider failure.
pub fn classify_error(err: &Error) -> ErrorCategory {
    let (status, message) = match err {
        Error::Provider {
            status, message, ..
        } => (*status, message.clone()),
        other => (None, other.to_string()),
    };

    // Status rules first. A status outside the table falls through to the
    // message patterns rather than classifying as unknown.
    if let Some(code) = status {
        match code {
            401 | 403 => return ErrorCategory::Auth,
            429 => return ErrorCategory::RateLimit,
            402 => return ErrorCategory::Billing,
            code if code >= 500 => return ErrorCategory::Timeout,
            _ => {}
        }
    }

    let message = message.to_lowercase();
    if OVERFLOW_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCategory::ContextOverflow;
    }
    if TIMEOUT_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCategory::Timeout;
    }
    if QUOTA_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCategory::Quota;
    }

    ErrorCategory::Unknown
}
