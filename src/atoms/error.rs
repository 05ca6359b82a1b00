// ── Pilot Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the pilot, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, Provider, Gateway, Config…)
//     plus one variant per pipeline failure class (classification,
//     resolution, action, budget, unknown action).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • No variant carries secret material (tokens, API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Language-model provider failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Messaging platform failure (permission denied, not found, rate limited…).
    #[error("Gateway error: {gateway}: {message}")]
    Gateway { gateway: String, message: String },

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote classifier was unreachable or returned unparseable output.
    #[error("Classification failed: {0}")]
    Classification(String),

    /// A symbolic reference could not be mapped to a concrete entity.
    #[error("Could not resolve '{reference}': {message}. Available: {}", format_alternatives(.alternatives))]
    Resolution {
        reference: String,
        message: String,
        alternatives: Vec<String>,
    },

    /// A single platform action failed.
    #[error("Action {action} failed: {message}")]
    Action { action: String, message: String },

    /// The per-process request ceiling was crossed.
    #[error("Request budget exhausted ({used}/{limit})")]
    BudgetExceeded { used: u64, limit: u64 },

    /// The intent named an action type with no registered handler.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

fn format_alternatives(alternatives: &[String]) -> String {
    if alternatives.is_empty() {
        "none".to_string()
    } else {
        alternatives.join(", ")
    }
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create a gateway error with name and message.
    pub fn gateway(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway { gateway: gateway.into(), message: message.into() }
    }

    /// Create an action error with the action name and message.
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action { action: action.into(), message: message.into() }
    }

    /// Create a resolution error listing the closest alternatives.
    pub fn resolution(
        reference: impl Into<String>,
        message: impl Into<String>,
        alternatives: Vec<String>,
    ) -> Self {
        Self::Resolution {
            reference: reference.into(),
            message: message.into(),
            alternatives,
        }
    }

    /// Whether this error is a reference-resolution failure.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
