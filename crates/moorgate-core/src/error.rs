//! Crate-wide error taxonomy
//!
//! Each variant has a stable `kind()` string the HTTP router can surface,
//! and a user-error classification for 4xx mapping. Module-local failures
//! (`McpError`, `ModelError`) convert into this type at the seams.

use thiserror::Error;

use crate::mcp::McpError;
use crate::model::ModelError;

/// Errors surfaced across the broker, dispatcher, and conversation loop
#[derive(Error, Debug)]
pub enum Error {
    /// Integration id not present in the provider registry (user input)
    #[error("unknown integration: {0}")]
    UnknownProvider(String),

    /// Provider does not expose usable OAuth metadata; fatal to this
    /// connect attempt, never retried automatically
    #[error("OAuth discovery failed for {provider}: {reason}")]
    Discovery { provider: String, reason: String },

    /// Callback arrived with an unrecognized or stale state token
    #[error("invalid or expired OAuth state")]
    InvalidOrExpiredState,

    /// Authorization server rejected the code exchange
    #[error("token exchange failed ({status}): {detail}")]
    TokenExchange { status: u16, detail: String },

    /// Tool or provider call attempted with no valid token
    #[error("not authenticated with {0}; connect it first")]
    NotAuthenticated(String),

    /// Provider-side session loss that survived the single reconnect-and-retry
    #[error("provider session expired for {0} and reconnect did not recover it")]
    ProviderSessionExpired(String),

    /// Tool name not present in the current catalog
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A single tool invocation failed; isolated per call
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Upstream rate limit; surfaced with the retry-after hint, not retried
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// MCP protocol or transport failure
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Model API failure
    #[error(transparent)]
    Model(#[from] ModelError),

    /// HTTP failure talking to an authorization server
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON from an upstream
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local IO failure, e.g. binding a callback listener
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable kind for callers
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownProvider(_) => "unknown_provider",
            Error::Discovery { .. } => "discovery_failed",
            Error::InvalidOrExpiredState => "invalid_or_expired_state",
            Error::TokenExchange { .. } => "token_exchange_failed",
            Error::NotAuthenticated(_) => "not_authenticated",
            Error::ProviderSessionExpired(_) => "provider_session_expired",
            Error::UnknownTool(_) => "unknown_tool",
            Error::ToolExecution(_) => "tool_execution_failed",
            Error::RateLimited { .. } => "rate_limited",
            Error::Mcp(_) => "mcp_error",
            Error::Model(_) => "model_error",
            Error::Http(_) => "http_error",
            Error::Json(_) => "json_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Whether this is a caller mistake (map to 4xx) rather than an
    /// upstream or internal failure
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownProvider(_) | Error::InvalidOrExpiredState | Error::UnknownTool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(Error::UnknownProvider("x".into()).kind(), "unknown_provider");
        assert_eq!(Error::InvalidOrExpiredState.kind(), "invalid_or_expired_state");
        assert_eq!(
            Error::TokenExchange {
                status: 400,
                detail: "bad code".into()
            }
            .kind(),
            "token_exchange_failed"
        );
    }

    #[test]
    fn test_user_error_classification() {
        assert!(Error::UnknownProvider("x".into()).is_user_error());
        assert!(Error::InvalidOrExpiredState.is_user_error());
        assert!(Error::UnknownTool("x".into()).is_user_error());
        assert!(!Error::NotAuthenticated("mixpanel".into()).is_user_error());
        assert!(!Error::Discovery {
            provider: "jira".into(),
            reason: "no metadata".into()
        }
        .is_user_error());
    }
}
