use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// Opaque per-browser-install correlation token, echoed by the client on
/// every generation-triggering call. Never an authorization input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(format!("chat_{}", Uuid::new_v4().simple()))
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }
}

impl StreamId {
    pub fn new() -> Self {
        Self(format!("stream_{}", Uuid::new_v4().simple()))
    }

    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 14)
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// --- STREAM LIFECYCLE ---

/// Status column of a stream record. `Pending` until the first append,
/// `Streaming` while the writer drains the provider, then exactly one
/// transition into a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Pending,
    Streaming,
    Done,
    Error,
    Timeout,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "streaming" => Some(Self::Streaming),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Timeout)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a stream record.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub status: StreamStatus,
    pub body: String,
}

impl StreamSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// --- ROLES & HISTORY ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One turn of assembled conversation context, ready for a provider call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

/// --- PROVIDER FAMILIES & CREDENTIALS ---

/// Grouping of model ids that share credential and invocation requirements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
    Groq,
    OpenRouter,
}

impl ProviderFamily {
    /// Storage column / API path segment for this family's credential.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" => Some(Self::Google),
            "groq" => Some(Self::Groq),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    pub const ALL: &'static [ProviderFamily] = &[
        Self::OpenAi,
        Self::Groq,
        Self::Anthropic,
        Self::Google,
        Self::OpenRouter,
    ];
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decrypted per-provider credentials for one user. Values live only for
/// the duration of a resolution; nothing here is ever serialized back out.
#[derive(Debug, Clone, Default)]
pub struct ApiKeySet {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
    pub openrouter: Option<String>,
}

impl ApiKeySet {
    pub fn get(&self, family: ProviderFamily) -> Option<&str> {
        let slot = match family {
            ProviderFamily::OpenAi => &self.openai,
            ProviderFamily::Groq => &self.groq,
            ProviderFamily::Anthropic => &self.anthropic,
            ProviderFamily::Google => &self.google,
            ProviderFamily::OpenRouter => &self.openrouter,
        };
        slot.as_deref()
    }

    pub fn set(&mut self, family: ProviderFamily, value: Option<String>) {
        let slot = match family {
            ProviderFamily::OpenAi => &mut self.openai,
            ProviderFamily::Groq => &mut self.groq,
            ProviderFamily::Anthropic => &mut self.anthropic,
            ProviderFamily::Google => &mut self.google,
            ProviderFamily::OpenRouter => &mut self.openrouter,
        };
        *slot = value;
    }
}

/// --- ERRORS ---

#[derive(Error, Debug)]
pub enum RockpoolError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model not found: {0}")]
    UnknownModel(String),

    #[error("API key not configured for model: {0}")]
    MissingApiKey(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("Stream {0} is closed")]
    StreamClosed(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: RockpoolError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<RockpoolError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        // Server-side faults keep their detail in the log only; the body
        // carries a generic message so internals never reach the client.
        let (status, msg, code) = match &self.inner {
            RockpoolError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                "UNAUTHORIZED",
            ),
            RockpoolError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone(), "NOT_FOUND"),
            RockpoolError::InvalidRequest(m) => {
                (StatusCode::BAD_REQUEST, m.clone(), "INVALID_REQUEST")
            }
            RockpoolError::UnknownModel(_) => (
                StatusCode::BAD_REQUEST,
                self.inner.to_string(),
                "MODEL_NOT_FOUND",
            ),
            RockpoolError::MissingApiKey(_) => (
                StatusCode::BAD_REQUEST,
                self.inner.to_string(),
                "MISSING_API_KEY",
            ),
            RockpoolError::StreamClosed(_) => (
                StatusCode::CONFLICT,
                self.inner.to_string(),
                "STREAM_CLOSED",
            ),
            RockpoolError::Upstream(..) => (
                StatusCode::BAD_GATEWAY,
                "Upstream provider error".to_string(),
                "UPSTREAM_ERROR",
            ),
            RockpoolError::Network(_) => (
                StatusCode::BAD_GATEWAY,
                "Network error".to_string(),
                "NETWORK_ERROR",
            ),
            RockpoolError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "DATABASE_ERROR",
            ),
            RockpoolError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "SERIALIZATION_ERROR",
            ),
            RockpoolError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "IO_ERROR",
            ),
            RockpoolError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "CRYPTO_ERROR",
            ),
            RockpoolError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "CONFIG_ERROR",
            ),
            RockpoolError::Internal(..) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        if status.is_server_error() {
            tracing::error!("[⚙️ ] Request failed: {}", self);
        } else {
            tracing::debug!("[⚙️ ] Request rejected: {}", self.inner);
        }

        (
            status,
            axum::Json(serde_json::json!({
                "error": msg,
                "code": code,
            })),
        )
            .into_response()
    }
}

/// Generic user-safe message for provider failures surfaced on a stream.
/// The raw upstream error goes to the log, never to the client.
pub const GENERATION_FAILED_MESSAGE: &str = "Generation failed. Please try again.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_status_round_trip() {
        for status in [
            StreamStatus::Pending,
            StreamStatus::Streaming,
            StreamStatus::Done,
            StreamStatus::Error,
            StreamStatus::Timeout,
        ] {
            match StreamStatus::parse(status.as_str()) {
                Some(parsed) => assert_eq!(parsed, status),
                None => panic!("Failed to parse {}", status),
            }
        }
        assert!(StreamStatus::parse("finished").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StreamStatus::Pending.is_terminal());
        assert!(!StreamStatus::Streaming.is_terminal());
        assert!(StreamStatus::Done.is_terminal());
        assert!(StreamStatus::Error.is_terminal());
        assert!(StreamStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_error_messages_name_the_model() {
        let err = RockpoolError::UnknownModel("gpt-9".to_string());
        assert_eq!(err.to_string(), "Model not found: gpt-9");

        let err = RockpoolError::MissingApiKey("gpt-4.1".to_string());
        assert_eq!(err.to_string(), "API key not configured for model: gpt-4.1");
    }

    #[test]
    fn test_id_prefixes() {
        assert!(ChatId::new().0.starts_with("chat_"));
        assert!(MessageId::new().0.starts_with("msg_"));
        assert!(StreamId::new().0.starts_with("stream_"));
    }
}
