use crate::models::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

/// --- CORE ROLES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Data,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Data => write!(f, "data"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = PrismError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "data" => Ok(Self::Data),
            other => Err(PrismError::InvalidRequest(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// One turn of provider-agnostic conversation history, as supplied by the
/// persistence layer before streaming begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: None,
        }
    }
}

/// A persisted message row. Exactly one assistant message per thread is
/// in-flight (`is_complete = false`) at a time; finalization flips the flag
/// and is never undone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_complete: bool,
}

/// --- TOOL CALLING ---

/// A structured request emitted by the model asking us to invoke a named
/// capability. Not every provider supplies an id; correlation falls back to
/// position in the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub args: serde_json::Value,
}

/// The textual outcome of executing a tool call, fed back into the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: Option<String>,
    pub content: String,
}

/// --- STREAMING EVENTS ---

/// One unit of output from the generation pipeline. Ephemeral: only the
/// accumulated text ever reaches the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text { delta: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// --- ERRORS ---

#[derive(Error, Debug)]
pub enum PrismError {
    #[error("no usable API key for provider '{0}'")]
    MissingCredential(Provider),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("{0} provider error: {1}")]
    Provider(Provider, String),

    #[error("no adapter configured for provider '{0}'")]
    UnsupportedProvider(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

/// An error plus the span trace captured where it was observed.
#[derive(Debug)]
pub struct ObservedError {
    pub inner: PrismError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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
    E: Into<PrismError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, msg, code) = match &self.inner {
            PrismError::MissingCredential(_) => (
                StatusCode::UNAUTHORIZED,
                self.inner.to_string(),
                "MISSING_CREDENTIAL",
            ),
            PrismError::UnknownModel(_) => (
                StatusCode::BAD_REQUEST,
                self.inner.to_string(),
                "UNKNOWN_MODEL",
            ),
            PrismError::InvalidRequest(m) => (StatusCode::BAD_REQUEST, m.clone(), "INVALID_REQUEST"),
            PrismError::Provider(_, _) => (
                StatusCode::BAD_GATEWAY,
                self.inner.to_string(),
                "PROVIDER_ERROR",
            ),
            PrismError::Network(e) => (StatusCode::BAD_GATEWAY, e.to_string(), "NETWORK_ERROR"),
            PrismError::UnsupportedProvider(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.inner.to_string(),
                "UNSUPPORTED_PROVIDER",
            ),
            PrismError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "DATABASE_ERROR",
            ),
            PrismError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "SERIALIZATION_ERROR",
            ),
            PrismError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "IO_ERROR"),
            PrismError::Internal(m, _) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                m.clone(),
                "INTERNAL_ERROR",
            ),
        };
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

pub type Result<T> = std::result::Result<T, ObservedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_serializes_with_type_tag() {
        let ev = StreamEvent::Text {
            delta: "hello".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["delta"], "hello");

        let ev = StreamEvent::ToolCall(ToolCall {
            id: Some("call_1".into()),
            name: "web_search".into(),
            args: serde_json::json!({ "query": "rust" }),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "web_search");
    }

    #[test]
    fn role_round_trips_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"data\"").unwrap();
        assert_eq!(role, Role::Data);
    }
}
