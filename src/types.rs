use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

/// Identifier shared by every envelope of one request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        prefix_chars(&self.0, 8)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl ConversationId {
    pub fn short(&self) -> &str {
        prefix_chars(&self.0, 6)
    }
}

/// Returns a prefix of at most `max_chars` characters, respecting UTF-8 boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document error: {0}")]
    Document(#[from] zip::result::ZipError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl ConduitError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into(), SpanTrace::capture())
    }

    fn status_and_code(&self) -> (axum::http::StatusCode, &'static str) {
        use axum::http::StatusCode;
        match self {
            Self::Upstream(s, _) => (*s, "UPSTREAM_ERROR"),
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Protocol(_) => (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR"),
            Self::Network(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            Self::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Self::Document(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DOCUMENT_ERROR"),
            Self::Internal(_, _) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.inner.status_and_code();
        let msg = match &self.inner {
            ConduitError::Upstream(_, body) => body.clone(),
            ConduitError::InvalidRequest(m)
            | ConduitError::NotFound(m)
            | ConduitError::Configuration(m)
            | ConduitError::Protocol(m)
            | ConduitError::Internal(m, _) => m.clone(),
            other => other.to_string(),
        };
        (
            status,
            axum::Json(serde_json::json!({
                "error": msg,
                "code": code,
                "span_trace": self.span_trace.to_string(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ConduitError,
    pub span_trace: SpanTrace,
}

impl ObservedError {
    pub fn status(&self) -> axum::http::StatusCode {
        self.inner.status_and_code().0
    }
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ConduitError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- INBOUND CHAT REQUEST ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Function => "function",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ConduitError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            "function" => Ok(Role::Function),
            other => Err(ConduitError::Protocol(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Set by the frontend on assistant messages; carries the correlation id of the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A caller selection that arrives either as a comma-separated string or as a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Selection {
    One(String),
    Many(Vec<String>),
}

impl Selection {
    pub fn items(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Selection::One(s) => s.split(',').collect(),
            Selection::Many(v) => v.iter().map(|s| s.as_str()).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "empty_object")]
    pub history_metadata: serde_json::Value,
    #[serde(default, rename = "selectedItems")]
    pub selected_items: Option<Selection>,
    #[serde(default, rename = "selectedTemplates")]
    pub selected_templates: Option<Selection>,
    #[serde(default, rename = "selectedGPTVersion")]
    pub selected_gpt_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(ConduitError::InvalidRequest("messages must not be empty".to_string()).into());
        }
        if !self.history_metadata.is_object() {
            return Err(ConduitError::InvalidRequest(
                "history_metadata must be an object".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_accepts_string_and_list() {
        let one: Selection = serde_json::from_str(r#""a.docx, b.docx,""#).unwrap();
        assert_eq!(one.items(), vec!["a.docx", "b.docx"]);

        let many: Selection = serde_json::from_str(r#"["x.docx", " y.docx "]"#).unwrap();
        assert_eq!(many.items(), vec!["x.docx", "y.docx"]);
    }

    #[test]
    fn chat_request_defaults_history_metadata() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(req.history_metadata.as_object().is_some_and(|m| m.is_empty()));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn empty_messages_are_rejected() {
        let req: ChatRequest = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        match req.validate() {
            Err(e) => assert!(matches!(e.inner, ConduitError::InvalidRequest(_))),
            Ok(_) => panic!("expected validation failure"),
        }
    }

    #[test]
    fn prefix_chars_respects_boundaries() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("ab", 8), "ab");
    }
}
