use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::TERMINAL_SENTINEL;

/// --- CANONICAL FRONTEND SCHEMA ---
///
/// The only shapes the chat UI ever receives, whatever the upstream mode.

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FragmentRole {
    Tool,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageFragment {
    pub role: FragmentRole,
    pub content: String,
}

impl MessageFragment {
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: FragmentRole::Tool,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: FragmentRole::Assistant,
            content: content.into(),
        }
    }

    /// Empty assistant fragment that tells the UI a new assistant message starts.
    pub fn role_announcement() -> Self {
        Self::assistant("")
    }

    pub fn sentinel() -> Self {
        Self::assistant(TERMINAL_SENTINEL)
    }

    pub fn is_sentinel(&self) -> bool {
        self.role == FragmentRole::Assistant && self.content == TERMINAL_SENTINEL
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeChoice {
    pub messages: Vec<MessageFragment>,
}

/// Metadata copied verbatim from the upstream payload that produced an envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passthrough {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub object: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub object: String,
    pub choices: Vec<EnvelopeChoice>,
    #[serde(
        rename = "apim-request-id",
        alias = "apim_request_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub apim_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub history_metadata: Value,
}

impl ResponseEnvelope {
    /// Builds an envelope with exactly one choice holding `messages`.
    pub fn new(meta: Passthrough, messages: Vec<MessageFragment>) -> Self {
        Self {
            id: meta.id,
            model: meta.model,
            created: meta.created,
            object: meta.object,
            choices: vec![EnvelopeChoice { messages }],
            apim_request_id: None,
            history_metadata: Value::Null,
        }
    }

    pub fn fragments(&self) -> &[MessageFragment] {
        match self.choices.first() {
            Some(choice) => &choice.messages,
            None => &[],
        }
    }

    pub fn with_correlation(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_history_metadata(mut self, history_metadata: &Value) -> Self {
        self.history_metadata = history_metadata.clone();
        self
    }

    pub fn with_apim_request_id(mut self, apim_request_id: Option<&str>) -> Self {
        self.apim_request_id = apim_request_id.map(str::to_string);
        self
    }
}

/// `{"error": <payload>}`, forwarded without any other transformation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: Value,
}

impl ErrorEnvelope {
    pub fn new(error: Value) -> Self {
        Self { error }
    }

    /// Synthetic error for failures raised locally rather than by the upstream.
    pub fn local(code: &str, message: impl std::fmt::Display) -> Self {
        Self {
            error: serde_json::json!({
                "code": code,
                "message": message.to_string(),
            }),
        }
    }
}

pub fn format_as_ndjson<T: Serialize>(item: &T) -> serde_json::Result<bytes::Bytes> {
    let mut buf = serde_json::to_vec(item)?;
    buf.push(b'\n');
    Ok(bytes::Bytes::from(buf))
}
