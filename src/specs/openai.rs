use serde::{Deserialize, Serialize};

/// --- AZURE OPENAI CHAT COMPLETIONS SCHEMA ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<OpenAiMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// --- RESPONSE WIRE TYPES (buffered and streamed) ---
///
/// Every field is defaulted: upstream chunks routinely omit metadata.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub choices: Vec<RawChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChoice {
    #[serde(default)]
    pub delta: Option<RawDelta>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    /// Legacy preview shape: `choices[0].messages[0].delta`.
    #[serde(default)]
    pub messages: Vec<RawLegacyMessage>,
    #[serde(default)]
    pub end_turn: Option<bool>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub context: Option<RawContext>,
    #[serde(default)]
    pub function_call: Option<RawFunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub context: Option<RawContext>,
    #[serde(default)]
    pub function_call: Option<RawFunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContext {
    #[serde(default)]
    pub messages: Vec<RawContextMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContextMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLegacyMessage {
    #[serde(default)]
    pub delta: RawLegacyDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLegacyDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RawFunctionCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}
