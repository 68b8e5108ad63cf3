//! Maps raw upstream payloads onto the canonical frontend envelope.
//!
//! Everything here is pure: one JSON object in, at most one outcome out.

use serde::Deserialize;
use serde_json::Value;

use crate::constants::{DATA_PREFIX, TERMINAL_SENTINEL};
use crate::mode::ProtocolVersion;
use crate::specs::envelope::{ErrorEnvelope, MessageFragment, Passthrough, ResponseEnvelope};
use crate::specs::openai::{RawChoice, RawCompletion, RawFunctionCall};
use crate::types::{ConduitError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyLine,
    DoneMarker,
    Malformed(String),
    NoChoices,
    EmptyDelta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionSignal {
    /// Streamed piece of a function call; either half may be absent.
    Fragment {
        name: Option<String>,
        arguments: Option<String>,
    },
    /// The model finished describing the call and expects its result.
    Invoke,
    /// Complete call from a buffered response.
    Call { name: String, arguments: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Envelope(ResponseEnvelope),
    UpstreamError(ErrorEnvelope),
    Function {
        signal: FunctionSignal,
        meta: Passthrough,
    },
    Skip(SkipReason),
}

/// Which upstream API a stream comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Extensions(ProtocolVersion),
    Chat,
}

/// Classification of one retrieval-augmented streaming delta.
///
/// Variants are listed in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionDelta {
    Citations(String),
    RoleAnnouncement,
    EndOfTurn,
    Content(String),
}

impl ExtensionDelta {
    pub fn classify(choice: &RawChoice) -> Self {
        let delta = choice.delta.clone().unwrap_or_default();

        if let Some(first) = delta.context.as_ref().and_then(|c| c.messages.first()) {
            return ExtensionDelta::Citations(first.content.clone());
        }
        if delta.role.as_deref().is_some_and(|r| !r.is_empty()) {
            return ExtensionDelta::RoleAnnouncement;
        }
        if choice.end_turn == Some(true) {
            return ExtensionDelta::EndOfTurn;
        }
        ExtensionDelta::Content(delta.content.unwrap_or_default())
    }

    pub fn into_fragment(self) -> MessageFragment {
        match self {
            ExtensionDelta::Citations(text) => MessageFragment::tool(text),
            ExtensionDelta::RoleAnnouncement => MessageFragment::role_announcement(),
            ExtensionDelta::EndOfTurn => MessageFragment::sentinel(),
            ExtensionDelta::Content(text) => MessageFragment::assistant(text),
        }
    }
}

/// Classification of one plain chat-completions streaming chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    FunctionCall(RawFunctionCall),
    RoleAnnouncement,
    Finished(String),
    Content(String),
    Empty,
}

impl ChatDelta {
    pub fn classify(choice: &RawChoice) -> Self {
        let delta = choice.delta.clone().unwrap_or_default();
        let content = delta.content.filter(|c| !c.is_empty());

        // Azure puts the role on the same chunk as the function name.
        if let Some(call) = delta.function_call {
            return ChatDelta::FunctionCall(call);
        }
        match (delta.role, choice.finish_reason.clone(), content) {
            (_, _, Some(text)) => ChatDelta::Content(text),
            (Some(_), _, None) => ChatDelta::RoleAnnouncement,
            (None, Some(reason), None) => ChatDelta::Finished(reason),
            (None, None, None) => ChatDelta::Empty,
        }
    }
}

/// Strips SSE framing and decodes one upstream line.
pub fn parse_frame(line: &str) -> std::result::Result<Value, SkipReason> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(SkipReason::EmptyLine);
    }
    let data = match trimmed.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.trim_start(),
        None => trimmed,
    };
    if data == TERMINAL_SENTINEL {
        return Err(SkipReason::DoneMarker);
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err(SkipReason::Malformed("frame is not a JSON object".to_string())),
        Err(e) => Err(SkipReason::Malformed(e.to_string())),
    }
}

fn upstream_error(raw: &Value) -> Option<ErrorEnvelope> {
    raw.get("error").map(|e| ErrorEnvelope::new(e.clone()))
}

fn decode(raw: &Value) -> std::result::Result<RawCompletion, SkipReason> {
    RawCompletion::deserialize(raw).map_err(|e| SkipReason::Malformed(e.to_string()))
}

fn passthrough(raw: &RawCompletion) -> Passthrough {
    Passthrough {
        id: raw.id.clone(),
        model: raw.model.clone(),
        created: raw.created,
        object: raw.object.clone(),
    }
}

fn single(raw: &RawCompletion, fragment: MessageFragment) -> Normalized {
    Normalized::Envelope(ResponseEnvelope::new(passthrough(raw), vec![fragment]))
}

/// Normalizes one decoded streaming chunk.
pub fn normalize_chunk(raw: &Value, kind: StreamKind) -> Normalized {
    if let Some(err) = upstream_error(raw) {
        return Normalized::UpstreamError(err);
    }
    let chunk = match decode(raw) {
        Ok(c) => c,
        Err(reason) => return Normalized::Skip(reason),
    };
    match kind {
        StreamKind::Extensions(ProtocolVersion::Current) => normalize_extension_chunk(&chunk),
        StreamKind::Extensions(ProtocolVersion::Legacy) => normalize_legacy_chunk(&chunk),
        StreamKind::Chat => normalize_chat_chunk(&chunk),
    }
}

/// Convenience over [`parse_frame`] and [`normalize_chunk`].
pub fn normalize_line(line: &str, kind: StreamKind) -> Normalized {
    match parse_frame(line) {
        Ok(raw) => normalize_chunk(&raw, kind),
        Err(reason) => Normalized::Skip(reason),
    }
}

pub fn normalize_extension_chunk(chunk: &RawCompletion) -> Normalized {
    match chunk.choices.first() {
        Some(choice) => single(chunk, ExtensionDelta::classify(choice).into_fragment()),
        None => Normalized::Skip(SkipReason::NoChoices),
    }
}

/// `2023-06-01-preview`: the chunk already carries `choices[0].messages[0].delta`.
pub fn normalize_legacy_chunk(chunk: &RawCompletion) -> Normalized {
    let delta = match chunk
        .choices
        .first()
        .and_then(|c| c.messages.first())
        .map(|m| &m.delta)
    {
        Some(d) => d,
        None => return Normalized::Skip(SkipReason::NoChoices),
    };
    let content = delta.content.clone().unwrap_or_default();
    let fragment = match delta.role.as_deref() {
        Some("tool") => MessageFragment::tool(content),
        Some("assistant") => MessageFragment::role_announcement(),
        _ => MessageFragment::assistant(content),
    };
    single(chunk, fragment)
}

pub fn normalize_chat_chunk(chunk: &RawCompletion) -> Normalized {
    let choice = match chunk.choices.first() {
        Some(c) => c,
        None => return Normalized::Skip(SkipReason::NoChoices),
    };
    match ChatDelta::classify(choice) {
        ChatDelta::FunctionCall(call) => Normalized::Function {
            signal: FunctionSignal::Fragment {
                name: call.name,
                arguments: call.arguments,
            },
            meta: passthrough(chunk),
        },
        ChatDelta::RoleAnnouncement => single(chunk, MessageFragment::role_announcement()),
        ChatDelta::Finished(reason) if reason == "function_call" => Normalized::Function {
            signal: FunctionSignal::Invoke,
            meta: passthrough(chunk),
        },
        ChatDelta::Finished(_) => single(chunk, MessageFragment::sentinel()),
        ChatDelta::Content(text) => single(chunk, MessageFragment::assistant(text)),
        ChatDelta::Empty => Normalized::Skip(SkipReason::EmptyDelta),
    }
}

/// Buffered retrieval response: citations first, then the whole answer.
pub fn normalize_extension_completion(raw: &Value) -> Result<Normalized> {
    if let Some(err) = upstream_error(raw) {
        return Ok(Normalized::UpstreamError(err));
    }
    let completion = decode(raw).map_err(|r| ConduitError::Protocol(format!("{:?}", r)))?;
    let message = completion
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .ok_or_else(|| ConduitError::Protocol("response has no choices[0].message".to_string()))?;
    let citations = message
        .context
        .as_ref()
        .and_then(|c| c.messages.first())
        .ok_or_else(|| {
            ConduitError::Protocol("response has no message.context.messages[0]".to_string())
        })?;

    Ok(Normalized::Envelope(ResponseEnvelope::new(
        passthrough(&completion),
        vec![
            MessageFragment::tool(citations.content.clone()),
            MessageFragment::assistant(message.content.clone().unwrap_or_default()),
        ],
    )))
}

pub fn normalize_chat_completion(raw: &Value) -> Result<Normalized> {
    if let Some(err) = upstream_error(raw) {
        return Ok(Normalized::UpstreamError(err));
    }
    let completion = decode(raw).map_err(|r| ConduitError::Protocol(format!("{:?}", r)))?;
    let message = completion
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .ok_or_else(|| ConduitError::Protocol("response has no choices[0].message".to_string()))?;

    if let Some(call) = &message.function_call {
        if let Some(name) = &call.name {
            return Ok(Normalized::Function {
                signal: FunctionSignal::Call {
                    name: name.clone(),
                    arguments: call.arguments.clone().unwrap_or_default(),
                },
                meta: passthrough(&completion),
            });
        }
    }

    Ok(single(
        &completion,
        MessageFragment::assistant(message.content.clone().unwrap_or_default()),
    ))
}
