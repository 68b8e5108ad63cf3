use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::constants::AAD_ACCESS_TOKEN_HEADER;
use crate::functions::FunctionRuntime;
use crate::mode::{plan_request, GenerationMode, ProtocolVersion, RequestPlan};
use crate::normalizer::{
    normalize_chat_completion, normalize_extension_completion, FunctionSignal, Normalized,
    StreamKind,
};
use crate::specs::envelope::{ErrorEnvelope, MessageFragment, ResponseEnvelope};
use crate::streaming::{StreamHandler, StreamSession};
use crate::types::{ChatRequest, ConduitError, CorrelationId, ObservedError, Result};
use crate::AppState;

pub async fn conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    request.validate()?;
    conversation_internal(&state, &headers, request).await
}

/// Shared by `/conversation` and `/history/generate`.
pub async fn conversation_internal(
    state: &AppState,
    headers: &HeaderMap,
    request: ChatRequest,
) -> Result<Response> {
    let correlation = CorrelationId::new();
    let access_token = headers
        .get(AAD_ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    let plan = plan_request(&state.settings, &request, access_token, state.groups.as_ref()).await?;
    tracing::info!(
        correlation = %correlation.short(),
        messages = request.messages.len(),
        "[⚙️  -> ☁️ ] Conversation request"
    );

    let functions = (plan.mode == GenerationMode::FunctionCalling).then(|| {
        FunctionRuntime::new(
            state.documents.clone(),
            &state.settings.storage,
            selection(&request.selected_templates),
            selection(&request.selected_items),
        )
    });
    let kind = match plan.mode {
        GenerationMode::Retrieval => StreamKind::Extensions(plan.protocol),
        GenerationMode::FunctionCalling | GenerationMode::Plain => StreamKind::Chat,
    };
    let session = StreamSession {
        correlation,
        history_metadata: request.history_metadata.clone(),
        kind,
        functions,
    };

    if plan.stream {
        return Ok(StreamHandler::respond(state.client.clone(), plan, session));
    }
    buffered(state, &plan, &session).await
}

fn selection(sel: &Option<crate::types::Selection>) -> Vec<String> {
    match sel {
        Some(s) => s.items(),
        None => Vec::new(),
    }
}

async fn buffered(state: &AppState, plan: &RequestPlan, session: &StreamSession) -> Result<Response> {
    let reply = crate::upstream::send_buffered(&state.client, plan).await?;

    if plan.mode == GenerationMode::Retrieval && plan.protocol == ProtocolVersion::Legacy {
        let mut body = reply.body;
        if let Value::Object(map) = &mut body {
            map.insert("history_metadata".to_string(), session.history_metadata.clone());
        }
        return Ok((reply.status, Json(body)).into_response());
    }

    let normalized = match plan.mode {
        GenerationMode::Retrieval => normalize_extension_completion(&reply.body)?,
        GenerationMode::FunctionCalling | GenerationMode::Plain => {
            normalize_chat_completion(&reply.body)?
        }
    };

    match normalized {
        Normalized::Envelope(envelope) => {
            Ok(json_response(reply.status, &session.stamp(envelope, None)))
        }
        Normalized::UpstreamError(error) => {
            tracing::error!("[☁️  -> ⚙️ ] Upstream error: {}", error.error);
            Ok(json_response(reply.status, &error))
        }
        Normalized::Function {
            signal: FunctionSignal::Call { name, arguments },
            meta,
        } => {
            let runtime = session.functions.as_ref().ok_or_else(|| {
                ConduitError::Protocol(format!("unexpected function call '{}'", name))
            })?;
            match runtime.invoke(&name, &arguments).await {
                Ok(text) => {
                    let envelope = ResponseEnvelope::new(meta, vec![MessageFragment::assistant(text)]);
                    Ok(json_response(reply.status, &session.stamp(envelope, None)))
                }
                Err(e) => {
                    tracing::error!(function = %name, "Function failed: {}", e);
                    Ok(json_response(e.status(), &ErrorEnvelope::local("function_error", &e)))
                }
            }
        }
        other => Err(ConduitError::Protocol(format!("unusable buffered response: {:?}", other)).into()),
    }
}

fn json_response<T: Serialize>(status: axum::http::StatusCode, body: &T) -> Response {
    match serde_json::to_value(body) {
        Ok(v) => (status, Json(v)).into_response(),
        Err(e) => ObservedError::from(e).into_response(),
    }
}

#[derive(Serialize)]
pub struct FrontendSettings {
    pub auth_enabled: bool,
    pub feedback_enabled: bool,
}

pub async fn frontend_settings(State(state): State<Arc<AppState>>) -> Json<FrontendSettings> {
    Json(FrontendSettings {
        auth_enabled: state.settings.features.auth_enabled,
        feedback_enabled: state.settings.feedback_enabled() && state.history.is_some(),
    })
}
