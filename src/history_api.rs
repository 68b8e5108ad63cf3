use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::{HISTORY_PAGE_SIZE, TERMINAL_SENTINEL};
use crate::conversation::conversation_internal;
use crate::history::{Conversation, ConversationStore};
use crate::identity::authenticated_user;
use crate::mode::select_deployment;
use crate::title::generate_title;
use crate::types::{ChatMessage, ChatRequest, ConduitError, ConversationId, Result, Role};
use crate::AppState;

const NOT_CONFIGURED: &str = "conversation history is not configured";

fn store(state: &AppState) -> Result<&ConversationStore> {
    match &state.history {
        Some(s) => Ok(s),
        None => Err(ConduitError::Configuration(NOT_CONFIGURED.to_string()).into()),
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => Err(ConduitError::InvalidRequest(format!("{} is required", what)).into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationRef {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message_feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReadMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub conversation_id: String,
    pub messages: Vec<ReadMessage>,
}

/// Persists the user turn (creating and titling the conversation on first
/// use), then answers it like `/conversation`.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut request): Json<ChatRequest>,
) -> Result<Response> {
    request.validate()?;
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let mut history_metadata = Map::new();

    let conversation_id = match request.conversation_id.clone().filter(|id| !id.is_empty()) {
        Some(id) => ConversationId(id),
        None => {
            let deployment = select_deployment(&state.settings, request.selected_gpt_version.as_deref())?;
            let title = generate_title(
                &state.client,
                &deployment,
                &state.settings.generation.chat_api_version,
                &request.messages,
            )
            .await;
            let conversation = store.create_conversation(&user, &title).await?;
            history_metadata.insert("title".to_string(), Value::String(title));
            history_metadata.insert("date".to_string(), Value::String(conversation.created_at));
            ConversationId(conversation.id)
        }
    };

    let last = match request.last_message() {
        Some(m) if m.role == Role::User => m.clone(),
        _ => return Err(ConduitError::InvalidRequest("No user message found".to_string()).into()),
    };
    let message_id = uuid::Uuid::new_v4().to_string();
    if store
        .create_message(&message_id, &conversation_id, &user, &last)
        .await?
        .is_none()
    {
        return Err(ConduitError::NotFound(format!(
            "Conversation not found for the given conversation ID: {}",
            conversation_id.0
        ))
        .into());
    }

    tracing::info!(conversation = %conversation_id.short(), "User message stored");
    history_metadata.insert("conversation_id".to_string(), Value::String(conversation_id.0));
    request.history_metadata = Value::Object(history_metadata);
    conversation_internal(&state, &headers, request).await
}

/// Persists the assistant turn the frontend assembled from the stream.
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Value>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversation_id = ConversationId(required(request.conversation_id, "conversation_id")?);

    let assistant = match request.messages.last() {
        Some(m) if m.role == Role::Assistant => m,
        _ => return Err(ConduitError::InvalidRequest("No bot messages found".to_string()).into()),
    };

    let count = request.messages.len();
    if count > 1 && request.messages[count - 2].role == Role::Tool {
        let tool = &request.messages[count - 2];
        let id = uuid::Uuid::new_v4().to_string();
        store.create_message(&id, &conversation_id, &user, tool).await?;
    }

    let message_id = match &assistant.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            tracing::warn!("Assistant message arrived without an id");
            uuid::Uuid::new_v4().to_string()
        }
    };
    let cleaned = ChatMessage {
        role: Role::Assistant,
        content: strip_sentinel(&assistant.content),
        id: None,
    };
    match store.create_message(&message_id, &conversation_id, &user, &cleaned).await? {
        Some(_) => Ok(Json(json!({ "success": true }))),
        None => Err(ConduitError::NotFound(format!(
            "Conversation not found for the given conversation ID: {}",
            conversation_id.0
        ))
        .into()),
    }
}

/// The stream's terminal sentinel reaches the frontend as text; it is not part of the answer.
///
/// Only one trailing sentinel is removed.
pub fn strip_sentinel(content: &str) -> String {
    content
        .strip_suffix(TERMINAL_SENTINEL)
        .unwrap_or(content)
        .to_string()
}

pub async fn message_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Value>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let message_id = required(request.message_id, "message_id")?;
    let feedback = required(request.message_feedback, "message_feedback")?;

    match store.update_message_feedback(&user, &message_id, &feedback).await? {
        Some(_) => Ok(Json(json!({
            "message": format!("Successfully updated message with feedback {}", feedback),
            "message_id": message_id,
        }))),
        None => Err(ConduitError::NotFound(format!(
            "Unable to update message {}. It either does not exist or the user does not have access to it.",
            message_id
        ))
        .into()),
    }
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConversationRef>,
) -> Result<Json<Value>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversation_id = ConversationId(required(request.conversation_id, "conversation_id")?);

    let removed = store.delete_messages(&conversation_id, &user).await?;
    store.delete_conversation(&user, &conversation_id).await?;
    tracing::info!(conversation = %conversation_id.short(), messages = removed, "Conversation deleted");

    Ok(Json(json!({
        "message": "Successfully deleted conversation and messages",
        "conversation_id": conversation_id.0,
    })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Conversation>>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversations = store
        .get_conversations(&user, Some(HISTORY_PAGE_SIZE), params.offset.unwrap_or(0))
        .await?;
    Ok(Json(conversations))
}

pub async fn read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConversationRef>,
) -> Result<Json<ReadResponse>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversation_id = ConversationId(required(request.conversation_id, "conversation_id")?);

    if store.get_conversation(&user, &conversation_id).await?.is_none() {
        return Err(ConduitError::NotFound(format!(
            "Conversation {} was not found. It either does not exist or the logged in user does not have access to it.",
            conversation_id.0
        ))
        .into());
    }

    let messages = store
        .get_messages(&user, &conversation_id)
        .await?
        .into_iter()
        .map(|m| ReadMessage {
            id: m.id,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
            feedback: m.feedback,
        })
        .collect();

    Ok(Json(ReadResponse {
        conversation_id: conversation_id.0,
        messages,
    }))
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConversationRef>,
) -> Result<Json<Conversation>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversation_id = ConversationId(required(request.conversation_id, "conversation_id")?);

    let mut conversation = match store.get_conversation(&user, &conversation_id).await? {
        Some(c) => c,
        None => {
            return Err(ConduitError::NotFound(format!(
                "Conversation {} was not found. It either does not exist or the logged in user does not have access to it.",
                conversation_id.0
            ))
            .into())
        }
    };
    conversation.title = required(request.title, "title")?;

    let updated = store.upsert_conversation(&conversation).await?;
    Ok(Json(updated))
}

pub async fn delete_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();

    let conversations = store.get_conversations(&user, None, 0).await?;
    if conversations.is_empty() {
        return Err(ConduitError::NotFound(format!("No conversations for {} were found", user.0)).into());
    }

    for conversation in &conversations {
        let id = ConversationId(conversation.id.clone());
        store.delete_messages(&id, &user).await?;
        store.delete_conversation(&user, &id).await?;
    }
    tracing::info!(count = conversations.len(), "All conversations deleted");

    Ok(Json(json!({
        "message": format!("Successfully deleted conversation and messages for user {}", user.0),
    })))
}

pub async fn clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConversationRef>,
) -> Result<Json<Value>> {
    let store = store(&state)?;
    let user = authenticated_user(&headers).user_id();
    let conversation_id = ConversationId(required(request.conversation_id, "conversation_id")?);

    store.delete_messages(&conversation_id, &user).await?;
    Ok(Json(json!({
        "message": "Successfully deleted messages in conversation",
        "conversation_id": conversation_id.0,
    })))
}

pub async fn ensure(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let store = match &state.history {
        Some(s) => s,
        None => return (StatusCode::NOT_FOUND, Json(json!({ "error": NOT_CONFIGURED }))),
    };

    match store.ensure().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "conversation history is configured and working" })),
        ),
        Err(e) => {
            tracing::error!("Conversation history check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "conversation history is not working" })),
            )
        }
    }
}
