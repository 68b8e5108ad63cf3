use serde::Deserialize;

use crate::constants::{API_KEY_HEADER, TITLE_MAX_TOKENS, TITLE_PROMPT, USER_AGENT, USER_AGENT_HEADER};
use crate::mode::Deployment;
use crate::specs::openai::{ChatCompletionRequest, OpenAiMessage, RawCompletion};
use crate::types::{ChatMessage, ConduitError, Result, Role};

#[derive(Debug, Deserialize)]
struct TitleReply {
    title: String,
}

/// Summarizes a conversation into a short title. Never fails: any problem
/// falls back to the content of the last inbound message.
pub async fn generate_title(
    client: &reqwest::Client,
    deployment: &Deployment,
    api_version: &str,
    messages: &[ChatMessage],
) -> String {
    let fallback = messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    match request_title(client, deployment, api_version, messages).await {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!("Title generation failed, using last message: {}", e);
            fallback
        }
    }
}

async fn request_title(
    client: &reqwest::Client,
    deployment: &Deployment,
    api_version: &str,
    messages: &[ChatMessage],
) -> Result<String> {
    let mut wire: Vec<OpenAiMessage> = messages
        .iter()
        .filter(|m| m.role != Role::Tool)
        .map(|m| OpenAiMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect();
    wire.push(OpenAiMessage {
        role: Role::User.as_str().to_string(),
        content: TITLE_PROMPT.to_string(),
    });

    let body = ChatCompletionRequest {
        messages: wire,
        temperature: 1.0,
        max_tokens: TITLE_MAX_TOKENS,
        top_p: 1.0,
        stop: None,
        stream: false,
        functions: None,
        function_call: None,
    };

    let response = client
        .post(deployment.chat_url(api_version))
        .header(API_KEY_HEADER, &deployment.api_key)
        .header(USER_AGENT_HEADER, USER_AGENT)
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ConduitError::Upstream(status, text).into());
    }

    let completion: RawCompletion = response.json().await?;
    let content = completion
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.clone())
        .ok_or_else(|| ConduitError::Protocol("title reply has no content".to_string()))?;
    parse_title(&content)
}

pub fn parse_title(content: &str) -> Result<String> {
    let reply: TitleReply = serde_json::from_str(content.trim())?;
    let title = reply.title.trim();
    if title.is_empty() {
        return Err(ConduitError::Protocol("empty title".to_string()).into());
    }
    Ok(title.to_string())
}
