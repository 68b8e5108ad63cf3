use axum::http::StatusCode;
use serde_json::Value;

use crate::constants::{API_KEY_HEADER, APIM_REQUEST_ID_HEADER, USER_AGENT, USER_AGENT_HEADER};
use crate::mode::RequestPlan;
use crate::redaction::redacted_json;
use crate::specs::envelope::ErrorEnvelope;
use crate::types::Result;

/// Decoded reply of a buffered upstream call; the status is mirrored to the caller.
#[derive(Debug, Clone)]
pub struct BufferedReply {
    pub status: StatusCode,
    pub body: Value,
}

fn request(client: &reqwest::Client, plan: &RequestPlan) -> reqwest::RequestBuilder {
    tracing::debug!(url = %plan.url, body = %redacted_json(&plan.body), "Upstream request");
    client
        .post(&plan.url)
        .header(API_KEY_HEADER, &plan.deployment.api_key)
        .header(USER_AGENT_HEADER, USER_AGENT)
        .json(&plan.body)
}

/// One request, body read in full.
pub async fn send_buffered(client: &reqwest::Client, plan: &RequestPlan) -> Result<BufferedReply> {
    let response = request(client, plan).send().await?;
    let status = response.status();
    tracing::info!("[☁️  -> ⚙️ ] Status: {}", status);

    let text = response.text().await?;
    let body = match serde_json::from_str::<Value>(&text) {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Upstream returned a non-JSON body ({} bytes)", text.len());
            serde_json::json!({
                "error": {"code": status.as_u16().to_string(), "message": text}
            })
        }
    };
    Ok(BufferedReply { status, body })
}

/// Opens a chunked response. The caller owns the connection from here on.
pub async fn open_stream(client: &reqwest::Client, plan: &RequestPlan) -> Result<reqwest::Response> {
    let response = request(client, plan).send().await?;
    tracing::info!("[☁️  -> ⚙️ ] Status: {}", response.status());
    Ok(response)
}

pub fn apim_request_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(APIM_REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Turns a non-2xx streaming reply into the single error envelope the caller sees.
pub async fn error_envelope_from(response: reqwest::Response) -> ErrorEnvelope {
    let status = response.status();
    let text = match response.text().await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("Failed to read error body: {}", e);
            format!("Upstream error (body unreadable): {}", e)
        }
    };
    tracing::error!("[☁️  -> ⚙️ ] Upstream Error {}: {}", status, text);
    error_envelope_from_body(status.as_u16(), &text)
}

pub fn error_envelope_from_body(status: u16, text: &str) -> ErrorEnvelope {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) if map.contains_key("error") => {
            ErrorEnvelope::new(map.remove("error").unwrap_or(Value::Null))
        }
        _ => ErrorEnvelope::new(serde_json::json!({
            "code": status.to_string(),
            "message": text,
        })),
    }
}
