use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::constants::{
    AAD_ID_TOKEN_HEADER, CLIENT_PRINCIPAL_HEADER, DEVELOPMENT_PRINCIPAL_ID,
    DEVELOPMENT_PRINCIPAL_NAME, PRINCIPAL_ID_HEADER, PRINCIPAL_IDP_HEADER, PRINCIPAL_NAME_HEADER,
};
use crate::types::UserId;

/// Principal injected by the hosting platform's auth proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_principal_id: String,
    pub user_name: String,
    pub auth_provider: Option<String>,
    pub auth_token: Option<String>,
    pub client_principal_b64: Option<String>,
    pub aad_id_token: Option<String>,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> UserId {
        UserId(self.user_principal_id.clone())
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Without a principal id header the request did not pass the auth proxy;
/// treat it as the local development user.
pub fn authenticated_user(headers: &HeaderMap) -> AuthenticatedUser {
    match header(headers, PRINCIPAL_ID_HEADER) {
        Some(id) => AuthenticatedUser {
            user_principal_id: id,
            user_name: header(headers, PRINCIPAL_NAME_HEADER).unwrap_or_default(),
            auth_provider: header(headers, PRINCIPAL_IDP_HEADER),
            auth_token: header(headers, AAD_ID_TOKEN_HEADER),
            client_principal_b64: header(headers, CLIENT_PRINCIPAL_HEADER),
            aad_id_token: header(headers, AAD_ID_TOKEN_HEADER),
        },
        None => {
            tracing::debug!("No principal headers; using development principal");
            AuthenticatedUser {
                user_principal_id: DEVELOPMENT_PRINCIPAL_ID.to_string(),
                user_name: DEVELOPMENT_PRINCIPAL_NAME.to_string(),
                auth_provider: Some("aad".to_string()),
                auth_token: None,
                client_principal_b64: None,
                aad_id_token: None,
            }
        }
    }
}

/// Resolves a bearer token to the ids of every group the caller belongs to.
///
/// Implementations never fail: lookup problems degrade to whatever was collected.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn resolve_groups(&self, token: &str) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
struct GroupPage {
    #[serde(default)]
    value: Vec<GroupEntry>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    id: String,
}

/// Microsoft Graph `transitiveMemberOf`, following `@odata.nextLink` until exhausted.
pub struct GraphGroupResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphGroupResolver {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch_page(&self, url: &str, token: &str) -> crate::types::Result<GroupPage> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("bearer {}", token))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::types::ConduitError::Upstream(status, body).into());
        }
        Ok(response.json::<GroupPage>().await?)
    }
}

#[async_trait]
impl GroupResolver for GraphGroupResolver {
    async fn resolve_groups(&self, token: &str) -> Vec<String> {
        let mut groups = Vec::new();
        let mut next = Some(format!(
            "{}/me/transitiveMemberOf?$select=id",
            self.endpoint.trim_end_matches('/')
        ));
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            match self.fetch_page(&url, token).await {
                Ok(page) => {
                    pages += 1;
                    groups.extend(page.value.into_iter().map(|g| g.id));
                    next = page.next_link;
                }
                Err(e) => {
                    tracing::error!(
                        pages_read = pages,
                        groups_kept = groups.len(),
                        "Error fetching user groups: {}",
                        e
                    );
                    break;
                }
            }
        }

        if groups.is_empty() {
            tracing::debug!("No user groups found");
        }
        groups
    }
}

/// Resolver for deployments without access-control filtering.
pub struct NoGroups;

#[async_trait]
impl GroupResolver for NoGroups {
    async fn resolve_groups(&self, _token: &str) -> Vec<String> {
        Vec::new()
    }
}
