use serde::Serialize;

use crate::constants::{GPT3_LABEL, GPT4_LABEL, LEGACY_PREVIEW_API_VERSION};
use crate::identity::GroupResolver;
use crate::settings::{parse_multi_columns, DeploymentProfile, Settings};
use crate::specs::extensions::{
    CosmosParameters, DataSource, EmbeddingParameters, ExtensionsRequest, FieldsMapping,
    SearchParameters,
};
use crate::specs::openai::{ChatCompletionRequest, OpenAiMessage};
use crate::types::{ChatMessage, ChatRequest, ConduitError, Result, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationMode {
    Retrieval,
    FunctionCalling,
    Plain,
}

/// Wire format of the extensions API, keyed by `AZURE_OPENAI_PREVIEW_API_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    Legacy,
    Current,
}

impl ProtocolVersion {
    pub fn from_api_version(version: &str) -> Self {
        if version == LEGACY_PREVIEW_API_VERSION {
            ProtocolVersion::Legacy
        } else {
            ProtocolVersion::Current
        }
    }
}

/// Deployment resolved for one request. Never stored outside the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub label: String,
    pub name: String,
    pub model_name: Option<String>,
    pub base_url: String,
    pub api_key: String,
}

impl Deployment {
    fn from_profile(label: &str, profile: &DeploymentProfile) -> Option<Self> {
        Some(Self {
            label: label.to_string(),
            name: profile.deployment.clone()?,
            model_name: profile.model_name.clone(),
            base_url: profile.base_url()?,
            api_key: profile.key.clone()?,
        })
    }

    pub fn extensions_url(&self, api_version: &str) -> String {
        format!(
            "{}openai/deployments/{}/extensions/chat/completions?api-version={}",
            self.base_url, self.name, api_version
        )
    }

    pub fn chat_url(&self, api_version: &str) -> String {
        format!(
            "{}openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, self.name, api_version
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpstreamBody {
    Extensions(ExtensionsRequest),
    Chat(ChatCompletionRequest),
}

/// Everything the upstream client and the multiplexer need for one request.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub mode: GenerationMode,
    pub protocol: ProtocolVersion,
    pub deployment: Deployment,
    pub url: String,
    pub stream: bool,
    pub body: UpstreamBody,
}

/// Picks the deployment named by `selectedGPTVersion`. A missing label means GPT 3.5.
pub fn select_deployment(settings: &Settings, label: Option<&str>) -> Result<Deployment> {
    let label = label.unwrap_or(GPT3_LABEL);
    let primary = Deployment::from_profile("primary", &settings.primary);

    let profile = match label {
        GPT3_LABEL => Some(&settings.gpt3),
        GPT4_LABEL => Some(&settings.gpt4),
        _ => None,
    };

    if let Some(deployment) = profile.and_then(|p| Deployment::from_profile(label, p)) {
        return Ok(deployment);
    }

    match primary {
        Some(deployment) => {
            if profile.is_some() {
                tracing::warn!(
                    label = %label,
                    deployment = %deployment.name,
                    "Deployment profile not configured; using primary deployment"
                );
            }
            Ok(deployment)
        }
        None => Err(ConduitError::Configuration(
            "AZURE_OPENAI_MODEL, AZURE_OPENAI_KEY and AZURE_OPENAI_ENDPOINT or AZURE_OPENAI_RESOURCE must be set"
                .to_string(),
        )
        .into()),
    }
}

pub fn select_mode(settings: &Settings) -> GenerationMode {
    if settings.search.is_complete() || settings.mongo.is_complete() {
        GenerationMode::Retrieval
    } else if settings.features.use_function {
        GenerationMode::FunctionCalling
    } else {
        GenerationMode::Plain
    }
}

pub fn acl_filter(column: &str, group_ids: &[String]) -> String {
    format!("{}/any(g:search.in(g, '{}'))", column, group_ids.join(", "))
}

pub fn file_filter(field: &str, files: &[String]) -> Option<String> {
    if files.is_empty() {
        return None;
    }
    let clauses: Vec<String> = files
        .iter()
        .map(|f| format!("{} eq '{}'", field, f.replace('\'', "''")))
        .collect();
    Some(clauses.join(" OR "))
}

pub fn combine_filters(acl: Option<String>, files: Option<String>) -> Option<String> {
    match (acl, files) {
        (Some(acl), Some(files)) => Some(format!("{} AND ({})", acl, files)),
        (Some(acl), None) => Some(acl),
        (None, files) => files,
    }
}

fn columns(raw: &Option<String>) -> Vec<String> {
    match raw {
        Some(c) => parse_multi_columns(c),
        None => Vec::new(),
    }
}

fn embedding_for(settings: &Settings, query_type: &str) -> EmbeddingParameters {
    if !query_type.to_lowercase().contains("vector") {
        return EmbeddingParameters::default();
    }
    match &settings.embedding.deployment_name {
        Some(name) => EmbeddingParameters {
            embedding_deployment_name: Some(name.clone()),
            ..Default::default()
        },
        None => EmbeddingParameters {
            embedding_deployment_name: None,
            embedding_endpoint: settings.embedding.endpoint.clone(),
            embedding_key: settings.embedding.key.clone(),
        },
    }
}

async fn build_search_source(
    settings: &Settings,
    request: &ChatRequest,
    access_token: Option<&str>,
    groups: &dyn GroupResolver,
) -> Result<DataSource> {
    let search = &settings.search;
    let (service, index, key) = match (&search.service, &search.index, &search.key) {
        (Some(s), Some(i), Some(k)) => (s, i, k),
        _ => {
            return Err(ConduitError::Configuration(
                "AzureCognitiveSearch requires AZURE_SEARCH_SERVICE, AZURE_SEARCH_INDEX and AZURE_SEARCH_KEY"
                    .to_string(),
            )
            .into())
        }
    };

    let query_type = match &search.query_type {
        Some(q) => q.clone(),
        None if search.use_semantic_search && !search.semantic_search_config.is_empty() => {
            "semantic".to_string()
        }
        None => "simple".to_string(),
    };

    let acl = match &search.permitted_groups_column {
        Some(column) => {
            tracing::debug!(
                token_present = access_token.is_some(),
                "Resolving caller groups for access filter"
            );
            let ids = groups.resolve_groups(access_token.unwrap_or_default()).await;
            Some(acl_filter(column, &ids))
        }
        None => None,
    };
    let selected: Vec<String> = match &request.selected_items {
        Some(sel) => sel.items(),
        None => Vec::new(),
    };
    let filter = combine_filters(acl, file_filter(&search.file_filter_field, &selected));

    Ok(DataSource::AzureCognitiveSearch(SearchParameters {
        endpoint: format!("https://{}.search.windows.net", service),
        key: key.clone(),
        index_name: index.clone(),
        fields_mapping: FieldsMapping {
            content_fields: columns(&search.content_columns),
            title_field: search.title_column.clone(),
            url_field: search.url_column.clone(),
            filepath_field: search.filename_column.clone(),
            vector_fields: columns(&search.vector_columns),
        },
        in_scope: search.enable_in_domain,
        top_n_documents: search.top_k,
        embedding: embedding_for(settings, &query_type),
        query_type,
        semantic_configuration: search.semantic_search_config.clone(),
        role_information: settings.generation.system_message.clone(),
        filter,
        strictness: search.strictness,
    }))
}

fn build_cosmos_source(settings: &Settings) -> Result<DataSource> {
    let mongo = &settings.mongo;
    let (conn, db, container, index) = match (
        &mongo.connection_string,
        &mongo.database,
        &mongo.container,
        &mongo.index,
    ) {
        (Some(c), Some(d), Some(k), Some(i)) => (c, d, k, i),
        _ => {
            return Err(ConduitError::Configuration(
                "AzureCosmosDB requires the AZURE_COSMOSDB_MONGO_VCORE connection string, database, container and index"
                    .to_string(),
            )
            .into())
        }
    };
    let query_type = "vector";

    Ok(DataSource::AzureCosmosDB(CosmosParameters {
        connection_string: conn.clone(),
        index_name: index.clone(),
        database_name: db.clone(),
        container_name: container.clone(),
        fields_mapping: FieldsMapping {
            content_fields: columns(&mongo.content_columns),
            title_field: mongo.title_column.clone(),
            url_field: mongo.url_column.clone(),
            filepath_field: mongo.filename_column.clone(),
            vector_fields: columns(&mongo.vector_columns),
        },
        in_scope: mongo.enable_in_domain,
        top_n_documents: mongo.top_k,
        strictness: mongo.strictness,
        query_type: query_type.to_string(),
        role_information: settings.generation.system_message.clone(),
        embedding: embedding_for(settings, query_type),
    }))
}

fn to_wire(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|m| OpenAiMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect()
}

/// Chat completions reject `tool` messages without a matching call id, so the
/// citation messages the frontend echoes back are dropped here.
fn with_system_prompt(system: &str, messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    let mut out = vec![OpenAiMessage {
        role: Role::System.as_str().to_string(),
        content: system.to_string(),
    }];
    out.extend(
        messages
            .iter()
            .filter(|m| m.role != Role::Tool)
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            }),
    );
    out
}

pub async fn plan_request(
    settings: &Settings,
    request: &ChatRequest,
    access_token: Option<&str>,
    groups: &dyn GroupResolver,
) -> Result<RequestPlan> {
    let deployment = select_deployment(settings, request.selected_gpt_version.as_deref())?;
    let mode = select_mode(settings);
    let generation = &settings.generation;

    let (url, protocol, body) = match mode {
        GenerationMode::Retrieval => {
            let source = match settings.datasource_type.as_str() {
                "AzureCognitiveSearch" => {
                    build_search_source(settings, request, access_token, groups).await?
                }
                "AzureCosmosDB" => build_cosmos_source(settings)?,
                "Elasticsearch" => {
                    return Err(ConduitError::Configuration(
                        "DATASOURCE_TYPE Elasticsearch is not supported".to_string(),
                    )
                    .into())
                }
                other => {
                    return Err(ConduitError::Configuration(format!(
                        "DATASOURCE_TYPE is not configured or unknown: {}",
                        other
                    ))
                    .into())
                }
            };
            tracing::debug!(
                datasource = source.kind(),
                filter = source.filter().unwrap_or("none"),
                "Datasource configured"
            );
            let body = ExtensionsRequest {
                messages: to_wire(&request.messages),
                temperature: generation.temperature,
                max_tokens: generation.max_tokens,
                top_p: generation.top_p,
                stop: generation.stop.clone(),
                stream: generation.stream,
                data_sources: vec![source],
            };
            (
                deployment.extensions_url(&generation.preview_api_version),
                ProtocolVersion::from_api_version(&generation.preview_api_version),
                UpstreamBody::Extensions(body),
            )
        }
        GenerationMode::FunctionCalling | GenerationMode::Plain => {
            let functions = mode == GenerationMode::FunctionCalling;
            let system = if functions {
                &generation.function_system_message
            } else {
                &generation.system_message
            };
            let body = ChatCompletionRequest {
                messages: with_system_prompt(system, &request.messages),
                temperature: generation.temperature,
                max_tokens: generation.max_tokens,
                top_p: generation.top_p,
                stop: generation.stop.clone(),
                stream: generation.stream,
                functions: functions.then(crate::functions::definitions),
                function_call: functions.then(|| serde_json::json!("auto")),
            };
            (
                deployment.chat_url(&generation.chat_api_version),
                ProtocolVersion::Current,
                UpstreamBody::Chat(body),
            )
        }
    };

    tracing::info!(
        mode = ?mode,
        protocol = ?protocol,
        deployment = %deployment.name,
        label = %deployment.label,
        stream = generation.stream,
        "Request planned"
    );

    Ok(RequestPlan {
        mode,
        protocol,
        deployment,
        url,
        stream: generation.stream,
        body,
    })
}
