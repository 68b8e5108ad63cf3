use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_CHAT_API_VERSION, DEFAULT_FILENAME_FILTER_FIELD, DEFAULT_FUNCTION_SYSTEM_MESSAGE,
    DEFAULT_GRAPH_ENDPOINT, DEFAULT_PREVIEW_API_VERSION, DEFAULT_SYSTEM_MESSAGE,
};
use crate::types::{ConduitError, Result};

/// One Azure OpenAI deployment target. Fields mirror the `AZURE_OPENAI_*` family,
/// optionally suffixed with `_GPT3` / `_GPT4`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentProfile {
    pub resource: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub model_name: Option<String>,
    pub key: Option<String>,
}

impl DeploymentProfile {
    fn from_lookup<F>(lookup: &F, suffix: &str, default_model_name: Option<&str>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_empty(lookup(&format!("{}{}", name, suffix)));
        Self {
            resource: get("AZURE_OPENAI_RESOURCE"),
            endpoint: get("AZURE_OPENAI_ENDPOINT"),
            deployment: get("AZURE_OPENAI_MODEL"),
            model_name: get("AZURE_OPENAI_MODEL_NAME")
                .or_else(|| default_model_name.map(str::to_string)),
            key: get("AZURE_OPENAI_KEY"),
        }
    }

    /// `AZURE_OPENAI_ENDPOINT` wins; otherwise the resource name builds the host.
    pub fn base_url(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            let mut base = endpoint.clone();
            if !base.ends_with('/') {
                base.push('/');
            }
            return Some(base);
        }
        self.resource
            .as_ref()
            .map(|r| format!("https://{}.openai.azure.com/", r))
    }

    pub fn is_configured(&self) -> bool {
        self.deployment.is_some() && self.key.is_some() && self.base_url().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    pub system_message: String,
    pub function_system_message: String,
    pub preview_api_version: String,
    pub chat_api_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSettings {
    pub service: Option<String>,
    pub index: Option<String>,
    pub key: Option<String>,
    pub use_semantic_search: bool,
    pub semantic_search_config: String,
    pub top_k: u32,
    pub enable_in_domain: bool,
    pub content_columns: Option<String>,
    pub filename_column: Option<String>,
    pub title_column: Option<String>,
    pub url_column: Option<String>,
    pub vector_columns: Option<String>,
    pub query_type: Option<String>,
    pub permitted_groups_column: Option<String>,
    pub strictness: u32,
    pub file_filter_field: String,
}

impl SearchSettings {
    pub fn is_complete(&self) -> bool {
        self.service.is_some() && self.index.is_some() && self.key.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MongoVcoreSettings {
    pub connection_string: Option<String>,
    pub database: Option<String>,
    pub container: Option<String>,
    pub index: Option<String>,
    pub top_k: u32,
    pub strictness: u32,
    pub enable_in_domain: bool,
    pub content_columns: Option<String>,
    pub filename_column: Option<String>,
    pub title_column: Option<String>,
    pub url_column: Option<String>,
    pub vector_columns: Option<String>,
}

impl MongoVcoreSettings {
    pub fn is_complete(&self) -> bool {
        self.connection_string.is_some()
            && self.database.is_some()
            && self.container.is_some()
            && self.index.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub deployment_name: Option<String>,
    pub endpoint: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub blob_root: PathBuf,
    pub templates_container: Option<String>,
    pub agreements_container: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySettings {
    pub database: Option<String>,
    pub enable_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    pub use_function: bool,
    pub auth_enabled: bool,
    pub debug: bool,
}

/// Immutable process configuration, read once at startup and shared as `Arc<Settings>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub datasource_type: String,
    pub primary: DeploymentProfile,
    pub gpt3: DeploymentProfile,
    pub gpt4: DeploymentProfile,
    pub generation: GenerationSettings,
    pub search: SearchSettings,
    pub mongo: MongoVcoreSettings,
    pub embedding: EmbeddingSettings,
    pub storage: StorageSettings,
    pub history: HistorySettings,
    pub features: FeatureFlags,
    pub graph_endpoint: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_empty(lookup(name));

        // Shared retrieval defaults cascade into the per-backend values.
        let search_top_k: u32 = parse_or(&lookup, "SEARCH_TOP_K", 5)?;
        let search_strictness: u32 = parse_or(&lookup, "SEARCH_STRICTNESS", 3)?;
        let search_in_domain = parse_flag(&lookup, "SEARCH_ENABLE_IN_DOMAIN", true)?;

        let search = SearchSettings {
            service: get("AZURE_SEARCH_SERVICE"),
            index: get("AZURE_SEARCH_INDEX"),
            key: get("AZURE_SEARCH_KEY"),
            use_semantic_search: parse_flag(&lookup, "AZURE_SEARCH_USE_SEMANTIC_SEARCH", false)?,
            semantic_search_config: get("AZURE_SEARCH_SEMANTIC_SEARCH_CONFIG")
                .unwrap_or_else(|| "default".to_string()),
            top_k: parse_or(&lookup, "AZURE_SEARCH_TOP_K", search_top_k)?,
            enable_in_domain: parse_flag(&lookup, "AZURE_SEARCH_ENABLE_IN_DOMAIN", search_in_domain)?,
            content_columns: get("AZURE_SEARCH_CONTENT_COLUMNS"),
            filename_column: get("AZURE_SEARCH_FILENAME_COLUMN"),
            title_column: get("AZURE_SEARCH_TITLE_COLUMN"),
            url_column: get("AZURE_SEARCH_URL_COLUMN"),
            vector_columns: get("AZURE_SEARCH_VECTOR_COLUMNS"),
            query_type: get("AZURE_SEARCH_QUERY_TYPE"),
            permitted_groups_column: get("AZURE_SEARCH_PERMITTED_GROUPS_COLUMN"),
            strictness: parse_or(&lookup, "AZURE_SEARCH_STRICTNESS", search_strictness)?,
            file_filter_field: get("AZURE_SEARCH_FILE_FILTER_FIELD")
                .unwrap_or_else(|| DEFAULT_FILENAME_FILTER_FIELD.to_string()),
        };

        let mongo = MongoVcoreSettings {
            connection_string: get("AZURE_COSMOSDB_MONGO_VCORE_CONNECTION_STRING"),
            database: get("AZURE_COSMOSDB_MONGO_VCORE_DATABASE"),
            container: get("AZURE_COSMOSDB_MONGO_VCORE_CONTAINER"),
            index: get("AZURE_COSMOSDB_MONGO_VCORE_INDEX"),
            top_k: parse_or(&lookup, "AZURE_COSMOSDB_MONGO_VCORE_TOP_K", search.top_k)?,
            strictness: parse_or(&lookup, "AZURE_COSMOSDB_MONGO_VCORE_STRICTNESS", search.strictness)?,
            enable_in_domain: parse_flag(
                &lookup,
                "AZURE_COSMOSDB_MONGO_VCORE_ENABLE_IN_DOMAIN",
                search.enable_in_domain,
            )?,
            content_columns: get("AZURE_COSMOSDB_MONGO_VCORE_CONTENT_COLUMNS"),
            filename_column: get("AZURE_COSMOSDB_MONGO_VCORE_FILENAME_COLUMN"),
            title_column: get("AZURE_COSMOSDB_MONGO_VCORE_TITLE_COLUMN"),
            url_column: get("AZURE_COSMOSDB_MONGO_VCORE_URL_COLUMN"),
            vector_columns: get("AZURE_COSMOSDB_MONGO_VCORE_VECTOR_COLUMNS"),
        };

        let generation = GenerationSettings {
            temperature: parse_or(&lookup, "AZURE_OPENAI_TEMPERATURE", 0.0)?,
            top_p: parse_or(&lookup, "AZURE_OPENAI_TOP_P", 1.0)?,
            max_tokens: parse_or(&lookup, "AZURE_OPENAI_MAX_TOKENS", 1000)?,
            stop: get("AZURE_OPENAI_STOP_SEQUENCE")
                .map(|s| s.split('|').map(str::to_string).collect()),
            stream: parse_flag(&lookup, "AZURE_OPENAI_STREAM", true)?,
            system_message: get("AZURE_OPENAI_SYSTEM_MESSAGE")
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
            function_system_message: get("AZURE_OPENAI_FUNCTION_SYSTEM_MESSAGE")
                .unwrap_or_else(|| DEFAULT_FUNCTION_SYSTEM_MESSAGE.to_string()),
            preview_api_version: get("AZURE_OPENAI_PREVIEW_API_VERSION")
                .unwrap_or_else(|| DEFAULT_PREVIEW_API_VERSION.to_string()),
            chat_api_version: get("AZURE_OPENAI_CHAT_API_VERSION")
                .unwrap_or_else(|| DEFAULT_CHAT_API_VERSION.to_string()),
        };

        let storage = StorageSettings {
            blob_root: PathBuf::from(get("BLOB_ROOT").unwrap_or_else(|| "blobs".to_string())),
            templates_container: get("NDA_TEMPLATES_CONTAINER")
                .or_else(|| get("NDA_TEMPPLATES_CONTAINER")),
            agreements_container: get("NDA_AGREEMENTS_CONTAINER"),
        };

        let history = HistorySettings {
            database: get("HISTORY_DATABASE"),
            enable_feedback: parse_flag(&lookup, "HISTORY_ENABLE_FEEDBACK", false)?,
        };

        let features = FeatureFlags {
            use_function: parse_flag(&lookup, "USE_FUNCTION", false)?,
            auth_enabled: parse_flag(&lookup, "AUTH_ENABLED", true)?,
            debug: parse_flag(&lookup, "DEBUG", false)?,
        };

        Ok(Self {
            datasource_type: get("DATASOURCE_TYPE")
                .unwrap_or_else(|| "AzureCognitiveSearch".to_string()),
            primary: DeploymentProfile::from_lookup(&lookup, "", Some("gpt-35-turbo-16k")),
            gpt3: DeploymentProfile::from_lookup(&lookup, "_GPT3", None),
            gpt4: DeploymentProfile::from_lookup(&lookup, "_GPT4", Some("gpt-4")),
            generation,
            search,
            mongo,
            embedding: EmbeddingSettings {
                deployment_name: get("AZURE_OPENAI_EMBEDDING_NAME"),
                endpoint: get("AZURE_OPENAI_EMBEDDING_ENDPOINT"),
                key: get("AZURE_OPENAI_EMBEDDING_KEY"),
            },
            storage,
            history,
            features,
            graph_endpoint: get("GRAPH_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_GRAPH_ENDPOINT.to_string()),
        })
    }

    /// Feedback is only offered when there is somewhere to store it.
    pub fn feedback_enabled(&self) -> bool {
        self.history.enable_feedback && self.history.database.is_some()
    }
}

/// Splits a column list on `|` when present, otherwise on `,`.
pub fn parse_multi_columns(columns: &str) -> Vec<String> {
    let sep = if columns.contains('|') { '|' } else { ',' };
    columns.split(sep).map(str::to_string).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup(name)) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            ConduitError::Configuration(format!("{} has invalid value '{}': {}", name, raw, e))
                .into()
        }),
    }
}

fn parse_flag<F>(lookup: &F, name: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup(name)) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConduitError::Configuration(format!(
                "{} must be a boolean, got '{}'",
                name, raw
            ))
            .into()),
        },
    }
}
