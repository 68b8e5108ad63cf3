use serde::{Deserialize, Serialize};

use super::openai::OpenAiMessage;

/// --- AZURE OPENAI "ON YOUR DATA" EXTENSIONS SCHEMA ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsRequest {
    pub messages: Vec<OpenAiMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    #[serde(rename = "dataSources")]
    pub data_sources: Vec<DataSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "parameters")]
pub enum DataSource {
    AzureCognitiveSearch(SearchParameters),
    AzureCosmosDB(CosmosParameters),
}

impl DataSource {
    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::AzureCognitiveSearch(_) => "AzureCognitiveSearch",
            DataSource::AzureCosmosDB(_) => "AzureCosmosDB",
        }
    }

    pub fn filter(&self) -> Option<&str> {
        match self {
            DataSource::AzureCognitiveSearch(p) => p.filter.as_deref(),
            DataSource::AzureCosmosDB(_) => None,
        }
    }
}

/// Null members are sent explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldsMapping {
    pub content_fields: Vec<String>,
    pub title_field: Option<String>,
    pub url_field: Option<String>,
    pub filepath_field: Option<String>,
    pub vector_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_deployment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameters {
    pub endpoint: String,
    pub key: String,
    pub index_name: String,
    pub fields_mapping: FieldsMapping,
    pub in_scope: bool,
    #[serde(rename = "topNDocuments")]
    pub top_n_documents: u32,
    pub query_type: String,
    pub semantic_configuration: String,
    pub role_information: String,
    pub filter: Option<String>,
    pub strictness: u32,
    #[serde(flatten)]
    pub embedding: EmbeddingParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CosmosParameters {
    pub connection_string: String,
    pub index_name: String,
    pub database_name: String,
    pub container_name: String,
    pub fields_mapping: FieldsMapping,
    pub in_scope: bool,
    #[serde(rename = "topNDocuments")]
    pub top_n_documents: u32,
    pub strictness: u32,
    pub query_type: String,
    pub role_information: String,
    #[serde(flatten)]
    pub embedding: EmbeddingParameters,
}
