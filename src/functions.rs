use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::blob::DocumentStore;
use crate::settings::StorageSettings;
use crate::specs::openai::FunctionDefinition;
use crate::types::{ConduitError, Result};

/// Functions advertised to the model in function-calling mode.
pub fn definitions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition {
            name: "read_docx_from_blob".to_string(),
            description: "Reads a document from a storage container and returns its content as text"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "container_name": {
                        "type": "string",
                        "description": "The name of the storage container where the file is located"
                    },
                    "blob_name": {
                        "type": "string",
                        "description": "The name of the file"
                    }
                },
                "required": ["container_name", "blob_name"]
            }),
        },
        FunctionDefinition {
            name: "send_mail".to_string(),
            description: "Sends an e-mail to a recipient".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "The e-mail address of the recipient"},
                    "body": {"type": "string", "description": "The content of the mail body"},
                    "title": {"type": "string", "description": "The title of the mail"}
                },
                "required": ["to", "title"]
            }),
        },
        FunctionDefinition {
            name: "get_nda_template".to_string(),
            description: "Gets the content of the selected NDA (non-disclosure agreement) template and returns it as text"
                .to_string(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
        FunctionDefinition {
            name: "get_nda_document".to_string(),
            description: "Gets the content of the selected NDA (non-disclosure agreement) document and returns it as text"
                .to_string(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
    ]
}

/// Executes model-requested functions for one request.
///
/// The caller's selections are injected here; the model never chooses which
/// template or agreement is read.
#[derive(Clone)]
pub struct FunctionRuntime {
    documents: Arc<dyn DocumentStore>,
    templates_container: Option<String>,
    agreements_container: Option<String>,
    selected_templates: Vec<String>,
    selected_documents: Vec<String>,
}

impl FunctionRuntime {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        storage: &StorageSettings,
        selected_templates: Vec<String>,
        selected_documents: Vec<String>,
    ) -> Self {
        Self {
            documents,
            templates_container: storage.templates_container.clone(),
            agreements_container: storage.agreements_container.clone(),
            selected_templates,
            selected_documents,
        }
    }

    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<String> {
        let args = parse_arguments(arguments)?;
        tracing::info!(function = %name, "Invoking function");

        match name {
            "read_docx_from_blob" => {
                let container = required(&args, "container_name")?;
                let blob = required(&args, "blob_name")?;
                self.documents.read_text(container, blob).await
            }
            "send_mail" => {
                let to = required(&args, "to")?;
                required(&args, "title")?;
                tracing::info!(recipient = %to, "send_mail acknowledged without delivery");
                Ok("Mail sent!".to_string())
            }
            "get_nda_template" => {
                self.read_selection(
                    self.templates_container.as_deref(),
                    "NDA_TEMPLATES_CONTAINER",
                    &self.selected_templates,
                )
                .await
            }
            "get_nda_document" => {
                self.read_selection(
                    self.agreements_container.as_deref(),
                    "NDA_AGREEMENTS_CONTAINER",
                    &self.selected_documents,
                )
                .await
            }
            other => Err(ConduitError::InvalidRequest(format!("unknown function '{}'", other)).into()),
        }
    }

    async fn read_selection(
        &self,
        container: Option<&str>,
        var: &str,
        selection: &[String],
    ) -> Result<String> {
        let container =
            container.ok_or_else(|| ConduitError::Configuration(format!("{} is not set", var)))?;
        if selection.is_empty() {
            return Err(ConduitError::InvalidRequest(
                "no document selected for this request".to_string(),
            )
            .into());
        }
        let mut texts = Vec::with_capacity(selection.len());
        for name in selection {
            texts.push(self.documents.read_text(container, name).await?);
        }
        Ok(texts.join("\n\n"))
    }
}

fn parse_arguments(arguments: &str) -> Result<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments)? {
        Value::Object(map) => Ok(map),
        other => Err(ConduitError::InvalidRequest(format!(
            "function arguments must be an object, got {}",
            other
        ))
        .into()),
    }
}

fn required<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ConduitError::InvalidRequest(format!("missing argument '{}'", key)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_all_functions() {
        let names: Vec<String> = definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["read_docx_from_blob", "send_mail", "get_nda_template", "get_nda_document"]
        );
    }

    #[test]
    fn empty_arguments_parse_as_object() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("[1]").is_err());
        assert!(parse_arguments("{oops").is_err());
    }
}
