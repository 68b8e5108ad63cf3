use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, Json};
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{ConduitError, Result};
use crate::AppState;

lazy_static! {
    static ref PARAGRAPH_REGEX: Regex =
        Regex::new(r"(?s)<w:p\b[^>]*/>|<w:p\b[^>]*>(.*?)</w:p>").expect("Invalid paragraph regex");
    static ref RUN_REGEX: Regex =
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab\s*/>|<w:br\s*/>")
            .expect("Invalid run regex");
    static ref ENTITY_REGEX: Regex =
        Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9A-Fa-f]+);").expect("Invalid entity regex");
}

/// Source of the documents the function-calling mode reads.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, container: &str) -> Result<Vec<String>>;
    async fn read_text(&self, container: &str, name: &str) -> Result<String>;
}

/// Containers are subdirectories of a root directory; blobs are files in them.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf> {
        validate_segment(container)?;
        Ok(self.root.join(container))
    }
}

/// Rejects anything that could escape the container directory.
fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || Path::new(name).is_absolute()
    {
        return Err(ConduitError::InvalidRequest(format!("invalid document name '{}'", name)).into());
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, container: &str) -> Result<Vec<String>> {
        let dir = self.container_dir(container)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConduitError::NotFound(format!("container '{}'", container)).into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_text(&self, container: &str, name: &str) -> Result<String> {
        validate_segment(name)?;
        let path = self.container_dir(container)?.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(
                    ConduitError::NotFound(format!("document '{}/{}'", container, name)).into(),
                )
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(container = %container, name = %name, bytes = bytes.len(), "Document read");

        let is_docx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("docx"));
        if is_docx {
            docx_text(&bytes)
        } else {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Paragraph text of a `.docx` package, one paragraph per line.
pub fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;

    let paragraphs: Vec<String> = PARAGRAPH_REGEX
        .captures_iter(&xml)
        .map(|p| match p.get(1) {
            Some(body) => paragraph_text(body.as_str()),
            None => String::new(),
        })
        .collect();
    Ok(paragraphs.join("\n"))
}

fn paragraph_text(body: &str) -> String {
    let mut out = String::new();
    for run in RUN_REGEX.captures_iter(body) {
        match run.get(1) {
            Some(text) => out.push_str(&decode_entities(text.as_str())),
            None if run[0].starts_with("<w:tab") => out.push('\t'),
            None => out.push('\n'),
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    ENTITY_REGEX
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                _ => {
                    let code = match entity.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse::<u32>().ok(),
                    };
                    match code.and_then(char::from_u32) {
                        Some(c) => c.to_string(),
                        None => caps[0].to_string(),
                    }
                }
            }
        })
        .into_owned()
}

async fn list_container(state: &AppState, container: Option<&String>, var: &str) -> Result<Vec<String>> {
    let container = container
        .ok_or_else(|| ConduitError::Configuration(format!("{} is not set", var)))?;
    state.documents.list(container).await
}

pub async fn get_files(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    let names = list_container(
        &state,
        state.settings.storage.agreements_container.as_ref(),
        "NDA_AGREEMENTS_CONTAINER",
    )
    .await?;
    tracing::info!(count = names.len(), "Listed agreement documents");
    Ok(Json(names))
}

pub async fn get_nda_templates(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    let names = list_container(
        &state,
        state.settings.storage.templates_container.as_ref(),
        "NDA_TEMPLATES_CONTAINER",
    )
    .await?;
    tracing::info!(count = names.len(), "Listed template documents");
    Ok(Json(names))
}
