pub mod blob;
pub mod constants;
pub mod conversation;
pub mod db;
pub mod functions;
pub mod health;
pub mod history;
pub mod history_api;
pub mod identity;
pub mod logging;
pub mod main_helper;
pub mod mode;
pub mod ndjson_layer;
pub mod normalizer;
pub mod redaction;
pub mod redaction_layer;
pub mod settings;
pub mod specs;
pub mod streaming;
pub mod title;
pub mod types;
pub mod upstream;

pub use types::*;

pub use main_helper::{AppState, Args};
