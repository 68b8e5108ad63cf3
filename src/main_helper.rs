use crate::blob::DocumentStore;
use crate::history::ConversationStore;
use crate::identity::GroupResolver;
use crate::settings::Settings;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Overrides HISTORY_DATABASE.
    #[arg(long)]
    pub database: Option<String>,
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_body_size: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub settings: Arc<Settings>,
    /// `None` when no history database is configured.
    pub history: Option<ConversationStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub groups: Arc<dyn GroupResolver>,
    pub args: Arc<Args>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::{blob, conversation, health, history_api};

    Router::new()
        .route("/conversation", post(conversation::conversation))
        .route("/frontend_settings", get(conversation::frontend_settings))
        .route("/history/generate", post(history_api::generate))
        .route("/history/update", post(history_api::update))
        .route("/history/message_feedback", post(history_api::message_feedback))
        .route("/history/delete", delete(history_api::delete))
        .route("/history/list", get(history_api::list))
        .route("/history/read", post(history_api::read))
        .route("/history/rename", post(history_api::rename))
        .route("/history/delete_all", delete(history_api::delete_all))
        .route("/history/clear", post(history_api::clear))
        .route("/history/ensure", get(history_api::ensure))
        .route("/get_files", get(blob::get_files))
        .route("/get_nda_templates", get(blob::get_nda_templates))
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .fallback_service(ServeDir::new(&state.args.static_dir))
        .layer(axum::extract::DefaultBodyLimit::max(state.args.max_body_size))
        .layer(middleware::from_fn(crate::logging::request_span_middleware))
        .with_state(state)
}
