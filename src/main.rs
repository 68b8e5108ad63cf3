use conduit::blob::FsDocumentStore;
use conduit::db::init_db;
use conduit::history::ConversationStore;
use conduit::identity::GraphGroupResolver;
use conduit::main_helper::build_router;
use conduit::settings::Settings;
use conduit::*;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Arc::new(Args::parse());
    let mut settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let _guards = conduit::logging::init_tracing(&args.log_dir, settings.features.debug);
    conduit::logging::setup_panic_hook();

    if let Some(database) = &args.database {
        settings.history.database = Some(database.clone());
    }
    if !settings.primary.is_configured() {
        tracing::warn!("No primary Azure OpenAI deployment configured; /conversation will fail");
    }

    let history = match &settings.history.database {
        Some(path) => match init_db(path).await {
            Ok(pool) => Some(ConversationStore::new(pool, settings.history.enable_feedback)),
            Err(e) => {
                eprintln!("Failed to initialize database: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::info!("HISTORY_DATABASE not set; conversation history disabled");
            None
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        documents: Arc::new(FsDocumentStore::new(settings.storage.blob_root.clone())),
        groups: Arc::new(GraphGroupResolver::new(
            client.clone(),
            settings.graph_endpoint.clone(),
        )),
        client,
        settings: Arc::new(settings),
        history,
        args: args.clone(),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Conduit listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
