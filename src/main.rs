use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livetrivia::{
    auth::StoreAuthenticator,
    config::{GameConfig, ServerConfig},
    source::JServiceSource,
    state::AppState,
    store::{MemoryStore, Store},
    ws::{self, Gateway},
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livetrivia=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting live trivia server...");

    let server_config = ServerConfig::from_env();
    let game_config = GameConfig::from_env();

    let store: Arc<dyn Store> = match &server_config.store_path {
        Some(path) => match MemoryStore::open(path).await {
            Ok(store) => {
                tracing::info!("Store snapshot at {}", path.display());
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!("Failed to open store at {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("STORE_PATH not set, players and reports are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let source = Arc::new(JServiceSource::new(
        server_config.source_base_url.clone(),
        server_config.source_timeout,
    ));
    tracing::info!("Entry source: {}", server_config.source_base_url);

    let state = Arc::new(AppState::new(game_config, store.clone(), source));
    state.start();

    let gateway = Gateway {
        state,
        authenticator: Arc::new(StoreAuthenticator::new(store)),
        auth_timeout: server_config.auth_timeout,
    };

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
