use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsboard::config::Config;
use newsboard::fetcher::Fetcher;
use newsboard::routes::{self, AppState};
use newsboard::slots::SlotBoard;
use newsboard::sources::SourceStore;
use newsboard::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsboard=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSBOARD_CONFIG").unwrap_or_else(|_| "newsboard.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    info!("Loaded {} preset sources", config.presets.len());

    // Initialize storage
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newsboard.db?mode=rwc".to_string());
    let storage = SqliteStorage::new(&database_url).await?;
    storage.initialize().await?;
    info!("Storage initialized");

    let store = Arc::new(SourceStore::new(
        Arc::new(storage),
        config.preset_sources(),
    ));

    // Start fetching every source
    let fetcher = Arc::new(Fetcher::new(&config.proxies)?);
    let board = Arc::new(SlotBoard::new(fetcher, config.display_limit));
    let sources = store.load().await?;
    board.refresh(&sources).await;

    let state = Arc::new(AppState { store, board });

    // Build router
    let app = Router::new()
        .route("/", get(routes::index))
        .route("/grid", get(routes::grid))
        .route("/slot", get(routes::slot))
        .route("/refresh", post(routes::refresh))
        .route("/settings", get(routes::settings))
        .route("/sources", post(routes::add_source))
        .route("/sources/delete", post(routes::delete_source))
        .route("/sources/restore", post(routes::restore_defaults))
        .route("/health", get(routes::health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr.as_str()).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
