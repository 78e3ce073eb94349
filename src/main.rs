mod config;
mod db;
mod error;
mod handlers;
mod models;
mod repository;
mod services;
mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::repository::SqliteFileRepository;
use crate::services::{FileService, FileServiceOptions};
use crate::storage::LocalStorage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub files: Arc<FileService>,
}

impl AppState {
    /// Open the metadata store and wire the file service to the upload root
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(&config.database.path).await?;
        db.run_migrations().await?;
        tracing::info!("Database initialized");

        let storage = Arc::new(LocalStorage::new(&config.storage.upload_dir));
        tracing::info!("Blob store root: {:?}", storage.base_path());
        let repo = Arc::new(SqliteFileRepository::new(db));
        let files = FileService::new(
            repo,
            storage,
            FileServiceOptions {
                delete_blobs: config.storage.delete_blobs,
            },
        );

        Ok(Self {
            config: Arc::new(config),
            files: Arc::new(files),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mydrive=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MyDrive...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::init(config).await?;

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let file_routes = Router::new()
        .route("/files", get(handlers::file::list_files))
        .route("/files/upload", post(handlers::file::upload_file))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes));

    Router::new()
        .nest("/api/v1", file_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
