mod application;
mod config;
mod domain;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::{DeleteMediaUseCase, ListFilesUseCase, SyncCatalogUseCase};
use config::AppConfig;
use domain::CatalogRepository;
use infrastructure::{FsWalker, SqliteCatalog};
use presentation::{app_router, sync_roots, AppState};

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;

    // A snapshot that exists but cannot be loaded is fatal; we never start
    // over on top of a catalog we failed to read.
    info!("Loading catalog from {}", config.snapshot_path.display());
    let catalog = match SqliteCatalog::open(&config.snapshot_path) {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Failed to load catalog: {}", e);
            return Err(e.into());
        }
    };
    let repo: Arc<dyn CatalogRepository> = Arc::new(catalog);
    let walker = Arc::new(FsWalker::new(config.follow_links));

    // Initialize Use Cases
    let list_use_case = Arc::new(ListFilesUseCase::new(repo.clone()));
    let delete_use_case = Arc::new(DeleteMediaUseCase::new(repo.clone()));
    let sync_use_case = Arc::new(SyncCatalogUseCase::new(repo.clone(), walker));

    let shutdown = CancellationToken::new();
    let roots = Arc::new(config.roots.clone());
    if roots.is_empty() {
        warn!("No MEDIA_ROOTS configured; the catalog will only change through the API");
    }

    // Initial sync runs in the background so the API is up immediately.
    {
        let sync = sync_use_case.clone();
        let roots = roots.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let reports = sync_roots(&sync, &roots, &cancel).await;
            info!("Startup sync finished for {} source(s)", reports.len());
        });
    }

    let state = AppState {
        list_use_case,
        delete_use_case,
        sync_use_case,
        repo: repo.clone(),
        access: Arc::new(config.access.clone()),
        roots,
        shutdown: shutdown.clone(),
    };

    let app = Router::new()
        .nest("/api", app_router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server running on http://0.0.0.0:{}", config.port);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            signal.cancel();
        })
        .await?;

    // Sync stops between batches; flush whatever it committed.
    if let Err(e) = repo.persist() {
        error!("Final snapshot failed: {}", e);
    }
    info!("Shut down");
    Ok(())
}
