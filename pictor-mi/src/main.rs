//! pictor-mi - Media Ingest service
//!
//! Receives chunked uploads, imports bulk archives, derives thumbnails
//! and metadata, and writes assets into the gallery catalog.

use anyhow::Result;
use pictor_common::config::{resolve_storage_root, StorageLayout};
use pictor_mi::services::Tools;
use pictor_mi::{build_router, AppState, IngestConfig};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LISTEN_ADDR: &str = "127.0.0.1:5719";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting pictor-mi (Media Ingest) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli_root = std::env::args().nth(1);
    let root = resolve_storage_root(cli_root.as_deref());
    let layout = StorageLayout::new(root);
    layout.ensure_directories()?;
    info!("Storage root: {}", layout.root().display());

    let db_path = layout.database_path();
    let db_pool = pictor_mi::db::init_database_pool(&db_path).await?;
    info!("Catalog: {}", db_path.display());

    // Batches left `processing` by a crash or kill can never finish
    let reconciled = pictor_mi::db::history::fail_stale_batches(&db_pool).await?;
    if reconciled > 0 {
        info!(count = reconciled, "marked interrupted import batches as failed");
    }

    let config = IngestConfig::load();
    let tools = Tools::detect(Some(&layout.root().join("bin")));

    let state = AppState::new(db_pool, layout.clone(), config.clone(), tools);

    // Periodic reclamation of abandoned scratch state
    let sweep_state = state.clone();
    let max_age = Duration::from_secs(config.scratch_max_age_hours * 3600);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let removed = sweep_state.chunks.cleanup_stale(max_age).await;
            let removed = removed
                + pictor_mi::services::chunks::remove_dirs_older_than(
                    &sweep_state.layout.extract_dir(),
                    max_age,
                );
            if removed > 0 {
                info!(removed, "scratch sweep reclaimed directories");
            }
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR).await?;
    info!("Listening on http://{}", LISTEN_ADDR);
    info!("Health check: http://{}/health", LISTEN_ADDR);

    axum::serve(listener, app).await?;

    Ok(())
}
