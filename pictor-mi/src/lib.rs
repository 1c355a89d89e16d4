//! pictor-mi library interface
//!
//! Exposes the application state, router construction and every pipeline
//! component for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::config::IngestConfig;
pub use crate::error::{ApiError, ApiResult};

use crate::extractors::{GeocodeClient, SystemClock};
use crate::models::{ProgressRegistry, UploadRegistry};
use crate::services::{ChunkStore, Tools};
use axum::Router;
use chrono::{DateTime, Utc};
use pictor_common::config::StorageLayout;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog connection pool
    pub db: SqlitePool,
    /// Storage root layout (media tree, scratch space, database)
    pub layout: StorageLayout,
    pub config: IngestConfig,
    /// Assembled chunked uploads awaiting finalize/commit
    pub uploads: UploadRegistry,
    /// Per-batch progress read by the polling endpoint
    pub progress: ProgressRegistry,
    pub chunks: ChunkStore,
    /// External decoder/converter binaries probed at startup
    pub tools: Arc<Tools>,
    pub geocoder: Arc<GeocodeClient>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, layout: StorageLayout, config: IngestConfig, tools: Tools) -> Self {
        let uploads = UploadRegistry::new();
        let chunks = ChunkStore::new(layout.chunk_dir(), uploads.clone());
        let geocoder = Arc::new(GeocodeClient::new(db.clone(), Arc::new(SystemClock)));

        Self {
            db,
            layout,
            config,
            uploads,
            progress: ProgressRegistry::new(),
            chunks,
            tools: Arc::new(tools),
            geocoder,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let media_dir = state.layout.root().join("media");

    Router::new()
        .merge(api::upload_routes())
        .merge(api::import_routes())
        .merge(api::health_routes())
        // The gallery layer serves pages; stored files are exposed here
        // for it and for direct thumbnail links
        .nest_service("/media", tower_http::services::ServeDir::new(media_dir))
        // Chunk parts run well past axum's 2 MB default body cap
        .layer(axum::extract::DefaultBodyLimit::max(32 * 1024 * 1024))
        .with_state(state)
}
