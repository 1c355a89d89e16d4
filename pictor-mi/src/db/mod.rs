//! Catalog access for pictor-mi

pub mod albums;
pub mod history;
pub mod media;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the catalog, creating schema as needed.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = pictor_common::db::init_database(db_path).await?;
    Ok(pool)
}
