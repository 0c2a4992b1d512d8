//! `datalk init`: create every registry collection and its indexes.
//!
//! Safe to run repeatedly; tables and indexes are created only if missing.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::schema::REGISTRY;
use crate::store::{create_indexes, DocumentStore, SqliteStore};

/// Ensure every collection in the registry exists with its declared indexes.
pub async fn ensure_schema(store: &dyn DocumentStore) -> crate::Result<()> {
    for schema in REGISTRY.entities() {
        store.ensure_collection(schema).await?;
        create_indexes(store, schema).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    ensure_schema(&store).await?;

    store.close().await;
    Ok(())
}
