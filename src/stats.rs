//! Database statistics.
//!
//! Used by `datalk stats` to confirm what an ingest left behind: document
//! counts and declared indexes per collection.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::filter::Filter;
use crate::schema::REGISTRY;
use crate::store::{DocumentStore, SqliteStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    /// `false` until `datalk init` or an ingest creates the collection.
    pub exists: bool,
    pub documents: u64,
    pub indexes: Vec<String>,
    /// Indexes the registry declares but the database lacks.
    pub missing_indexes: Vec<String>,
}

/// Collect stats for every registry collection. Read-only: a missing
/// collection is reported with `exists: false`.
pub async fn collect_stats(store: &dyn DocumentStore) -> crate::Result<Vec<CollectionStats>> {
    let mut out = Vec::with_capacity(REGISTRY.entities().len());
    for schema in REGISTRY.entities() {
        let exists = store.collection_exists(schema).await?;
        let (documents, indexes) = if exists {
            (
                store.count(schema, &Filter::all()).await?,
                store.list_indexes(schema).await?,
            )
        } else {
            (0, Vec::new())
        };
        let missing_indexes = schema
            .indexes
            .iter()
            .filter(|spec| !indexes.iter().any(|name| name == spec.name))
            .map(|spec| spec.name.to_string())
            .collect();
        out.push(CollectionStats {
            collection: schema.collection.to_string(),
            exists,
            documents,
            indexes,
            missing_indexes,
        });
    }
    Ok(out)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let stats = collect_stats(&store).await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("datalk database stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  {:<12} {:>12}   {}", "COLLECTION", "DOCUMENTS", "INDEXES");
    println!("  {}", "-".repeat(60));
    for s in &stats {
        if !s.exists {
            println!(
                "  {:<12} {:>12}   (missing, run `datalk init`)",
                s.collection, "-"
            );
            continue;
        }
        println!(
            "  {:<12} {:>12}   {}",
            s.collection,
            s.documents,
            if s.indexes.is_empty() {
                "(none)".to_string()
            } else {
                s.indexes.join(", ")
            }
        );
        if !s.missing_indexes.is_empty() {
            println!(
                "  {:<12} {:>12}   missing: {} (run `datalk init`)",
                "",
                "",
                s.missing_indexes.join(", ")
            );
        }
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
