//! Document-store abstraction.
//!
//! The [`DocumentStore`] trait is the collection contract the pipeline,
//! the translator and the CRUD layer are written against: unordered bulk
//! insert, idempotent index creation, bounded filtered reads and counts.
//! [`SqliteStore`] is the implementation shipped with the crate.
//!
//! Collections are always addressed through their [`EntitySchema`], so the
//! set of reachable collections is exactly the registry.

pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, WriteFailure};
use crate::filter::Filter;
use crate::normalize::Document;
use crate::schema::{EntitySchema, IndexSpec};

pub use sqlite::SqliteStore;

/// How `insert_many` treats a document whose natural key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Plain insert; a key collision is a `BulkWriteConflict` for that document.
    InsertOnly,
    /// Replace the stored document.
    Upsert,
    /// Leave the stored document untouched.
    InsertIfAbsent,
}

/// Outcome of one unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkWriteResult {
    /// Documents inserted or replaced.
    pub written: u64,
    /// Documents skipped because their key already existed (`InsertIfAbsent`).
    pub unchanged: u64,
    pub failures: Vec<WriteFailure>,
}

impl BulkWriteResult {
    pub fn conflicts(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == crate::error::WriteFailureKind::BulkWriteConflict)
            .count()
    }
}

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](DocumentStore::ensure_collection) | Create the collection with its natural-key constraint |
/// | [`drop_collection`](DocumentStore::drop_collection) | Remove the collection and its indexes |
/// | [`collection_exists`](DocumentStore::collection_exists) | Check for the collection without creating it |
/// | [`insert_many`](DocumentStore::insert_many) | Unordered bulk insert, one transaction per call |
/// | [`create_index`](DocumentStore::create_index) | Declare an index; re-declaring is a no-op |
/// | [`find`](DocumentStore::find) | Filtered read with a result cap |
/// | [`count`](DocumentStore::count) | Filtered count |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ensure_collection(&self, schema: &EntitySchema) -> Result<()>;

    async fn drop_collection(&self, schema: &EntitySchema) -> Result<()>;

    /// Whether the collection exists. Never creates it.
    async fn collection_exists(&self, schema: &EntitySchema) -> Result<bool>;

    /// Write `docs` as one atomic batch. Per-document rejections are
    /// returned in the result; any other error aborts and rolls back the batch.
    async fn insert_many(
        &self,
        schema: &EntitySchema,
        docs: &[Document],
        mode: WriteMode,
    ) -> Result<BulkWriteResult>;

    /// Insert one document; an existing key is `Error::DuplicateKey`.
    async fn insert_one(&self, schema: &EntitySchema, doc: &Document) -> Result<()>;

    /// Replace the document stored under `key`. Returns `false` when absent.
    async fn replace_one(&self, schema: &EntitySchema, key: &str, doc: &Document) -> Result<bool>;

    /// Returns `false` when no document had `key`.
    async fn delete_one(&self, schema: &EntitySchema, key: &str) -> Result<bool>;

    async fn find_one(&self, schema: &EntitySchema, key: &str) -> Result<Option<Value>>;

    async fn find(&self, schema: &EntitySchema, filter: &Filter, limit: i64) -> Result<Vec<Value>>;

    async fn count(&self, schema: &EntitySchema, filter: &Filter) -> Result<u64>;

    async fn create_index(&self, schema: &EntitySchema, index: &IndexSpec) -> Result<()>;

    /// Names of the declared indexes on the collection, sorted.
    async fn list_indexes(&self, schema: &EntitySchema) -> Result<Vec<String>>;
}

/// Declare every index `schema` lists.
pub async fn create_indexes(store: &dyn DocumentStore, schema: &EntitySchema) -> Result<()> {
    for index in schema.indexes {
        store.create_index(schema, index).await?;
    }
    Ok(())
}
