//! SQLite-backed [`DocumentStore`].
//!
//! Each collection is a table of JSON documents:
//!
//! ```text
//! id           INTEGER PRIMARY KEY   insertion order
//! natural_key  TEXT NOT NULL UNIQUE  the entity's natural key, as text
//! doc          TEXT NOT NULL         the document, as JSON
//! ```
//!
//! Declared indexes are expression indexes over
//! `json_extract(doc, '$.<field>')`, the same expression the filter compiler
//! emits, so SQLite can use them for reads.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Row, SqlitePool};

use super::{BulkWriteResult, DocumentStore, WriteMode};
use crate::error::{Error, Result, WriteFailure, WriteFailureKind};
use crate::filter::{json_path_expr, Filter};
use crate::normalize::{Document, FieldValue};
use crate::schema::{EntitySchema, IndexSpec};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn table(schema: &EntitySchema) -> String {
    format!("\"{}\"", schema.collection)
}

fn bind_value<'q>(q: SqliteQuery<'q>, value: &FieldValue) -> SqliteQuery<'q> {
    match value {
        FieldValue::Absent => q.bind(None::<String>),
        FieldValue::Int(i) => q.bind(*i),
        FieldValue::Float(f) => q.bind(*f),
        FieldValue::Str(s) => q.bind(s.clone()),
        FieldValue::DateTime(_) => q.bind(value.key_string()),
    }
}

fn parse_doc(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ensure_collection(&self, schema: &EntitySchema) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                natural_key TEXT NOT NULL UNIQUE,
                doc TEXT NOT NULL
            )
            "#,
            table(schema)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, schema: &EntitySchema) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table(schema)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn collection_exists(&self, schema: &EntitySchema) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(schema.collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    async fn insert_many(
        &self,
        schema: &EntitySchema,
        docs: &[Document],
        mode: WriteMode,
    ) -> Result<BulkWriteResult> {
        let sql = match mode {
            WriteMode::InsertOnly => format!(
                "INSERT INTO {} (natural_key, doc) VALUES (?, ?)",
                table(schema)
            ),
            WriteMode::Upsert => format!(
                "INSERT INTO {} (natural_key, doc) VALUES (?, ?) \
                 ON CONFLICT(natural_key) DO UPDATE SET doc = excluded.doc",
                table(schema)
            ),
            WriteMode::InsertIfAbsent => format!(
                "INSERT INTO {} (natural_key, doc) VALUES (?, ?) \
                 ON CONFLICT(natural_key) DO NOTHING",
                table(schema)
            ),
        };

        let mut result = BulkWriteResult::default();
        let mut tx = self.pool.begin().await?;

        for (index, doc) in docs.iter().enumerate() {
            let body = serde_json::to_string(&doc.to_json())?;
            let outcome = sqlx::query(&sql)
                .bind(&doc.key)
                .bind(body)
                .execute(&mut *tx)
                .await;

            match outcome {
                Ok(done) if done.rows_affected() == 0 => result.unchanged += 1,
                Ok(_) => result.written += 1,
                // Constraint violations only affect this document. Anything
                // else drops `tx` uncommitted, rolling the batch back.
                Err(sqlx::Error::Database(db)) => {
                    let kind = match db.kind() {
                        ErrorKind::UniqueViolation => WriteFailureKind::BulkWriteConflict,
                        ErrorKind::NotNullViolation
                        | ErrorKind::CheckViolation
                        | ErrorKind::ForeignKeyViolation => {
                            WriteFailureKind::Rejected(db.message().to_string())
                        }
                        _ => return Err(sqlx::Error::Database(db).into()),
                    };
                    result.failures.push(WriteFailure {
                        index,
                        key: doc.key.clone(),
                        kind,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    async fn insert_one(&self, schema: &EntitySchema, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(&doc.to_json())?;
        let outcome = sqlx::query(&format!(
            "INSERT INTO {} (natural_key, doc) VALUES (?, ?)",
            table(schema)
        ))
        .bind(&doc.key)
        .bind(body)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::DuplicateKey {
                collection: schema.collection.to_string(),
                key_field: schema.natural_key.to_string(),
                key: doc.key.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_one(&self, schema: &EntitySchema, key: &str, doc: &Document) -> Result<bool> {
        let body = serde_json::to_string(&doc.to_json())?;
        let done = sqlx::query(&format!(
            "UPDATE {} SET natural_key = ?, doc = ? WHERE natural_key = ?",
            table(schema)
        ))
        .bind(&doc.key)
        .bind(body)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_one(&self, schema: &EntitySchema, key: &str) -> Result<bool> {
        let done = sqlx::query(&format!(
            "DELETE FROM {} WHERE natural_key = ?",
            table(schema)
        ))
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn find_one(&self, schema: &EntitySchema, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar(&format!(
            "SELECT doc FROM {} WHERE natural_key = ?",
            table(schema)
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        raw.as_deref().map(parse_doc).transpose()
    }

    async fn find(&self, schema: &EntitySchema, filter: &Filter, limit: i64) -> Result<Vec<Value>> {
        let (predicate, params) = filter.to_sql();
        let sql = format!(
            "SELECT doc FROM {} WHERE {} ORDER BY id LIMIT ?",
            table(schema),
            predicate
        );

        let mut q = sqlx::query(&sql);
        for p in &params {
            q = bind_value(q, p);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| parse_doc(&row.get::<String, _>("doc")))
            .collect()
    }

    async fn count(&self, schema: &EntitySchema, filter: &Filter) -> Result<u64> {
        let (predicate, params) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) AS n FROM {} WHERE {}", table(schema), predicate);

        let mut q = sqlx::query(&sql);
        for p in &params {
            q = bind_value(q, p);
        }
        let row = q.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn create_index(&self, schema: &EntitySchema, index: &IndexSpec) -> Result<()> {
        let exprs: Vec<String> = index.fields.iter().map(|f| json_path_expr(f)).collect();
        sqlx::query(&format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            table(schema),
            exprs.join(", ")
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_indexes(&self, schema: &EntitySchema) -> Result<Vec<String>> {
        // Automatic indexes backing UNIQUE columns have no SQL text.
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL \
             ORDER BY name",
        )
        .bind(schema.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}
