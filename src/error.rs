//! Error taxonomy.
//!
//! Row- and document-scoped failures ([`MalformedRecord`], [`WriteFailure`])
//! are collected into reports by the ingestion pipeline. Run- and
//! request-scoped failures propagate as [`Error`].

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::filter::FilterError;
use crate::schema::FieldType;

/// A raw row field could not be coerced to its declared type.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("row {row}: field '{field}' expected {expected}, got {value:?}")]
pub struct MalformedRecord {
    /// 1-based data row index (the header is row 0).
    pub row: u64,
    pub field: String,
    pub value: String,
    pub expected: FieldType,
}

/// Why a single document of a bulk insert was not written.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WriteFailureKind {
    /// The natural key already exists in the collection.
    BulkWriteConflict,
    /// Any other per-document rejection from the storage engine.
    Rejected(String),
}

/// A document rejected by an unordered bulk insert.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("document {index} (key {key}) rejected: {kind:?}")]
pub struct WriteFailure {
    /// Position of the document inside its batch.
    pub index: usize,
    pub key: String,
    pub kind: WriteFailureKind,
}

/// Failure talking to the language-model oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response has no text: {0}")]
    InvalidResponse(String),
}

/// Natural-language translation failed. Never followed by a fallback query.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("no JSON object found in oracle response: {raw}")]
    NoJsonFound { raw: String },

    #[error("oracle returned malformed JSON ({source}): {raw}")]
    MalformedJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("oracle filter is not a JSON object: {raw}")]
    NotAnObject { raw: String },

    #[error("unknown field '{field}' in oracle filter: {raw}")]
    UnknownField { field: String, raw: String },

    #[error("invalid condition on '{field}': {reason}: {raw}")]
    InvalidCondition {
        field: String,
        reason: String,
        raw: String,
    },
}

impl TranslationError {
    /// The raw oracle text, for diagnosis. `None` when the oracle never answered.
    pub fn raw(&self) -> Option<&str> {
        match self {
            TranslationError::Oracle(_) => None,
            TranslationError::NoJsonFound { raw }
            | TranslationError::MalformedJson { raw, .. }
            | TranslationError::NotAnObject { raw }
            | TranslationError::UnknownField { raw, .. }
            | TranslationError::InvalidCondition { raw, .. } => Some(raw),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecord),

    #[error("source read failed at row {row}: {message}")]
    SourceReadFailure { row: u64, message: String },

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("{collection}: {key_field} = {key} already exists")]
    DuplicateKey {
        collection: String,
        key_field: String,
        key: String,
    },

    #[error("{collection}: no document with key {key}")]
    NotFound { collection: String, key: String },

    #[error("{key_field} in body ({found}) does not match {expected}")]
    KeyMismatch {
        key_field: String,
        expected: String,
        found: String,
    },

    #[error("unknown collection: '{0}'")]
    UnknownCollection(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("limit must be >= 1, got {0}")]
    InvalidLimit(i64),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("document encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
