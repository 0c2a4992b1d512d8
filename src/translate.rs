//! Natural-language question → validated filter.
//!
//! # Flow
//!
//! ```text
//! question ─▶ build_prompt ─▶ Oracle::complete ─▶ extract_json_object
//!          ─▶ serde_json ─▶ Filter::from_json ─▶ DocumentStore::find
//! ```
//!
//! The oracle's answer is untrusted. Nothing reaches storage unless it is a
//! single JSON object whose keys are all registry fields and whose operands
//! coerce to the field types. Any failure is returned as a
//! [`TranslationError`] carrying the raw oracle text; there is no fallback
//! query.

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::db;
use crate::error::{Result, TranslationError};
use crate::filter::{Filter, FilterError, Op};
use crate::oracle::{OllamaOracle, Oracle};
use crate::schema::{EntitySchema, REGISTRY};
use crate::store::{DocumentStore, SqliteStore};

/// A filter the oracle produced and the registry accepted.
#[derive(Debug, Clone)]
pub struct TranslatedFilter {
    pub filter: Filter,
    /// The oracle's full answer.
    pub raw: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub prompt: String,
    pub query: Value,
    pub results: Vec<Value>,
}

/// Build the instruction sent to the oracle. Only registry data is used.
pub fn build_prompt(schema: &EntitySchema, question: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "You convert questions about the \"{}\" collection into a JSON filter.\n\n",
        schema.collection
    ));

    out.push_str("Fields and their types:\n");
    for field in schema.fields {
        out.push_str(&format!("- {}: {}\n", field.name, field.ty));
    }

    out.push_str("\nWords a user may use for each field:\n");
    for (alias, name) in schema.aliases() {
        out.push_str(&format!("- \"{}\" means {}\n", alias, name));
    }

    let ops: Vec<&str> = Op::ALL.iter().map(Op::operator).collect();
    out.push_str(&format!("\nAllowed operators: {}\n", ops.join(", ")));
    out.push_str("Datetime values are strings like 2021-01-21T00:01:44.\n");
    out.push_str(
        "\nRules:\n\
         - Answer with exactly one JSON object and no other text.\n\
         - Use only the field names listed above as keys.\n\
         - Equality is {\"field\": value}; comparisons are {\"field\": {\"$gt\": value}}.\n",
    );

    out.push_str(&format!("\nQuestion: {}\nJSON:", question.trim()));
    out
}

/// Find the first balanced JSON object in `text` that parses.
///
/// Braces inside string literals are ignored. If an opening brace is never
/// closed, or its object is not valid JSON, scanning resumes at the next
/// one. When no candidate parses, the first balanced one is returned so the
/// caller can report why it is malformed.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut first = None;
    for candidate in object_candidates(text) {
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return Some(candidate);
        }
        first.get_or_insert(candidate);
    }
    first
}

/// Every balanced `{...}` span in `text`, in order of its opening brace.
fn object_candidates(text: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = text[start..].find('{') {
            let open = start + offset;
            start = open + 1;
            if let Some(len) = balanced_len(&text.as_bytes()[open..]) {
                return Some(&text[open..open + len]);
            }
        }
        None
    })
}

/// Length of the object starting at `bytes[0] == b'{'`, if it closes.
fn balanced_len(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate an oracle answer against `schema`.
pub fn parse_translation(
    schema: &'static EntitySchema,
    raw: &str,
) -> Result<TranslatedFilter, TranslationError> {
    let object = extract_json_object(raw).ok_or_else(|| TranslationError::NoJsonFound {
        raw: raw.to_string(),
    })?;

    let value: Value =
        serde_json::from_str(object).map_err(|source| TranslationError::MalformedJson {
            raw: raw.to_string(),
            source,
        })?;

    let filter = Filter::from_json(schema, &value).map_err(|e| match e {
        FilterError::NotAnObject => TranslationError::NotAnObject {
            raw: raw.to_string(),
        },
        FilterError::UnknownField(field) => TranslationError::UnknownField {
            field,
            raw: raw.to_string(),
        },
        FilterError::InvalidCondition { field, reason } => TranslationError::InvalidCondition {
            field,
            reason,
            raw: raw.to_string(),
        },
    })?;

    Ok(TranslatedFilter {
        filter,
        raw: raw.to_string(),
    })
}

/// Ask the oracle for a filter answering `question`.
pub async fn translate(
    oracle: &dyn Oracle,
    schema: &'static EntitySchema,
    question: &str,
) -> Result<TranslatedFilter, TranslationError> {
    let prompt = build_prompt(schema, question);
    let raw = oracle.complete(&prompt).await?;

    match parse_translation(schema, &raw) {
        Ok(translated) => {
            tracing::debug!(
                collection = schema.collection,
                model = oracle.model_name(),
                filter = %translated.filter.to_json(),
                "translated question"
            );
            Ok(translated)
        }
        Err(e) => {
            tracing::warn!(collection = schema.collection, error = %e, "translation rejected");
            Err(e)
        }
    }
}

/// Translate `question` and run the resulting filter, returning at most
/// `limit` documents.
pub async fn ask(
    oracle: &dyn Oracle,
    store: &dyn DocumentStore,
    schema: &'static EntitySchema,
    question: &str,
    limit: i64,
) -> Result<AskResponse> {
    let translated = translate(oracle, schema, question).await?;
    let results = store.find(schema, &translated.filter, limit).await?;

    Ok(AskResponse {
        prompt: question.to_string(),
        query: translated.filter.to_json(),
        results,
    })
}

/// Run `datalk ask <collection> "<question>"` and print the response as JSON.
pub async fn run_ask(config: &Config, collection: &str, question: &str) -> anyhow::Result<()> {
    let schema = REGISTRY
        .get(collection)
        .ok_or_else(|| crate::Error::UnknownCollection(collection.to_string()))?;

    let oracle = OllamaOracle::from_config(&config.oracle)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    store.ensure_collection(schema).await?;

    let response = ask(&oracle, &store, schema, question, config.query.result_limit).await;
    store.close().await;

    let response = response?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
