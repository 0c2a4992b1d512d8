//! Raw row → typed document conversion.
//!
//! Pure functions only: the same row and schema always produce the same
//! [`Document`]. Timestamps that are blank or do not match the schema's
//! format become [`FieldValue::Absent`]; numeric text that does not parse is
//! a [`MalformedRecord`].

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::error::MalformedRecord;
use crate::schema::{DatePart, EntitySchema, FieldType};

/// Format used when a timestamp is written into a stored document.
pub const STORED_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Cell contents treated as missing, in addition to blank text.
const NULL_TOKENS: &[&str] = &["NA", "N/A", "NaN", "nan", "NULL", "null"];

/// A typed field value. `Absent` is stored as JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Absent,
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Absent => Value::Null,
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::DateTime(dt) => {
                Value::String(dt.format(STORED_DATETIME_FORMAT).to_string())
            }
        }
    }

    /// Text form used for the natural-key column. `None` for `Absent`.
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::Absent => None,
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Str(s) => Some(s.clone()),
            FieldValue::DateTime(dt) => Some(dt.format(STORED_DATETIME_FORMAT).to_string()),
        }
    }
}

/// Anything that can hand out a raw cell by column name.
pub trait RawRow {
    fn get(&self, column: &str) -> Option<&str>;
}

impl RawRow for HashMap<String, String> {
    fn get(&self, column: &str) -> Option<&str> {
        HashMap::get(self, column).map(String::as_str)
    }
}

impl RawRow for BTreeMap<String, String> {
    fn get(&self, column: &str) -> Option<&str> {
        BTreeMap::get(self, column).map(String::as_str)
    }
}

/// A normalized document ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Natural key rendered as text.
    pub key: String,
    /// Every schema field, in declaration order.
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl Document {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect();
        Value::Object(map)
    }
}

pub fn is_blank(raw: &str) -> bool {
    let t = raw.trim();
    t.is_empty() || NULL_TOKENS.contains(&t)
}

/// Parse integer text. Integral float renderings (`"12.0"`) are accepted.
pub fn parse_int(raw: &str) -> Option<i64> {
    let t = raw.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Some(i);
    }
    let f = t.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

pub fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a timestamp operand supplied by a query: the source format, the
/// stored ISO format, or a bare `YYYY-MM-DD` date (midnight).
pub fn parse_datetime_operand(raw: &str, source_format: &str) -> Option<NaiveDateTime> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, source_format)
        .or_else(|_| NaiveDateTime::parse_from_str(t, STORED_DATETIME_FORMAT))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(t, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Coerce one raw cell to `ty`.
///
/// Returns `None` only when the text is present but not of the declared
/// type. Blank cells and unparsable timestamps yield `Some(Absent)`.
pub fn coerce(ty: FieldType, raw: &str, timestamp_format: &str) -> Option<FieldValue> {
    if is_blank(raw) {
        return Some(FieldValue::Absent);
    }
    match ty {
        FieldType::Int => parse_int(raw).map(FieldValue::Int),
        FieldType::Float => parse_float(raw).map(FieldValue::Float),
        FieldType::Str => Some(FieldValue::Str(raw.trim().to_string())),
        FieldType::DateTime => Some(
            NaiveDateTime::parse_from_str(raw.trim(), timestamp_format)
                .map(FieldValue::DateTime)
                .unwrap_or(FieldValue::Absent),
        ),
    }
}

/// Normalize one source row against `schema`.
///
/// `row_index` is only used for error reporting.
pub fn normalize_row<R: RawRow + ?Sized>(
    schema: &EntitySchema,
    row_index: u64,
    row: &R,
) -> Result<Document, MalformedRecord> {
    let mut fields = Vec::with_capacity(schema.fields.len());

    for spec in schema.fields {
        let raw = row.get(spec.name).unwrap_or("");
        let value =
            coerce(spec.ty, raw, schema.timestamp_format).ok_or_else(|| MalformedRecord {
                row: row_index,
                field: spec.name.to_string(),
                value: raw.to_string(),
                expected: spec.ty,
            })?;
        fields.push((spec.name, value));
    }

    fill_derived(schema, &mut fields);

    let key = fields
        .iter()
        .find(|(name, _)| *name == schema.natural_key)
        .and_then(|(_, v)| v.key_string())
        .ok_or_else(|| MalformedRecord {
            row: row_index,
            field: schema.natural_key.to_string(),
            value: row.get(schema.natural_key).unwrap_or("").to_string(),
            expected: schema
                .field(schema.natural_key)
                .map(|f| f.ty)
                .unwrap_or(FieldType::Str),
        })?;

    Ok(Document { key, fields })
}

/// Normalize a JSON object (an API request body) with the same rules as a
/// source row. Scalars are read back as cell text; `null` and missing keys
/// are blank cells. Reported row index is 0.
pub fn normalize_json(schema: &EntitySchema, value: &Value) -> Result<Document, MalformedRecord> {
    let cells: HashMap<String, String> = value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((k.clone(), text))
                })
                .collect()
        })
        .unwrap_or_default();
    normalize_row(schema, 0, &cells)
}

fn fill_derived(schema: &EntitySchema, fields: &mut [(&'static str, FieldValue)]) {
    for spec in schema.fields {
        let Some(derivation) = spec.derived else {
            continue;
        };
        let source = fields.iter().find_map(|(name, v)| match v {
            FieldValue::DateTime(dt) if *name == derivation.from => Some(*dt),
            _ => None,
        });
        let Some(dt) = source else {
            continue;
        };
        if let Some((_, value)) = fields
            .iter_mut()
            .find(|(name, v)| *name == spec.name && v.is_absent())
        {
            *value = FieldValue::Int(match derivation.part {
                DatePart::Year => dt.year() as i64,
                DatePart::Month => dt.month() as i64,
                DatePart::Day => dt.day() as i64,
            });
        }
    }
}
