//! Validated query filters.
//!
//! A [`Filter`] is a conjunction of [`Condition`]s, each bound to a
//! registry [`FieldSpec`] and carrying operands already coerced to the
//! field's type. Filters are built either programmatically (CRUD listing) or
//! from untrusted JSON with [`Filter::from_json`], which accepts the
//! Mongo-style subset
//!
//! ```text
//! { "<field>": <scalar> }                       equality
//! { "<field>": { "$gt": <scalar>, ... } }       $eq $ne $gt $gte $lt $lte
//! { "<field>": { "$in": [<scalar>, ...] } }     $in $nin
//! ```
//!
//! and compiled to a parameterized SQL predicate with [`Filter::to_sql`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::normalize::{parse_datetime_operand, parse_float, parse_int, FieldValue};
use crate::schema::{EntitySchema, FieldSpec, FieldType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl Op {
    pub fn from_operator(s: &str) -> Option<Op> {
        Some(match s {
            "$eq" => Op::Eq,
            "$ne" => Op::Ne,
            "$gt" => Op::Gt,
            "$gte" => Op::Gte,
            "$lt" => Op::Lt,
            "$lte" => Op::Lte,
            "$in" => Op::In,
            "$nin" => Op::Nin,
            _ => return None,
        })
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::In => "$in",
            Op::Nin => "$nin",
        }
    }

    fn takes_list(&self) -> bool {
        matches!(self, Op::In | Op::Nin)
    }

    fn is_ordering(&self) -> bool {
        matches!(self, Op::Gt | Op::Gte | Op::Lt | Op::Lte)
    }

    /// Every supported operator, in display order.
    pub const ALL: [Op; 8] = [
        Op::Eq,
        Op::Ne,
        Op::Gt,
        Op::Gte,
        Op::Lt,
        Op::Lte,
        Op::In,
        Op::Nin,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    One(FieldValue),
    Many(Vec<FieldValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: &'static FieldSpec,
    pub op: Op,
    pub operand: Operand,
}

/// Reasons a JSON filter is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter is not a JSON object")]
    NotAnObject,

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid condition on '{field}': {reason}")]
    InvalidCondition { field: String, reason: String },
}

/// A conjunction of conditions. The empty filter matches everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: &'static FieldSpec, value: FieldValue) -> Self {
        self.conditions.push(Condition {
            field,
            op: Op::Eq,
            operand: Operand::One(value),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Validate untrusted JSON against `schema`.
    ///
    /// Any key that is not a registry field rejects the whole filter.
    pub fn from_json(schema: &'static EntitySchema, value: &Value) -> Result<Filter, FilterError> {
        let obj = value.as_object().ok_or(FilterError::NotAnObject)?;
        let mut filter = Filter::all();

        for (key, cond) in obj {
            let field = schema
                .field(key)
                .ok_or_else(|| FilterError::UnknownField(key.clone()))?;
            let invalid = |reason: String| FilterError::InvalidCondition {
                field: key.clone(),
                reason,
            };

            match cond {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(invalid("empty operator object".to_string()));
                    }
                    for (name, operand) in ops {
                        let op = Op::from_operator(name)
                            .ok_or_else(|| invalid(format!("unsupported operator '{}'", name)))?;
                        let operand = coerce_operand(schema, field, op, operand).map_err(invalid)?;
                        filter.conditions.push(Condition { field, op, operand });
                    }
                }
                Value::Array(_) => {
                    return Err(invalid("lists are only allowed under $in/$nin".to_string()));
                }
                scalar => {
                    let operand = coerce_operand(schema, field, Op::Eq, scalar).map_err(invalid)?;
                    filter.conditions.push(Condition {
                        field,
                        op: Op::Eq,
                        operand,
                    });
                }
            }
        }

        Ok(filter)
    }

    /// Render back to the JSON shape accepted by [`Filter::from_json`].
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for cond in &self.conditions {
            let operand = match &cond.operand {
                Operand::One(v) => v.to_json(),
                Operand::Many(vs) => Value::Array(vs.iter().map(FieldValue::to_json).collect()),
            };
            let only_eq = cond.op == Op::Eq
                && self
                    .conditions
                    .iter()
                    .filter(|c| c.field.name == cond.field.name)
                    .count()
                    == 1;
            if only_eq {
                out.insert(cond.field.name.to_string(), operand);
                continue;
            }
            let entry = out
                .entry(cond.field.name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                ops.insert(cond.op.operator().to_string(), operand);
            }
        }
        Value::Object(out)
    }

    /// Compile to a SQL predicate over a `doc` JSON column.
    ///
    /// Field names come from the registry only; every operand is returned as
    /// a bind parameter, in placeholder order.
    pub fn to_sql(&self) -> (String, Vec<FieldValue>) {
        if self.conditions.is_empty() {
            return ("1 = 1".to_string(), Vec::new());
        }

        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::new();

        for cond in &self.conditions {
            let expr = json_path_expr(cond.field.name);
            let clause = match (&cond.op, &cond.operand) {
                (Op::Eq, Operand::One(FieldValue::Absent)) => format!("{} IS NULL", expr),
                (Op::Ne, Operand::One(FieldValue::Absent)) => format!("{} IS NOT NULL", expr),
                (Op::Eq, Operand::One(v)) => {
                    params.push(v.clone());
                    format!("{} = ?", expr)
                }
                (Op::Ne, Operand::One(v)) => {
                    params.push(v.clone());
                    format!("{} IS NOT ?", expr)
                }
                (op, Operand::One(v)) => {
                    params.push(v.clone());
                    let sym = match op {
                        Op::Gt => ">",
                        Op::Gte => ">=",
                        Op::Lt => "<",
                        _ => "<=",
                    };
                    format!("{} {} ?", expr, sym)
                }
                (op, Operand::Many(values)) => {
                    let with_absent = values.iter().any(FieldValue::is_absent);
                    let present: Vec<&FieldValue> =
                        values.iter().filter(|v| !v.is_absent()).collect();
                    let placeholders = vec!["?"; present.len()].join(", ");
                    params.extend(present.iter().map(|v| (*v).clone()));
                    match (op, present.is_empty(), with_absent) {
                        (Op::In, true, false) => "0".to_string(),
                        (Op::In, true, true) => format!("{} IS NULL", expr),
                        (Op::In, false, false) => format!("{} IN ({})", expr, placeholders),
                        (Op::In, false, true) => {
                            format!("({e} IN ({p}) OR {e} IS NULL)", e = expr, p = placeholders)
                        }
                        (_, true, false) => "1 = 1".to_string(),
                        (_, true, true) => format!("{} IS NOT NULL", expr),
                        (_, false, false) => {
                            format!("({e} IS NULL OR {e} NOT IN ({p}))", e = expr, p = placeholders)
                        }
                        (_, false, true) => format!(
                            "({e} IS NOT NULL AND {e} NOT IN ({p}))",
                            e = expr,
                            p = placeholders
                        ),
                    }
                }
            };
            clauses.push(clause);
        }

        (clauses.join(" AND "), params)
    }
}

/// The SQL expression reading `field` out of a stored document. Index
/// declarations use the same text so the planner can match them.
pub fn json_path_expr(field: &str) -> String {
    format!("json_extract(doc, '$.{}')", field)
}

fn coerce_operand(
    schema: &EntitySchema,
    field: &FieldSpec,
    op: Op,
    value: &Value,
) -> Result<Operand, String> {
    if op.takes_list() {
        let items = value
            .as_array()
            .ok_or_else(|| format!("{} expects a list", op.operator()))?;
        let values = items
            .iter()
            .map(|v| coerce_scalar(schema, field, v))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Operand::Many(values));
    }

    let v = coerce_scalar(schema, field, value)?;
    if op.is_ordering() && v.is_absent() {
        return Err(format!("{} cannot compare with null", op.operator()));
    }
    Ok(Operand::One(v))
}

/// Coerce a JSON operand to the field's declared type, with the same
/// number rules the normalizer applies to CSV cells.
fn coerce_scalar(schema: &EntitySchema, field: &FieldSpec, value: &Value) -> Result<FieldValue, String> {
    let mismatch = || format!("{} is not a valid {}", value, field.ty);
    match (field.ty, value) {
        (_, Value::Null) => Ok(FieldValue::Absent),
        (FieldType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| parse_int(&n.to_string()))
            .map(FieldValue::Int)
            .ok_or_else(mismatch),
        (FieldType::Int, Value::String(s)) => parse_int(s).map(FieldValue::Int).ok_or_else(mismatch),
        (FieldType::Float, Value::Number(n)) => {
            n.as_f64().map(FieldValue::Float).ok_or_else(mismatch)
        }
        (FieldType::Float, Value::String(s)) => {
            parse_float(s).map(FieldValue::Float).ok_or_else(mismatch)
        }
        (FieldType::Str, Value::String(s)) => Ok(FieldValue::Str(s.clone())),
        (FieldType::Str, Value::Number(n)) => Ok(FieldValue::Str(n.to_string())),
        (FieldType::DateTime, Value::String(s)) => parse_datetime_operand(s, schema.timestamp_format)
            .map(FieldValue::DateTime)
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}
