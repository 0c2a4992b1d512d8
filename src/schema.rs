//! Schema registry for the `stores` and `orders` collections.
//!
//! Every consumer (normalizer, query translator, document store, CRUD
//! filters) reads field names, types, aliases and index declarations from
//! the statics defined here. Nothing else in the crate spells out a field
//! list.
//!
//! | Collection | Natural key | Indexes |
//! |------------|-------------|---------|
//! | `stores`   | `store_id`  | `uq_store_id`, `idx_hub_id` |
//! | `orders`   | `order_id`  | `uq_order_id`, `idx_store_id`, `idx_channel_id`, `idx_order_status`, `idx_created_ymd` |

use serde::Serialize;
use std::fmt;

/// Primitive type tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Str,
    DateTime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar component extracted from a timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
}

/// A field whose value falls back to a part of another (timestamp) field
/// when the source leaves it blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derivation {
    pub from: &'static str,
    pub part: DatePart,
}

/// One field of an entity.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical name, used as the document key.
    pub name: &'static str,
    /// Human-language alias shown to the language model.
    pub alias: &'static str,
    pub ty: FieldType,
    pub derived: Option<Derivation>,
}

/// A secondary (or unique) index over one or more fields.
#[derive(Debug)]
pub struct IndexSpec {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub unique: bool,
}

/// Full description of one collection.
#[derive(Debug)]
pub struct EntitySchema {
    pub collection: &'static str,
    pub natural_key: &'static str,
    /// `chrono` format string for every `datetime` field of this entity.
    pub timestamp_format: &'static str,
    pub fields: &'static [FieldSpec],
    pub indexes: &'static [IndexSpec],
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `(alias, canonical name)` pairs in declaration order.
    pub fn aliases(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.fields.iter().map(|f| (f.alias, f.name))
    }
}

/// The process-wide set of entity schemas.
#[derive(Debug)]
pub struct SchemaRegistry {
    entities: &'static [&'static EntitySchema],
}

impl SchemaRegistry {
    pub fn get(&self, collection: &str) -> Option<&'static EntitySchema> {
        self.entities
            .iter()
            .copied()
            .find(|e| e.collection == collection)
    }

    pub fn entities(&self) -> &'static [&'static EntitySchema] {
        self.entities
    }

    pub fn collection_names(&self) -> Vec<&'static str> {
        self.entities.iter().map(|e| e.collection).collect()
    }
}

const fn field(name: &'static str, alias: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        alias,
        ty,
        derived: None,
    }
}

const fn derived(name: &'static str, alias: &'static str, from: &'static str, part: DatePart) -> FieldSpec {
    FieldSpec {
        name,
        alias,
        ty: FieldType::Int,
        derived: Some(Derivation { from, part }),
    }
}

/// US-style 12-hour timestamps, e.g. `1/21/2021 12:01:44 AM`.
pub const US_AMPM_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

pub static STORES: EntitySchema = EntitySchema {
    collection: "stores",
    natural_key: "store_id",
    timestamp_format: US_AMPM_FORMAT,
    fields: &[
        field("store_id", "store id", FieldType::Int),
        field("hub_id", "hub id", FieldType::Int),
        field("store_name", "store name", FieldType::Str),
        field("store_segment", "segment", FieldType::Str),
        field("store_plan_price", "plan price", FieldType::Float),
        field("store_latitude", "latitude", FieldType::Float),
        field("store_longitude", "longitude", FieldType::Float),
    ],
    indexes: &[
        IndexSpec {
            name: "uq_store_id",
            fields: &["store_id"],
            unique: true,
        },
        IndexSpec {
            name: "idx_hub_id",
            fields: &["hub_id"],
            unique: false,
        },
    ],
};

pub static ORDERS: EntitySchema = EntitySchema {
    collection: "orders",
    natural_key: "order_id",
    timestamp_format: US_AMPM_FORMAT,
    fields: &[
        field("order_id", "order id", FieldType::Int),
        field("store_id", "store id", FieldType::Int),
        field("channel_id", "sales channel id", FieldType::Int),
        field("payment_order_id", "payment id", FieldType::Int),
        field("delivery_order_id", "delivery id", FieldType::Int),
        field("order_status", "order status", FieldType::Str),
        field("order_amount", "order amount", FieldType::Float),
        field("order_delivery_fee", "delivery fee", FieldType::Float),
        field("order_delivery_cost", "delivery cost", FieldType::Float),
        field("order_created_hour", "hour created", FieldType::Int),
        field("order_created_minute", "minute created", FieldType::Int),
        derived(
            "order_created_day",
            "day created",
            "order_moment_created",
            DatePart::Day,
        ),
        derived(
            "order_created_month",
            "month created",
            "order_moment_created",
            DatePart::Month,
        ),
        derived(
            "order_created_year",
            "year created",
            "order_moment_created",
            DatePart::Year,
        ),
        field("order_moment_created", "created at", FieldType::DateTime),
        field("order_moment_accepted", "accepted at", FieldType::DateTime),
        field("order_moment_ready", "ready at", FieldType::DateTime),
        field("order_moment_collected", "collected at", FieldType::DateTime),
        field(
            "order_moment_in_expedition",
            "in expedition at",
            FieldType::DateTime,
        ),
        field("order_moment_delivering", "delivering at", FieldType::DateTime),
        field("order_moment_delivered", "delivered at", FieldType::DateTime),
        field("order_moment_finished", "finished at", FieldType::DateTime),
        field(
            "order_metric_collected_time",
            "collection time",
            FieldType::Float,
        ),
        field("order_metric_paused_time", "paused time", FieldType::Float),
        field(
            "order_metric_production_time",
            "production time",
            FieldType::Float,
        ),
        field("order_metric_walking_time", "walking time", FieldType::Float),
        field(
            "order_metric_expediton_speed_time",
            "expedition speed time",
            FieldType::Float,
        ),
        field("order_metric_transit_time", "transit time", FieldType::Float),
        field("order_metric_cycle_time", "cycle time", FieldType::Float),
    ],
    indexes: &[
        IndexSpec {
            name: "uq_order_id",
            fields: &["order_id"],
            unique: true,
        },
        IndexSpec {
            name: "idx_store_id",
            fields: &["store_id"],
            unique: false,
        },
        IndexSpec {
            name: "idx_channel_id",
            fields: &["channel_id"],
            unique: false,
        },
        IndexSpec {
            name: "idx_order_status",
            fields: &["order_status"],
            unique: false,
        },
        IndexSpec {
            name: "idx_created_ymd",
            fields: &[
                "order_created_year",
                "order_created_month",
                "order_created_day",
            ],
            unique: false,
        },
    ],
};

pub static REGISTRY: SchemaRegistry = SchemaRegistry {
    entities: &[&STORES, &ORDERS],
};
