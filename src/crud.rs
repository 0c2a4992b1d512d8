//! Store CRUD and order listing.
//!
//! Thin operations over [`DocumentStore`] shared by the HTTP server. Every
//! document written here goes through the same normalization as ingested
//! rows, so API writes and CSV loads produce identical shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::normalize::normalize_json;
use crate::schema::{ORDERS, STORES};
use crate::store::DocumentStore;

/// A store as accepted by the API. Every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub store_id: i64,
    pub hub_id: i64,
    pub store_name: String,
    pub store_segment: String,
    pub store_plan_price: f64,
    pub store_latitude: f64,
    pub store_longitude: f64,
}

/// Optional equality filters for order listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub store_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub order_status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderListing {
    pub query: Value,
    pub results: Vec<Value>,
}

fn store_document(store: &Store) -> Result<crate::normalize::Document> {
    let body = serde_json::to_value(store)?;
    Ok(normalize_json(&STORES, &body)?)
}

pub async fn create_store(db: &dyn DocumentStore, store: &Store) -> Result<()> {
    let doc = store_document(store)?;
    db.insert_one(&STORES, &doc).await?;
    tracing::info!(store_id = store.store_id, "store created");
    Ok(())
}

pub async fn read_store(db: &dyn DocumentStore, store_id: i64) -> Result<Value> {
    db.find_one(&STORES, &store_id.to_string())
        .await?
        .ok_or_else(|| Error::NotFound {
            collection: STORES.collection.to_string(),
            key: store_id.to_string(),
        })
}

/// Replace the store stored under `store_id`. The body must carry the same id.
pub async fn update_store(db: &dyn DocumentStore, store_id: i64, store: &Store) -> Result<()> {
    if store.store_id != store_id {
        return Err(Error::KeyMismatch {
            key_field: STORES.natural_key.to_string(),
            expected: store_id.to_string(),
            found: store.store_id.to_string(),
        });
    }
    let doc = store_document(store)?;
    if !db.replace_one(&STORES, &doc.key, &doc).await? {
        return Err(Error::NotFound {
            collection: STORES.collection.to_string(),
            key: store_id.to_string(),
        });
    }
    tracing::info!(store_id, "store updated");
    Ok(())
}

pub async fn delete_store(db: &dyn DocumentStore, store_id: i64) -> Result<()> {
    if !db.delete_one(&STORES, &store_id.to_string()).await? {
        return Err(Error::NotFound {
            collection: STORES.collection.to_string(),
            key: store_id.to_string(),
        });
    }
    tracing::info!(store_id, "store deleted");
    Ok(())
}

/// List orders matching every given field, at most `limit` (default
/// `default_limit`).
pub async fn list_orders(
    db: &dyn DocumentStore,
    query: &OrderQuery,
    default_limit: i64,
) -> Result<OrderListing> {
    let limit = query.limit.unwrap_or(default_limit);
    if limit < 1 {
        return Err(Error::InvalidLimit(limit));
    }

    let mut conditions = Map::new();
    if let Some(id) = query.store_id {
        conditions.insert("store_id".to_string(), Value::from(id));
    }
    if let Some(id) = query.channel_id {
        conditions.insert("channel_id".to_string(), Value::from(id));
    }
    if let Some(status) = &query.order_status {
        conditions.insert("order_status".to_string(), Value::from(status.as_str()));
    }
    let conditions = Value::Object(conditions);
    let filter = Filter::from_json(&ORDERS, &conditions)?;

    let results = db.find(&ORDERS, &filter, limit).await?;
    Ok(OrderListing {
        query: conditions,
        results,
    })
}
