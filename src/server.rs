//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/stores` | Create a store |
//! | `GET` | `/stores/{store_id}` | Read a store |
//! | `PUT` | `/stores/{store_id}` | Replace a store |
//! | `DELETE` | `/stores/{store_id}` | Delete a store |
//! | `GET` | `/orders` | List orders (`store_id`, `channel_id`, `order_status`, `limit`) |
//! | `POST` | `/ask/{collection}` | Answer `{"prompt": "..."}` with a translated query |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "stores: no document with key 9" } }
//! ```
//!
//! | Status | Codes |
//! |--------|-------|
//! | 400 | `bad_request`, `translation_failed` |
//! | 404 | `not_found` |
//! | 409 | `duplicate_key` |
//! | 502 | `oracle_unavailable` |
//! | 504 | `oracle_timeout` |
//! | 500 | `internal` |

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::crud::{self, OrderListing, OrderQuery, Store};
use crate::db;
use crate::error::{Error, OracleError, TranslationError};
use crate::oracle::{OllamaOracle, Oracle};
use crate::schema::REGISTRY;
use crate::store::{DocumentStore, SqliteStore};
use crate::translate::{self, AskResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub oracle: Arc<dyn Oracle>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            oracle,
        }
    }
}

/// Build the router with CORS open to all origins.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/stores", post(handle_create_store))
        .route(
            "/stores/{store_id}",
            get(handle_read_store)
                .put(handle_update_store)
                .delete(handle_delete_store),
        )
        .route("/orders", get(handle_list_orders))
        .route("/ask/{collection}", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process ends.
///
/// Collections and indexes are ensured first, so a fresh database serves
/// empty results instead of storage errors.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    crate::migrate::ensure_schema(&store).await?;

    let oracle = OllamaOracle::from_config(&config.oracle)?;
    let state = AppState::new(config.clone(), Arc::new(store), Arc::new(oracle));

    println!("datalk server listening on http://{}", bind_addr);
    println!("  oracle: {} ({})", config.oracle.url, config.oracle.model);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::MalformedRecord(_)
            | Error::KeyMismatch { .. }
            | Error::InvalidFilter(_)
            | Error::InvalidLimit(_) => AppError::bad_request(message),
            Error::NotFound { .. } | Error::UnknownCollection(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            Error::DuplicateKey { .. } => {
                AppError::new(StatusCode::CONFLICT, "duplicate_key", message)
            }
            Error::Translation(TranslationError::Oracle(OracleError::Timeout(_))) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "oracle_timeout", message)
            }
            Error::Translation(TranslationError::Oracle(_)) => {
                AppError::new(StatusCode::BAD_GATEWAY, "oracle_unavailable", message)
            }
            Error::Translation(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "translation_failed", message)
            }
            Error::SourceReadFailure { .. } | Error::Storage(_) | Error::Json(_) => {
                tracing::error!(error = %message, "request failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /stores ============

async fn handle_create_store(
    State(state): State<AppState>,
    body: Result<Json<Store>, JsonRejection>,
) -> Result<(StatusCode, Json<Store>), AppError> {
    let Json(store) = body?;
    crud::create_store(state.store.as_ref(), &store).await?;
    Ok((StatusCode::CREATED, Json(store)))
}

async fn handle_read_store(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Path(store_id) = path?;
    let doc = crud::read_store(state.store.as_ref(), store_id).await?;
    Ok(Json(doc))
}

async fn handle_update_store(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<Store>, JsonRejection>,
) -> Result<Json<Store>, AppError> {
    let Path(store_id) = path?;
    let Json(store) = body?;
    crud::update_store(state.store.as_ref(), store_id, &store).await?;
    Ok(Json(store))
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: i64,
}

async fn handle_delete_store(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeletedResponse>, AppError> {
    let Path(store_id) = path?;
    crud::delete_store(state.store.as_ref(), store_id).await?;
    Ok(Json(DeletedResponse { deleted: store_id }))
}

// ============ GET /orders ============

async fn handle_list_orders(
    State(state): State<AppState>,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> Result<Json<OrderListing>, AppError> {
    let Query(query) = query?;
    let listing = crud::list_orders(
        state.store.as_ref(),
        &query,
        state.config.query.list_limit,
    )
    .await?;
    Ok(Json(listing))
}

// ============ POST /ask/{collection} ============

#[derive(Deserialize)]
struct AskRequest {
    prompt: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = body?;
    if req.prompt.trim().is_empty() {
        return Err(AppError::bad_request("prompt must not be empty"));
    }
    let schema = REGISTRY
        .get(&collection)
        .ok_or_else(|| Error::UnknownCollection(collection.clone()))?;

    let response = translate::ask(
        state.oracle.as_ref(),
        state.store.as_ref(),
        schema,
        &req.prompt,
        state.config.query.result_limit,
    )
    .await?;
    Ok(Json(response))
}
