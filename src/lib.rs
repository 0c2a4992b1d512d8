//! # datalk
//!
//! Loads retail `stores` and `orders` CSV exports into a SQLite-backed
//! document store and answers natural-language questions about them by
//! asking a language model for a filter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐
//! │ CSV file │──▶│ Normalizer │──▶│  SQLite   │
//! │ (chunks) │   │  (schema)  │   │ JSON docs │
//! └──────────┘   └────────────┘   └─────┬─────┘
//!                                       │
//!   question ──▶ Oracle ──▶ Filter ─────┤
//!                                       ▼
//!                           ┌──────────┐ ┌──────────┐
//!                           │   CLI    │ │   HTTP   │
//!                           │ (datalk) │ │  (axum)  │
//!                           └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! datalk init                         # create collections and indexes
//! datalk ingest all                   # load every configured source
//! datalk ask stores "pizza places on plan 49"
//! datalk serve                        # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`schema`] | Field, type, alias and index registry |
//! | [`normalize`] | Raw row → typed document |
//! | [`source`] | Chunked CSV reading |
//! | [`ingest`] | Batch load pipeline |
//! | [`progress`] | Ingest progress on stderr |
//! | [`store`] | Document store trait and SQLite implementation |
//! | [`filter`] | Validated filters compiled to SQL |
//! | [`oracle`] | Language-model client |
//! | [`translate`] | Question → filter → results |
//! | [`crud`] | Store CRUD and order listing |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Collection and index setup |
//! | [`stats`] | Collection counts and indexes |
//! | [`error`] | Error taxonomy |

pub mod config;
pub mod crud;
pub mod db;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod migrate;
pub mod normalize;
pub mod oracle;
pub mod progress;
pub mod schema;
pub mod server;
pub mod source;
pub mod stats;
pub mod store;
pub mod translate;

pub use error::{Error, Result};
