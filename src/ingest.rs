//! Ingestion pipeline orchestration.
//!
//! Coordinates the load flow: CSV source → batch → normalization → bulk
//! write → index construction. Each batch is one transaction; a failed run
//! leaves earlier batches committed.
//!
//! Re-running is safe in both modes:
//!
//! | Mode | Before loading | Existing key |
//! |------|----------------|--------------|
//! | `fresh` | collection dropped | n/a (duplicates inside the source are rejected) |
//! | `incremental` | nothing | replaced (`on_conflict = "replace"`) or kept (`"keep"`) |

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;

use crate::config::Config;
use crate::db;
use crate::error::{MalformedRecord, Result, WriteFailure};
use crate::filter::Filter;
use crate::normalize::normalize_row;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::schema::{EntitySchema, REGISTRY};
use crate::source::CsvSource;
use crate::store::{create_indexes, DocumentStore, SqliteStore, WriteMode};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Drop and rebuild the collection.
    Fresh,
    /// Load on top of what is there, keyed by the natural key.
    #[default]
    Incremental,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Replace,
    Keep,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub mode: IngestMode,
    pub on_conflict: ConflictPolicy,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl IngestOptions {
    fn write_mode(&self) -> WriteMode {
        match (self.mode, self.on_conflict) {
            (IngestMode::Fresh, _) => WriteMode::InsertOnly,
            (IngestMode::Incremental, ConflictPolicy::Replace) => WriteMode::Upsert,
            (IngestMode::Incremental, ConflictPolicy::Keep) => WriteMode::InsertIfAbsent,
        }
    }
}

/// What one ingestion run did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub mode: IngestMode,
    pub dry_run: bool,
    pub batches: u64,
    pub rows_read: u64,
    /// Documents inserted or replaced (would-be writes on a dry run).
    pub written: u64,
    /// Documents left as they were because their key already existed.
    pub unchanged: u64,
    pub malformed: Vec<MalformedRecord>,
    pub rejected: Vec<WriteFailure>,
    /// Documents in the collection after the run. `None` on a dry run.
    pub documents: Option<u64>,
}

impl IngestReport {
    fn new(schema: &EntitySchema, options: &IngestOptions) -> Self {
        Self {
            collection: schema.collection.to_string(),
            mode: options.mode,
            dry_run: options.dry_run,
            batches: 0,
            rows_read: 0,
            written: 0,
            unchanged: 0,
            malformed: Vec::new(),
            rejected: Vec::new(),
            documents: None,
        }
    }
}

/// Load every row of `source` into `schema`'s collection.
///
/// Malformed rows and rejected documents are recorded in the report. A
/// source read failure or a storage failure aborts the run with an error.
pub async fn ingest<R: Read>(
    store: &dyn DocumentStore,
    schema: &EntitySchema,
    source: &mut CsvSource<R>,
    options: &IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let mut report = IngestReport::new(schema, options);
    let write_mode = options.write_mode();

    for field in schema.fields.iter().filter(|f| f.derived.is_none()) {
        if !source.columns().any(|c| c == field.name) {
            tracing::warn!(
                collection = schema.collection,
                field = field.name,
                "source has no column for field; it will be absent"
            );
        }
    }

    if !options.dry_run {
        if options.mode == IngestMode::Fresh {
            store.drop_collection(schema).await?;
            progress.report(IngestProgressEvent::Cleared {
                collection: schema.collection.to_string(),
            });
        }
        store.ensure_collection(schema).await?;
    }

    loop {
        let rows = source.next_batch(options.batch_size)?;
        if rows.is_empty() {
            break;
        }
        report.batches += 1;
        report.rows_read += rows.len() as u64;

        let mut docs = Vec::with_capacity(rows.len());
        for (row_index, row) in &rows {
            match normalize_row(schema, *row_index, row) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    tracing::warn!(
                        collection = schema.collection,
                        row = e.row,
                        field = %e.field,
                        value = %e.value,
                        "skipping malformed row"
                    );
                    report.malformed.push(e);
                }
            }
        }
        drop(rows);

        if options.dry_run {
            report.written += docs.len() as u64;
        } else {
            let result = store.insert_many(schema, &docs, write_mode).await?;
            for failure in &result.failures {
                tracing::warn!(
                    collection = schema.collection,
                    batch = report.batches,
                    key = %failure.key,
                    kind = ?failure.kind,
                    "document rejected"
                );
            }
            report.written += result.written;
            report.unchanged += result.unchanged;
            report.rejected.extend(result.failures);
        }

        tracing::debug!(
            collection = schema.collection,
            batch = report.batches,
            rows = report.rows_read,
            "batch done"
        );
        progress.report(IngestProgressEvent::Batch {
            collection: schema.collection.to_string(),
            batch: report.batches,
            rows: report.rows_read,
            written: report.written,
        });
    }

    if !options.dry_run {
        progress.report(IngestProgressEvent::Indexing {
            collection: schema.collection.to_string(),
        });
        create_indexes(store, schema).await?;
        report.documents = Some(store.count(schema, &Filter::all()).await?);
    }

    tracing::info!(
        collection = schema.collection,
        rows = report.rows_read,
        written = report.written,
        malformed = report.malformed.len(),
        rejected = report.rejected.len(),
        "ingest finished"
    );

    Ok(report)
}

/// CLI-level overrides for `datalk ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub path: Option<PathBuf>,
    pub mode: Option<IngestMode>,
    pub on_conflict: Option<ConflictPolicy>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
}

/// Run `datalk ingest <target>`, where target is a collection name or `all`.
pub async fn run_ingest(
    config: &Config,
    target: &str,
    args: IngestArgs,
    progress_mode: ProgressMode,
) -> anyhow::Result<()> {
    let schemas: Vec<&'static EntitySchema> = if target == "all" {
        if args.path.is_some() {
            bail!("--path can only be used with a single collection");
        }
        REGISTRY.entities().to_vec()
    } else {
        match REGISTRY.get(target) {
            Some(schema) => vec![schema],
            None => bail!(
                "Unknown collection: '{}'. Available: all, {}",
                target,
                REGISTRY.collection_names().join(", ")
            ),
        }
    };

    let options = IngestOptions {
        mode: args.mode.unwrap_or(config.ingest.mode),
        on_conflict: args.on_conflict.unwrap_or(config.ingest.on_conflict),
        batch_size: args.batch_size.unwrap_or(config.ingest.batch_size),
        dry_run: args.dry_run,
    };
    if options.batch_size == 0 {
        bail!("--batch-size must be > 0");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let reporter = progress_mode.reporter();

    for schema in schemas {
        let source_cfg = config.sources.get(schema.collection);
        let path = match (&args.path, source_cfg) {
            (Some(p), _) => p.clone(),
            (None, Some(s)) => s.path.clone(),
            (None, None) => bail!(
                "No source configured for '{}'. Add [sources.{}] to the config or pass --path.",
                schema.collection,
                schema.collection
            ),
        };
        let source_options = source_cfg
            .map(|s| s.options())
            .transpose()?
            .unwrap_or_default();

        let mut source = CsvSource::open(&path, source_options)
            .with_context(|| format!("Failed to open source for '{}'", schema.collection))?;
        let report = ingest(&store, schema, &mut source, &options, reporter.as_ref())
            .await
            .with_context(|| format!("Ingest of '{}' aborted", schema.collection))?;

        print_report(&report);
    }

    store.close().await;
    Ok(())
}

fn print_report(report: &IngestReport) {
    let mode = match report.mode {
        IngestMode::Fresh => "fresh",
        IngestMode::Incremental => "incremental",
    };
    if report.dry_run {
        println!("ingest {} (dry-run)", report.collection);
    } else {
        println!("ingest {}", report.collection);
    }
    println!("  mode: {}", mode);
    println!("  batches: {}", report.batches);
    println!("  rows read: {}", report.rows_read);
    println!("  written: {}", report.written);
    println!("  unchanged: {}", report.unchanged);
    println!("  malformed rows: {}", report.malformed.len());
    println!("  rejected documents: {}", report.rejected.len());
    if let Some(n) = report.documents {
        println!("  documents in collection: {}", n);
    }
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::schema::STORES;
    use crate::source::SourceOptions;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const STORES_CSV: &str = "\
store_id,hub_id,store_name,store_segment,store_plan_price,store_latitude,store_longitude
3,2,CUMIURI,FOOD,0,-30.0374149,-51.20352
6,3,PIMUIMA,FOOD,0,-30.0374149,-51.20352
8,3,MSAMIMPIT,FOOD,0,-30.0374149,-51.20352
53,8,PURGRIPI,FOOD,49,-22.921475,-43.234718
54,8,VUZPURUZ,FOOD,49,-22.921475,-43.234718
";

    struct Recorder(Mutex<Vec<IngestProgressEvent>>);

    impl IngestProgressReporter for Recorder {
        fn report(&self, event: IngestProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    async fn open() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn options(mode: IngestMode, batch_size: usize) -> IngestOptions {
        IngestOptions {
            mode,
            on_conflict: ConflictPolicy::Replace,
            batch_size,
            dry_run: false,
        }
    }

    fn source(csv: &str) -> CsvSource<&[u8]> {
        CsvSource::from_reader(csv.as_bytes(), SourceOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn reports_cumulative_rows_after_each_batch() {
        let (_tmp, store) = open().await;
        let recorder = Recorder(Mutex::new(Vec::new()));

        let report = ingest(
            &store,
            &STORES,
            &mut source(STORES_CSV),
            &options(IngestMode::Fresh, 2),
            &recorder,
        )
        .await
        .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.documents, Some(5));

        let rows: Vec<u64> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                IngestProgressEvent::Batch { rows, .. } => Some(*rows),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn incremental_rerun_does_not_duplicate() {
        let (_tmp, store) = open().await;
        let opts = options(IngestMode::Incremental, 2);

        let first = ingest(&store, &STORES, &mut source(STORES_CSV), &opts, &NoProgress)
            .await
            .unwrap();
        let second = ingest(&store, &STORES, &mut source(STORES_CSV), &opts, &NoProgress)
            .await
            .unwrap();

        assert_eq!(first.documents, Some(5));
        assert_eq!(second.documents, Some(5));
        assert!(second.rejected.is_empty());
    }

    #[tokio::test]
    async fn keep_policy_leaves_existing_documents() {
        let (_tmp, store) = open().await;
        ingest(
            &store,
            &STORES,
            &mut source(STORES_CSV),
            &options(IngestMode::Fresh, 10),
            &NoProgress,
        )
        .await
        .unwrap();

        let changed = STORES_CSV.replace("CUMIURI", "RENAMED");
        let keep = IngestOptions {
            on_conflict: ConflictPolicy::Keep,
            ..options(IngestMode::Incremental, 10)
        };
        let report = ingest(&store, &STORES, &mut source(&changed), &keep, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.unchanged, 5);
        let doc = store.find_one(&STORES, "3").await.unwrap().unwrap();
        assert_eq!(doc["store_name"], "CUMIURI");
    }

    #[tokio::test]
    async fn fresh_load_rejects_duplicates_inside_the_source() {
        let (_tmp, store) = open().await;
        let csv = format!("{}3,9,DUPLICATE,FOOD,1,0,0\n", STORES_CSV);

        let report = ingest(
            &store,
            &STORES,
            &mut source(&csv),
            &options(IngestMode::Fresh, 100),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.written, 5);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].key, "3");
        assert_eq!(report.documents, Some(5));
    }

    #[tokio::test]
    async fn fresh_load_discards_previous_contents() {
        let (_tmp, store) = open().await;
        ingest(
            &store,
            &STORES,
            &mut source(STORES_CSV),
            &options(IngestMode::Incremental, 10),
            &NoProgress,
        )
        .await
        .unwrap();

        let smaller = "store_id,hub_id\n100,1\n";
        let report = ingest(
            &store,
            &STORES,
            &mut source(smaller),
            &options(IngestMode::Fresh, 10),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(report.documents, Some(1));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let (_tmp, store) = open().await;
        let csv = format!("{}99,1,BAD,FOOD,lots,0,0\n", STORES_CSV);
        let opts = IngestOptions {
            dry_run: true,
            ..options(IngestMode::Fresh, 10)
        };

        let report = ingest(&store, &STORES, &mut source(&csv), &opts, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.written, 5);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.documents, None);
        assert!(store.list_indexes(&STORES).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn source_failure_keeps_committed_batches() {
        let (_tmp, store) = open().await;
        let mut bytes = STORES_CSV.as_bytes().to_vec();
        bytes.extend_from_slice(b"77,1,\xff\xff,FOOD,1,0,0\n");
        let mut src = CsvSource::from_reader(&bytes[..], SourceOptions::default()).unwrap();

        let err = ingest(&store, &STORES, &mut src, &options(IngestMode::Fresh, 5), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::SourceReadFailure { row: 6, .. }));

        assert_eq!(store.count(&STORES, &Filter::all()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn read_only_database_aborts_the_run() {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ro.sqlite");
        let connect = |read_only: bool| {
            SqlitePoolOptions::new().max_connections(1).connect_with(
                SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(!read_only)
                    .read_only(read_only)
                    .journal_mode(SqliteJournalMode::Delete),
            )
        };

        let store = SqliteStore::new(connect(false).await.unwrap());
        store.ensure_collection(&STORES).await.unwrap();
        store.close().await;

        let store = SqliteStore::new(connect(true).await.unwrap());
        let recorder = Recorder(Mutex::new(Vec::new()));
        let result = ingest(
            &store,
            &STORES,
            &mut source(STORES_CSV),
            &options(IngestMode::Incremental, 2),
            &recorder,
        )
        .await;

        assert!(result.is_err(), "{result:?}");
        assert!(!recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, IngestProgressEvent::Batch { .. })));
        assert_eq!(store.count(&STORES, &Filter::all()).await.unwrap(), 0);
    }
}
