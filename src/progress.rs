//! Ingest progress reporting.
//!
//! Reports cumulative progress after every batch of `datalk ingest`, so
//! users see how far a long load has come. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// The target collection was dropped for a fresh load.
    Cleared { collection: String },
    /// A batch was normalized and written.
    Batch {
        collection: String,
        batch: u64,
        rows: u64,
        written: u64,
    },
    /// Index construction started.
    Indexing { collection: String },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest orders  batch 3  150,000 rows".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Cleared { collection } => {
                format!("ingest {}  cleared (fresh load)\n", collection)
            }
            IngestProgressEvent::Batch {
                collection,
                batch,
                rows,
                written,
            } => format!(
                "ingest {}  batch {}  {} rows  {} written\n",
                collection,
                batch,
                format_number(*rows),
                format_number(*written)
            ),
            IngestProgressEvent::Indexing { collection } => {
                format!("ingest {}  building indexes...\n", collection)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Cleared { collection } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "cleared"
            }),
            IngestProgressEvent::Batch {
                collection,
                batch,
                rows,
                written,
            } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "loading",
                "batch": batch,
                "rows": rows,
                "written": written
            }),
            IngestProgressEvent::Indexing { collection } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "indexing"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(50_000), "50,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
