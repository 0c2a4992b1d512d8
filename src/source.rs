//! Chunked CSV reading.
//!
//! [`CsvSource`] reads one header row and then hands out bounded batches of
//! rows, so peak memory is proportional to the batch size rather than the
//! file size. Cells are decoded from the declared [`SourceEncoding`].

use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::normalize::RawRow;

/// Text encoding of a source file, resolved from a label such as `utf-8`,
/// `latin-1` or `windows-1252`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// Exact ISO-8859-1: byte `n` decodes to code point `n`.
    Latin1,
    Labeled(&'static Encoding),
}

impl Default for SourceEncoding {
    fn default() -> Self {
        SourceEncoding::Labeled(UTF_8)
    }
}

impl SourceEncoding {
    /// Resolve a label. `latin-1` and its aliases keep ISO-8859-1 semantics
    /// instead of the windows-1252 mapping the web labels would give them.
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "latin-1" | "latin1" | "l1" | "iso-8859-1" | "iso8859-1" | "iso_8859-1" => {
                Some(SourceEncoding::Latin1)
            }
            _ => Encoding::for_label(label.as_bytes()).map(SourceEncoding::Labeled),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Latin1 => "latin-1",
            SourceEncoding::Labeled(encoding) => encoding.name(),
        }
    }

    fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            SourceEncoding::Latin1 => Some(encoding_rs::mem::decode_latin1(bytes)),
            SourceEncoding::Labeled(encoding) => {
                encoding.decode_without_bom_handling_and_without_replacement(bytes)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    pub delimiter: u8,
    pub encoding: SourceEncoding,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: SourceEncoding::default(),
        }
    }
}

#[derive(Debug)]
struct Columns {
    index: HashMap<String, usize>,
}

/// One decoded data row. Column lookup is shared across the whole source.
#[derive(Debug, Clone)]
pub struct SourceRow {
    columns: Arc<Columns>,
    values: Vec<String>,
}

impl RawRow for SourceRow {
    fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .index
            .get(column)
            .and_then(|&i| self.values.get(i))
            .map(String::as_str)
    }
}

/// A CSV source read in batches.
pub struct CsvSource<R> {
    reader: csv::Reader<R>,
    columns: Arc<Columns>,
    encoding: SourceEncoding,
    record: csv::ByteRecord,
    rows_read: u64,
    exhausted: bool,
}

impl CsvSource<File> {
    pub fn open(path: &Path, options: SourceOptions) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::SourceReadFailure {
            row: 0,
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_reader(file, options)
    }
}

impl<R: Read> CsvSource<R> {
    /// Wrap a reader and consume the header row.
    pub fn from_reader(rdr: R, options: SourceOptions) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(rdr);

        let headers = reader
            .byte_headers()
            .map_err(|e| Error::SourceReadFailure {
                row: 0,
                message: e.to_string(),
            })?
            .clone();

        let mut index = HashMap::with_capacity(headers.len());
        for (i, raw) in headers.iter().enumerate() {
            let raw = match Encoding::for_bom(raw) {
                Some((_, bom_len)) if i == 0 => &raw[bom_len..],
                _ => raw,
            };
            let name = options
                .encoding
                .decode(raw)
                .ok_or_else(|| Error::SourceReadFailure {
                    row: 0,
                    message: format!("header column {} is not valid {}", i, options.encoding.name()),
                })?;
            let name = name.trim().to_string();
            index.entry(name).or_insert(i);
        }

        Ok(Self {
            reader,
            columns: Arc::new(Columns { index }),
            encoding: options.encoding,
            record: csv::ByteRecord::new(),
            rows_read: 0,
            exhausted: false,
        })
    }

    /// Column names found in the header, in no particular order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.index.keys().map(String::as_str)
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read up to `max` rows. Each row is paired with its 1-based index.
    /// An empty batch means the source is exhausted.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<(u64, SourceRow)>> {
        let mut batch = Vec::with_capacity(max.min(4096));
        while !self.exhausted && batch.len() < max {
            let row_index = self.rows_read + 1;
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .map_err(|e| Error::SourceReadFailure {
                    row: row_index,
                    message: e.to_string(),
                })?;
            if !more {
                self.exhausted = true;
                break;
            }

            let mut values = Vec::with_capacity(self.record.len());
            for (i, cell) in self.record.iter().enumerate() {
                let text = self
                    .encoding
                    .decode(cell)
                    .ok_or_else(|| Error::SourceReadFailure {
                        row: row_index,
                        message: format!("column {} is not valid {}", i, self.encoding.name()),
                    })?;
                values.push(text.into_owned());
            }

            self.rows_read = row_index;
            batch.push((
                row_index,
                SourceRow {
                    columns: Arc::clone(&self.columns),
                    values,
                },
            ));
        }
        Ok(batch)
    }
}
