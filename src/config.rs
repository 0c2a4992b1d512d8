use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::ingest::{ConflictPolicy, IngestMode};
use crate::schema::REGISTRY;
use crate::source::{SourceEncoding, SourceOptions};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: IngestMode,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            mode: IngestMode::default(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

fn default_batch_size() -> usize {
    50_000
}

/// Where to read one collection's CSV from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Encoding label, e.g. `utf-8`, `latin-1`, `windows-1252`.
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl SourceConfig {
    pub fn options(&self) -> Result<SourceOptions> {
        let encoding = SourceEncoding::for_label(&self.encoding)
            .with_context(|| format!("Unknown source encoding: '{}'", self.encoding))?;
        Ok(SourceOptions {
            delimiter: self.delimiter as u8,
            encoding,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_url")]
    pub url: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: default_oracle_url(),
            model: default_oracle_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_oracle_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}
fn default_oracle_model() -> String {
    "mistral".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_result_limit")]
    pub result_limit: i64,
    #[serde(default = "default_list_limit")]
    pub list_limit: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_result_limit() -> i64 {
    5
}
fn default_list_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// A config with only a database path; everything else defaulted.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            ingest: IngestConfig::default(),
            sources: HashMap::new(),
            oracle: OracleConfig::default(),
            query: QueryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(url) = std::env::var("DATALK_ORACLE_URL") {
        config.oracle.url = url;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.query.result_limit < 1 {
        anyhow::bail!("query.result_limit must be >= 1");
    }
    if config.query.list_limit < 1 {
        anyhow::bail!("query.list_limit must be >= 1");
    }

    if config.oracle.timeout_secs == 0 {
        anyhow::bail!("oracle.timeout_secs must be > 0");
    }

    for (name, source) in &config.sources {
        if REGISTRY.get(name).is_none() {
            anyhow::bail!(
                "Unknown source collection: '{}'. Must be one of: {}",
                name,
                REGISTRY.collection_names().join(", ")
            );
        }
        if !source.delimiter.is_ascii() {
            anyhow::bail!("sources.{}.delimiter must be a single ASCII character", name);
        }
        source
            .options()
            .with_context(|| format!("Invalid [sources.{}]", name))?;
    }

    Ok(())
}
