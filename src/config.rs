//! TOML configuration.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Credentials are never read from the file, only from the
//! environment (`OPENAI_API_KEY`, `AIRTABLE_API_KEY`).
//!
//! ```toml
//! [db]
//! path = "data/codectx.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! overlap = 200
//!
//! [embedding]
//! model = "text-embedding-3-small"
//! dims = 1536
//! batch_size = 100
//! batch_pause_ms = 100
//!
//! [retrieval]
//! search_threshold = 0.6
//! context_threshold = 0.7
//!
//! [sources.git]
//! max_file_bytes = 1048576
//!
//! [sources.airtable]
//! base_id = "appXXXXXXXXXXXXXX"
//! tables = ["Issues"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codectx_core::chunk::{ChunkParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use codectx_core::embedding::{DEFAULT_BATCH_SIZE, DEFAULT_DIMS, DEFAULT_MAX_INPUT_CHARS};
use codectx_core::models::SourceType;
use codectx_core::render::DEFAULT_PREVIEW_CHARS;
use codectx_core::search::{
    RetrievalParams, DEFAULT_CONTEXT_LIMIT, DEFAULT_CONTEXT_THRESHOLD, DEFAULT_SEARCH_LIMIT,
    DEFAULT_SEARCH_THRESHOLD,
};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/codectx.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/codectx.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Overrides the built-in separator priority list.
    #[serde(default)]
    pub separators: Option<Vec<String>>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            separators: None,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_input_chars: default_max_input_chars(),
            batch_pause_ms: default_batch_pause_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    DEFAULT_DIMS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}
fn default_batch_pause_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_threshold")]
    pub search_threshold: f64,
    #[serde(default = "default_context_threshold")]
    pub context_threshold: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_threshold: default_search_threshold(),
            context_threshold: default_context_threshold(),
            search_limit: default_search_limit(),
            context_limit: default_context_limit(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_search_threshold() -> f64 {
    DEFAULT_SEARCH_THRESHOLD
}
fn default_context_threshold() -> f64 {
    DEFAULT_CONTEXT_THRESHOLD
}
fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}
fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub git: GitSourceConfig,
    #[serde(default)]
    pub airtable: Option<AirtableSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitSourceConfig {
    /// File extensions (without the dot) eligible for ingestion.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Glob patterns excluded from ingestion.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for GitSourceConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_globs: default_exclude_globs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "rb", "php", "c", "h", "cpp",
        "hpp", "cs", "swift", "scala", "sh", "sql", "html", "css", "scss", "vue", "svelte", "md",
        "mdx", "txt", "rst", "toml", "yaml", "yml", "json", "ini", "cfg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_globs() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/.git/**",
        "**/*.lock",
        "**/package-lock.json",
        "**/*.min.js",
        "**/*.min.css",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirtableSourceConfig {
    #[serde(default)]
    pub base_id: Option<String>,
    /// Tables ingested when `--airtable-tables` is not given.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default = "default_airtable_source_type")]
    pub source_type: SourceType,
    #[serde(default = "default_airtable_api_url")]
    pub api_url: String,
    #[serde(default = "default_airtable_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AirtableSourceConfig {
    fn default() -> Self {
        Self {
            base_id: None,
            tables: Vec::new(),
            source_type: default_airtable_source_type(),
            api_url: default_airtable_api_url(),
            page_size: default_airtable_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_airtable_source_type() -> SourceType {
    SourceType::Issues
}
fn default_airtable_api_url() -> String {
    "https://api.airtable.com/v0".to_string()
}
fn default_airtable_page_size() -> usize {
    100
}

impl Config {
    /// Chunking parameters, validated.
    pub fn chunk_params(&self) -> Result<ChunkParams> {
        let params = ChunkParams::new(self.chunking.chunk_size, self.chunking.overlap)?;
        Ok(match &self.chunking.separators {
            Some(seps) => params.with_separators(seps.clone()),
            None => params,
        })
    }

    pub fn search_params(&self) -> RetrievalParams {
        RetrievalParams {
            threshold: self.retrieval.search_threshold,
            limit: self.retrieval.search_limit,
        }
    }

    pub fn context_params(&self) -> RetrievalParams {
        RetrievalParams {
            threshold: self.retrieval.context_threshold,
            limit: self.retrieval.context_limit,
        }
    }

    fn validate(&self) -> Result<()> {
        self.chunk_params().context("invalid [chunking] section")?;

        if self.embedding.provider != "openai" {
            bail!(
                "Unknown embedding provider: '{}'. Must be openai.",
                self.embedding.provider
            );
        }
        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.max_input_chars == 0 {
            bail!("embedding.max_input_chars must be > 0");
        }

        self.search_params()
            .validate()
            .context("invalid retrieval.search_threshold / search_limit")?;
        self.context_params()
            .validate()
            .context("invalid retrieval.context_threshold / context_limit")?;

        Ok(())
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

/// Resolve the configuration for a CLI invocation.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
/// used if present, otherwise built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                tracing::debug!("no config file found, using defaults");
                Ok(Config::default())
            }
        }
    }
}
