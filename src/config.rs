//! Configuration for the sync service.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.indexsync/settings.toml`, discovered by
//!   walking up from the current directory)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SYNC_` and use double
//! underscores to separate nested levels:
//! - `SYNC_SYNC__POLL_INTERVAL_SECS=10` sets `sync.poll_interval_secs`
//! - `SYNC_EMBEDDING__PROVIDER=http` sets `embedding.provider`
//! - `SYNC_SOURCE__URL=sqlite:erp.db` sets `source.url`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the search index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Path to checkpoint/state storage
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Workspace root directory (where .indexsync is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Relational source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Tables to keep synchronized
    #[serde(default)]
    pub tables: Vec<TableConfig>,

    /// Scheduling and batching
    #[serde(default)]
    pub sync: SyncConfig,

    /// Bulk import queue settings
    #[serde(default)]
    pub import: ImportConfig,

    /// Embedding/enrichment settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Connection URL, e.g. `sqlite:erp.db`
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Timeout for source queries, in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

/// One synced table. The id and modified columns form the composite
/// change cursor; text columns feed the searchable body.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TableConfig {
    /// Table name in the source database
    pub name: String,

    /// Primary key column (integer)
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Modification timestamp column (unix seconds, second granularity)
    #[serde(default = "default_modified_column")]
    pub modified_column: String,

    /// Column used as the result title (defaults to the first text column)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_column: Option<String>,

    /// Text columns composed into the searchable body
    #[serde(default)]
    pub text_columns: Vec<String>,
}

impl TableConfig {
    /// The column whose value titles search results.
    pub fn title_column(&self) -> Option<&str> {
        self.title_column
            .as_deref()
            .or_else(|| self.text_columns.first().map(String::as_str))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Seconds between change-detection polls per table
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Rows fetched per source query page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Documents per index-write batch
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,

    /// Worker tasks consuming the shared work queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds to let in-flight batches drain on shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportConfig {
    /// Root of the import queue (`incoming/`, `.progress/`, `.done/`,
    /// `.error/` live underneath)
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    /// Seconds between incoming-directory sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Attempts before a file lands in `.error/`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age in seconds after which a claim is considered stuck
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Enable vector enrichment. When disabled every document is indexed
    /// text-only.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `fastembed` (local model) or `http` (OpenAI-compatible endpoint)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name (fastembed model id, or the remote model parameter)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding call
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Minimum delay between embedding calls, in milliseconds
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Retries per sub-batch before degrading
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout per embedding call, in seconds
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,

    /// Endpoint base URL for the http provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key for the http provider
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Vector dimensions expected from the http provider
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `sync = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".indexsync/index")
}
fn default_state_path() -> PathBuf {
    PathBuf::from(".indexsync/state")
}
fn default_source_url() -> String {
    "sqlite:source.db".to_string()
}
fn default_source_timeout() -> u64 {
    10
}
fn default_id_column() -> String {
    "id".to_string()
}
fn default_modified_column() -> String {
    "last_modified".to_string()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_page_size() -> usize {
    500
}
fn default_index_batch_size() -> usize {
    500
}
fn default_workers() -> usize {
    2
}
fn default_drain_timeout() -> u64 {
    30
}
fn default_queue_dir() -> PathBuf {
    PathBuf::from("import")
}
fn default_sweep_interval() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_stale_claim() -> i64 {
    900
}
fn default_true() -> bool {
    true
}
fn default_provider() -> String {
    "fastembed".to_string()
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_rate_limit_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_dimensions() -> usize {
    1536
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            state_path: default_state_path(),
            workspace_root: None,
            source: SourceConfig::default(),
            tables: Vec::new(),
            sync: SyncConfig::default(),
            import: ImportConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            page_size: default_page_size(),
            index_batch_size: default_index_batch_size(),
            workers: default_workers(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
            sweep_interval_secs: default_sweep_interval(),
            max_attempts: default_max_attempts(),
            stale_claim_secs: default_stale_claim(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: default_embedding_model(),
            batch_size: default_embed_batch_size(),
            rate_limit_ms: default_rate_limit_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".indexsync/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // SYNC_ prefix, double underscore separates nested levels
            .merge(Env::prefixed("SYNC_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SYNC_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .indexsync directory,
    /// searching from the current directory up to root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".indexsync");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Get the workspace root directory (where .indexsync is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            if ancestor.join(".indexsync").is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(".indexsync/settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.workspace_root = Some(current_dir);
        }

        settings.save(&config_path)?;
        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!("Created default configuration at: {}", config_path.display());
        }

        Ok(config_path)
    }

    /// Validate settings before startup. Violations here are fatal
    /// configuration errors: nothing has been mutated yet, so we abort.
    pub fn validate(&self) -> Result<(), String> {
        if self.tables.is_empty() {
            return Err("no tables configured; add at least one [[tables]] entry".to_string());
        }
        for table in &self.tables {
            for ident in [&table.name, &table.id_column, &table.modified_column]
                .into_iter()
                .chain(table.text_columns.iter())
            {
                if !is_sql_identifier(ident) {
                    return Err(format!(
                        "invalid identifier '{}' in table config '{}'",
                        ident, table.name
                    ));
                }
            }
            if table.text_columns.is_empty() {
                return Err(format!("table '{}' has no text_columns", table.name));
            }
        }
        if self.sync.page_size == 0 || self.sync.index_batch_size == 0 {
            return Err("batch sizes must be greater than zero".to_string());
        }
        if self.sync.workers == 0 {
            return Err("workers must be greater than zero".to_string());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be greater than zero".to_string());
        }
        if self.embedding.provider == "http" && self.embedding.endpoint.is_none() {
            return Err("embedding.provider = \"http\" requires embedding.endpoint".to_string());
        }
        Ok(())
    }
}

/// Table and column names are interpolated into SQL; restrict them to plain
/// identifiers so a malformed config cannot smuggle in arbitrary SQL.
fn is_sql_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
