//! Application configuration for taxwatch.
//!
//! User config lives at `~/.taxwatch/taxwatch.toml`.
//! CLI flags override environment variables, which override the config file,
//! which overrides defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TaxwatchError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "taxwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".taxwatch";

/// Run-level lock marker name inside the data directory.
const RUN_LOCK_FILE_NAME: &str = "taxwatch.lock";

// ---------------------------------------------------------------------------
// Config structs (matching taxwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source site and HTTP behavior.
    #[serde(default)]
    pub scraper: ScraperSection,

    /// Record store location.
    #[serde(default)]
    pub storage: StorageSection,

    /// AI collaborator settings.
    #[serde(default)]
    pub enrichment: EnrichmentSection,

    /// Notification settings.
    #[serde(default)]
    pub notify: NotifySection,
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperSection {
    /// Index page listing the month pages.
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Base URL relative links are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Fixed delay between any two outbound requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per request, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Wait used on HTTP 429 when the server sends no `Retry-After`.
    #[serde(default = "default_rate_limit_wait_secs")]
    pub rate_limit_default_wait_secs: u64,

    /// Upper bound on any HTTP 429 wait, including server-sent `Retry-After`.
    #[serde(default = "default_rate_limit_max_wait_secs")]
    pub rate_limit_max_wait_secs: u64,

    /// User-Agent header for every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScraperSection {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            base_url: default_base_url(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            rate_limit_default_wait_secs: default_rate_limit_wait_secs(),
            rate_limit_max_wait_secs: default_rate_limit_max_wait_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_index_url() -> String {
    "https://cijuf.org.co/normatividad/conceptos-y-oficios-dian/2025".into()
}
fn default_base_url() -> String {
    "https://cijuf.org.co".into()
}
fn default_request_delay_ms() -> u64 {
    1_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    4_000
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_rate_limit_wait_secs() -> u64 {
    60
}
fn default_rate_limit_max_wait_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    concat!("taxwatch/", env!("CARGO_PKG_VERSION")).into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory holding the store file, its backups and lock markers.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Store file name inside `data_dir`.
    #[serde(default = "default_store_file")]
    pub store_file: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_file: default_store_file(),
        }
    }
}

impl StorageSection {
    /// Full path of the tabular store file.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }

    /// Full path of the run-level lock marker.
    pub fn run_lock_path(&self) -> PathBuf {
        self.data_dir.join(RUN_LOCK_FILE_NAME)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_store_file() -> String {
    "conceptos_dian.csv".into()
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// Whether runs enrich new concepts by default.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ollama-compatible endpoint.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model name passed to the chat endpoint.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call timeout. Generation is slow, so this is generous.
    #[serde(default = "default_enrichment_timeout_secs")]
    pub timeout_secs: u64,

    /// Prompt input is cut to this many characters.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_ollama_url(),
            model: default_model(),
            timeout_secs: default_enrichment_timeout_secs(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "llama3".into()
}
fn default_enrichment_timeout_secs() -> u64 {
    300
}
fn default_max_text_chars() -> usize {
    12_000
}

/// `[notify]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySection {
    /// Whether runs notify about new concepts by default.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime HTTP configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub request_delay: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub rate_limit_default_wait: Duration,
    pub rate_limit_max_wait: Duration,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.scraper;
        Self {
            user_agent: s.user_agent.clone(),
            timeout: Duration::from_secs(s.timeout_secs),
            request_delay: Duration::from_millis(s.request_delay_ms),
            max_attempts: s.max_attempts,
            backoff_base: Duration::from_millis(s.backoff_base_ms),
            backoff_max: Duration::from_millis(s.backoff_max_ms),
            rate_limit_default_wait: Duration::from_secs(s.rate_limit_default_wait_secs),
            rate_limit_max_wait: Duration::from_secs(s.rate_limit_max_wait_secs),
        }
    }
}

/// Runtime configuration for the concept scraper.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub index_url: String,
    pub base_url: String,
    pub fetch: FetchConfig,
}

impl From<&AppConfig> for ScraperConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            index_url: config.scraper.index_url.clone(),
            base_url: config.scraper.base_url.clone(),
            fetch: FetchConfig::from(config),
        }
    }
}

/// Runtime configuration for the AI collaborator.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_text_chars: usize,
}

impl From<&AppConfig> for EnrichmentConfig {
    fn from(config: &AppConfig) -> Self {
        let e = &config.enrichment;
        Self {
            base_url: e.base_url.clone(),
            model: e.model.clone(),
            timeout: Duration::from_secs(e.timeout_secs),
            max_text_chars: e.max_text_chars,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.taxwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TaxwatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.taxwatch/taxwatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
///
/// Environment overrides are applied and the result is validated.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TaxwatchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TaxwatchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `TAXWATCH_*` / `OLLAMA_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("TAXWATCH_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(delay) = lookup("TAXWATCH_REQUEST_DELAY_MS") {
        config.scraper.request_delay_ms = delay.trim().parse().map_err(|e| {
            TaxwatchError::config(format!("TAXWATCH_REQUEST_DELAY_MS '{delay}': {e}"))
        })?;
    }
    if let Some(url) = lookup("OLLAMA_BASE_URL") {
        config.enrichment.base_url = url;
    }
    if let Some(model) = lookup("OLLAMA_MODEL") {
        config.enrichment.model = model;
    }
    Ok(())
}

/// Reject configurations the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (name, value) in [
        ("scraper.index_url", &config.scraper.index_url),
        ("scraper.base_url", &config.scraper.base_url),
        ("enrichment.base_url", &config.enrichment.base_url),
    ] {
        let url = Url::parse(value)
            .map_err(|e| TaxwatchError::config(format!("{name} '{value}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TaxwatchError::config(format!(
                "{name} '{value}' must be an http(s) URL"
            )));
        }
    }
    if config.scraper.max_attempts == 0 {
        return Err(TaxwatchError::config("scraper.max_attempts must be at least 1"));
    }
    if config.enrichment.max_text_chars == 0 {
        return Err(TaxwatchError::config(
            "enrichment.max_text_chars must be greater than 0",
        ));
    }
    if config.storage.store_file.trim().is_empty() {
        return Err(TaxwatchError::config("storage.store_file must not be empty"));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TaxwatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TaxwatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TaxwatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
