use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Where the stock list comes from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Local CSV path or an http(s) URL serving CSV.
    #[serde(default = "default_source_location")]
    pub location: String,

    #[serde(default = "default_header_rows")]
    pub header_rows: usize,

    /// Column A
    #[serde(default)]
    pub symbol_column: usize,

    /// Column D
    #[serde(default = "default_url_column")]
    pub url_column: usize,

    #[serde(default)]
    pub uppercase_symbols: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Csv,
    Duckdb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Row for source index i is written at destination row i + header + 1.
    Range,
    /// Rows go after the last used row.
    Append,
}

/// Destination worksheet
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,

    /// CSV file for `csv`, database file for `duckdb`.
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,

    /// Worksheet title inside the DuckDB sheet table.
    #[serde(default = "default_sheet")]
    pub sheet: String,

    #[serde(default = "default_write_mode")]
    pub write_mode: WriteMode,

    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Service-account JSON, only inspected for logging.
    #[serde(default)]
    pub credentials: Option<String>,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Cookie JSON array or a path to a file holding one.
    #[serde(default)]
    pub cookies: Option<String>,

    #[serde(default = "default_tradingview_base_url")]
    pub tradingview_base_url: String,

    #[serde(default = "default_tradingview_value_selector")]
    pub tradingview_value_selector: String,

    #[serde(default = "default_tradingview_value_count")]
    pub tradingview_value_count: usize,

    #[serde(default = "default_scanner_url")]
    pub scanner_url: String,

    #[serde(default = "default_scanner_market")]
    pub scanner_market: String,

    #[serde(default = "default_scanner_columns")]
    pub scanner_columns: Vec<String>,

    #[serde(default = "default_nse_base_url")]
    pub nse_base_url: String,

    /// Base for relative ET Money links in the URL column.
    #[serde(default = "default_etmoney_base_url")]
    pub etmoney_base_url: String,
}

/// Row window, sharding and batching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default)]
    pub start_index: usize,

    #[serde(default = "default_end_index")]
    pub end_index: usize,

    #[serde(default)]
    pub shard_index: usize,

    #[serde(default = "default_shard_step")]
    pub shard_step: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Derived from the shard when unset.
    #[serde(default)]
    pub checkpoint_file: Option<PathBuf>,

    #[serde(default = "default_date_format")]
    pub date_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Groq,
}

/// Sector classification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProvider,

    /// Provider default when unset.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Provider default when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_llm_delay_ms")]
    pub request_delay_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_source_location() -> String {
    "data/stock_list.csv".to_string()
}
fn default_header_rows() -> usize {
    1
}
fn default_url_column() -> usize {
    3
}
fn default_sink_kind() -> SinkKind {
    SinkKind::Csv
}
fn default_sink_path() -> PathBuf {
    PathBuf::from("data/output.csv")
}
fn default_sheet() -> String {
    "Sheet5".to_string()
}
fn default_write_mode() -> WriteMode {
    WriteMode::Range
}
fn default_flush_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1500
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string()
}
fn default_tradingview_base_url() -> String {
    "https://www.tradingview.com".to_string()
}
fn default_tradingview_value_selector() -> String {
    "div[class*='valueValue']".to_string()
}
fn default_tradingview_value_count() -> usize {
    14
}
fn default_scanner_url() -> String {
    "https://scanner.tradingview.com".to_string()
}
fn default_scanner_market() -> String {
    "india".to_string()
}
fn default_scanner_columns() -> Vec<String> {
    [
        "close", "volume", "RSI", "MACD.macd", "MACD.signal", "open", "high", "low", "EMA10",
        "EMA20", "SMA50", "SMA200", "Mom", "change",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}
fn default_nse_base_url() -> String {
    "https://www.nseindia.com".to_string()
}
fn default_etmoney_base_url() -> String {
    "https://www.etmoney.com".to_string()
}
fn default_end_index() -> usize {
    2500
}
fn default_shard_step() -> usize {
    1
}
fn default_batch_size() -> usize {
    5
}
fn default_date_format() -> String {
    "%m/%d/%Y".to_string()
}
fn default_llm_provider() -> LlmProvider {
    LlmProvider::Gemini
}
fn default_llm_delay_ms() -> u64 {
    4000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: default_source_location(),
            header_rows: default_header_rows(),
            symbol_column: 0,
            url_column: default_url_column(),
            uppercase_symbols: false,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            path: default_sink_path(),
            sheet: default_sheet(),
            write_mode: default_write_mode(),
            flush_delay_ms: default_flush_delay_ms(),
            credentials: None,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            cookies: None,
            tradingview_base_url: default_tradingview_base_url(),
            tradingview_value_selector: default_tradingview_value_selector(),
            tradingview_value_count: default_tradingview_value_count(),
            scanner_url: default_scanner_url(),
            scanner_market: default_scanner_market(),
            scanner_columns: default_scanner_columns(),
            nse_base_url: default_nse_base_url(),
            etmoney_base_url: default_etmoney_base_url(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_index: 0,
            end_index: default_end_index(),
            shard_index: 0,
            shard_step: default_shard_step(),
            batch_size: default_batch_size(),
            checkpoint_file: None,
            date_format: default_date_format(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            api_key: None,
            base_url: None,
            request_delay_ms: default_llm_delay_ms(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("SCOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}

/// `client_email` of a service-account JSON blob, if it parses.
pub fn service_account_email(credentials: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(credentials).ok()?;
    value
        .get("client_email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
