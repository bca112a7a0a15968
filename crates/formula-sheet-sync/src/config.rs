use std::time::Duration;

use thiserror::Error;

use crate::range::WindowRequest;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeCacheConfig {
    /// Maximum age at which an entry is served to readers (default: 15s).
    pub ttl: Duration,
    /// Entries older than this are dropped by the insert-time sweep (default: 30s).
    pub sweep_age: Duration,
    /// Sweep on insert once the cache holds more than this many entries (default: 1000).
    pub sweep_threshold: usize,
    /// Hard cap; least recently used entries are evicted beyond it (default: 4096).
    pub max_entries: usize,
}

impl Default for RangeCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15),
            sweep_age: Duration::from_secs(30),
            sweep_threshold: 1000,
            max_entries: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Upper bound on rows per remote read (default: 2000).
    pub max_rows: u32,
    /// Rows fetched when a request does not say (default: 500).
    pub default_limit: u32,
    /// Columns fetched when a request does not say (default: `A:Z`).
    pub default_columns: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_rows: 2000,
            default_limit: WindowRequest::DEFAULT_LIMIT,
            default_columns: WindowRequest::DEFAULT_COLUMNS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Quiet interval after the last edit before a batch is committed (default: 500ms).
    pub debounce: Duration,
    /// Window re-fetched after each successful commit and on tab switch.
    pub window: WindowRequest,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            window: WindowRequest::new(1, 1000, WindowRequest::DEFAULT_COLUMNS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub spreadsheet_id: String,
    pub cache: RangeCacheConfig,
    pub fetch: FetchConfig,
    pub session: SessionConfig,
}

impl SyncConfig {
    pub const SPREADSHEET_ID_VAR: &'static str = "GOOGLE_SPREADSHEET_ID";
    pub const CACHE_TTL_MS_VAR: &'static str = "SHEET_SYNC_CACHE_TTL_MS";
    pub const CACHE_CAPACITY_VAR: &'static str = "SHEET_SYNC_CACHE_CAPACITY";
    pub const MAX_ROWS_VAR: &'static str = "SHEET_SYNC_MAX_ROWS";
    pub const DEBOUNCE_MS_VAR: &'static str = "SHEET_SYNC_DEBOUNCE_MS";

    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            cache: RangeCacheConfig::default(),
            fetch: FetchConfig::default(),
            session: SessionConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Only the spreadsheet id is required; everything else keeps its
    /// default when unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let spreadsheet_id = lookup(Self::SPREADSHEET_ID_VAR)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing(Self::SPREADSHEET_ID_VAR))?;
        let mut config = Self::new(spreadsheet_id);

        if let Some(ms) = parse_var::<u64, _>(&lookup, Self::CACHE_TTL_MS_VAR)? {
            config.cache.ttl = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, Self::CACHE_CAPACITY_VAR)? {
            config.cache.sweep_threshold = capacity;
            // The hard cap must sit above the sweep threshold or the sweep never runs.
            config.cache.max_entries = config.cache.max_entries.max(capacity);
        }
        if let Some(rows) = parse_var::<u32, _>(&lookup, Self::MAX_ROWS_VAR)? {
            config.fetch.max_rows = rows;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, Self::DEBOUNCE_MS_VAR)? {
            config.session.debounce = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { name, value: raw })
}
