use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::RangeCache;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::{RangeFetcher, RangeWindow};
use crate::range::{cell_address, WindowRequest};
use crate::store::{CellWrite, SheetStore};
use crate::validate::{BatchValidator, Write, WriteCandidate};

/// `{ "writes": [ {row, col, value}, ... ] }`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub writes: Vec<WriteCandidate>,
}

impl BatchRequest {
    pub fn new(writes: Vec<WriteCandidate>) -> Self {
        Self { writes }
    }

    /// Decode a raw request body. A missing or non-array `writes` field is an
    /// empty batch.
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(body)?;
        match raw.get("writes") {
            Some(writes @ serde_json::Value::Array(_)) => Ok(Self {
                writes: serde_json::from_value(writes.clone())?,
            }),
            _ => Ok(Self::default()),
        }
    }
}

impl From<Vec<Write>> for BatchRequest {
    fn from(writes: Vec<Write>) -> Self {
        Self {
            writes: writes.into_iter().map(WriteCandidate::from).collect(),
        }
    }
}

/// `{ "updated": n, "message": "...", "writes": [accepted...] }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub updated: u64,
    pub message: String,
    pub writes: Vec<Write>,
}

/// What an edit session needs from the sheet side: windowed reads and
/// batch submission for a tab.
pub trait SheetBackend: Send + Sync + 'static {
    fn fetch_window(
        &self,
        tab: &str,
        window: &WindowRequest,
    ) -> impl Future<Output = Result<RangeWindow>> + Send;

    fn submit_batch(
        &self,
        tab: &str,
        batch: BatchRequest,
    ) -> impl Future<Output = Result<BatchResponse>> + Send;
}

/// Read and write paths over one spreadsheet, sharing a [`RangeCache`].
pub struct SheetService<S> {
    store: Arc<S>,
    fetcher: RangeFetcher<S>,
    validator: BatchValidator,
    spreadsheet_id: String,
}

impl<S: SheetStore> SheetService<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig) -> Self {
        let cache = RangeCache::new(config.cache.clone());
        Self::with_cache(store, cache, config)
    }

    /// Build a service around an existing (possibly shared) cache.
    pub fn with_cache(store: Arc<S>, cache: RangeCache, config: &SyncConfig) -> Self {
        let fetcher = RangeFetcher::new(
            Arc::clone(&store),
            cache,
            config.spreadsheet_id.clone(),
            config.fetch.clone(),
        );
        Self {
            store,
            fetcher,
            validator: BatchValidator,
            spreadsheet_id: config.spreadsheet_id.clone(),
        }
    }

    pub fn cache(&self) -> &RangeCache {
        self.fetcher.cache()
    }

    pub fn fetcher(&self) -> &RangeFetcher<S> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read a window described by raw query parameters.
    pub async fn fetch_query(
        &self,
        tab: &str,
        start: Option<&str>,
        limit: Option<&str>,
        cols: Option<&str>,
    ) -> Result<RangeWindow> {
        let window = WindowRequest::from_query(start, limit, cols, self.fetcher.config())?;
        self.fetcher.fetch_window(tab, &window).await
    }

    /// Validate `batch`, send the accepted writes upstream in one request and
    /// invalidate every cached window of `tab`.
    pub async fn submit(&self, tab: &str, batch: BatchRequest) -> Result<BatchResponse> {
        let submitted = batch.writes.len();
        let validation = self.validator.validate(&batch.writes);
        let Some(accepted) = validation.into_accepted(submitted)? else {
            return Ok(BatchResponse {
                updated: 0,
                message: "No writes to process".to_string(),
                writes: Vec::new(),
            });
        };

        let data: Vec<CellWrite> = accepted
            .iter()
            .map(|w| CellWrite::single(cell_address(tab, &w.col, w.row), w.value.clone()))
            .collect();

        let total = self
            .store
            .write_cells(&self.spreadsheet_id, data)
            .await
            .map_err(|source| SyncError::upstream("batch write", source))?;

        self.cache().invalidate_prefix(tab);

        let updated = if total == 0 { accepted.len() as u64 } else { total };
        log::info!("updated {updated} cells in tab {tab:?}");
        Ok(BatchResponse {
            updated,
            message: format!("Successfully updated {updated} cells"),
            writes: accepted,
        })
    }
}

impl<S: SheetStore> SheetBackend for SheetService<S> {
    async fn fetch_window(&self, tab: &str, window: &WindowRequest) -> Result<RangeWindow> {
        self.fetcher.fetch_window(tab, window).await
    }

    async fn submit_batch(&self, tab: &str, batch: BatchRequest) -> Result<BatchResponse> {
        self.submit(tab, batch).await
    }
}

impl<B: SheetBackend> SheetBackend for Arc<B> {
    fn fetch_window(
        &self,
        tab: &str,
        window: &WindowRequest,
    ) -> impl Future<Output = Result<RangeWindow>> + Send {
        (**self).fetch_window(tab, window)
    }

    fn submit_batch(
        &self,
        tab: &str,
        batch: BatchRequest,
    ) -> impl Future<Output = Result<BatchResponse>> + Send {
        (**self).submit_batch(tab, batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_treats_missing_writes_as_empty() {
        assert_eq!(BatchRequest::from_json("{}").unwrap(), BatchRequest::default());
        assert_eq!(
            BatchRequest::from_json(r#"{"writes": "nope"}"#).unwrap(),
            BatchRequest::default()
        );
        let batch = BatchRequest::from_json(r#"{"writes": [{"row": 1, "col": "A", "value": "x"}]}"#).unwrap();
        assert_eq!(batch.writes, vec![WriteCandidate::new(1, "A", "x")]);
    }
}
