use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{RangeCache, Rows};
use crate::coalescer::CellKey;
use crate::columns::label_to_index;
use crate::config::FetchConfig;
use crate::error::{Result, SyncError};
use crate::range::{ColumnSpan, RangeKey, WindowRequest};
use crate::store::SheetStore;

/// A fetched window as handed to grid consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeWindow {
    pub range: String,
    pub start: u32,
    pub limit: u32,
    pub values: Rows,
}

impl RangeWindow {
    /// Absolute 0-indexed position of the window's top-left cell, so that
    /// `values[r][c]` is the sheet cell `origin + (r, c)`.
    pub fn origin(&self) -> Result<CellKey> {
        let cells = self
            .range
            .rsplit_once('!')
            .map_or(self.range.as_str(), |(_, cells)| cells);
        let letters = cells
            .find(|c: char| !c.is_ascii_uppercase())
            .map_or(cells, |end| &cells[..end]);
        let col = label_to_index(letters)?;
        Ok(CellKey::new(self.start.saturating_sub(1), col))
    }
}

/// Serves row windows from the [`RangeCache`], reading upstream on a miss.
///
/// Concurrent misses for the same key are not coalesced; each one issues its
/// own (idempotent) remote read.
pub struct RangeFetcher<S> {
    store: Arc<S>,
    cache: RangeCache,
    spreadsheet_id: String,
    config: FetchConfig,
}

impl<S: SheetStore> RangeFetcher<S> {
    pub fn new(
        store: Arc<S>,
        cache: RangeCache,
        spreadsheet_id: impl Into<String>,
        mut config: FetchConfig,
    ) -> Self {
        config.max_rows = config.max_rows.max(1);
        Self {
            store,
            cache,
            spreadsheet_id: spreadsheet_id.into(),
            config,
        }
    }

    pub fn cache(&self) -> &RangeCache {
        &self.cache
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Resolve a window into its canonical key and effective limit without
    /// touching the cache or the store.
    pub fn resolve(&self, tab: &str, start_row: u32, limit: u32, columns: &str) -> Result<(RangeKey, u32)> {
        if start_row < 1 {
            return Err(SyncError::invalid_range("start row must be at least 1"));
        }
        let columns = ColumnSpan::parse(columns)?;
        let limit = limit.clamp(1, self.config.max_rows);
        let end_row = start_row
            .checked_add(limit - 1)
            .ok_or_else(|| SyncError::invalid_range(format!("window at row {start_row} overflows")))?;
        Ok((RangeKey::new(tab, &columns, start_row, end_row), limit))
    }

    /// Fetch `limit` rows of `columns` starting at 1-indexed `start_row`.
    pub async fn fetch(&self, tab: &str, start_row: u32, limit: u32, columns: &str) -> Result<RangeWindow> {
        let (key, limit) = self.resolve(tab, start_row, limit, columns)?;

        if let Some(values) = self.cache.get(&key) {
            return Ok(RangeWindow {
                range: key.to_string(),
                start: start_row,
                limit,
                values: values.as_ref().clone(),
            });
        }

        let epoch = self.cache.epoch(tab);
        let values = self
            .store
            .read_range(&self.spreadsheet_id, key.as_str())
            .await
            .map_err(|source| SyncError::upstream("read", source))?;
        let range = key.to_string();
        self.cache.set_if_current(key, values.clone(), epoch);

        Ok(RangeWindow {
            range,
            start: start_row,
            limit,
            values,
        })
    }

    /// Fetch using a [`WindowRequest`]; an empty column span falls back to the
    /// configured default.
    pub async fn fetch_window(&self, tab: &str, window: &WindowRequest) -> Result<RangeWindow> {
        let columns = if window.columns.trim().is_empty() {
            self.config.default_columns.as_str()
        } else {
            window.columns.as_str()
        };
        self.fetch(tab, window.start, window.limit, columns).await
    }
}
