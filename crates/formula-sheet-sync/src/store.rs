//! The remote spreadsheet store, as seen by this crate.
//!
//! Only two calls are needed: read a rectangular range and write a list of
//! single-cell ranges in one request. [`InMemorySheetStore`] implements both
//! against a sparse in-process grid.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Rows;
use crate::columns::label_to_index;
use crate::error::UpstreamError;

/// One entry of a batched write: `range` is `"<tab>!<COL><row>"` and
/// `values` is a 1x1 matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWrite {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

impl CellWrite {
    pub fn single(range: String, value: String) -> Self {
        Self {
            range,
            values: vec![vec![value]],
        }
    }
}

pub trait SheetStore: Send + Sync + 'static {
    /// Read `range` (`"<tab>!<COL><row>:<COL><row>"`) as rows of strings.
    fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> impl Future<Output = Result<Rows, UpstreamError>> + Send;

    /// Apply all `writes` in one request and return the number of updated cells.
    fn write_cells(
        &self,
        spreadsheet_id: &str,
        writes: Vec<CellWrite>,
    ) -> impl Future<Output = Result<u64, UpstreamError>> + Send;
}

impl<S: SheetStore> SheetStore for Arc<S> {
    fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> impl Future<Output = Result<Rows, UpstreamError>> + Send {
        (**self).read_range(spreadsheet_id, range)
    }

    fn write_cells(
        &self,
        spreadsheet_id: &str,
        writes: Vec<CellWrite>,
    ) -> impl Future<Output = Result<u64, UpstreamError>> + Send {
        (**self).write_cells(spreadsheet_id, writes)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryStoreError {
    #[error("store is offline")]
    Offline,
    #[error("injected write failure")]
    InjectedWriteFailure,
    #[error("unknown spreadsheet {0:?}")]
    UnknownSpreadsheet(String),
    #[error("malformed range {0:?}")]
    MalformedRange(String),
}

/// Cells of one tab keyed by 0-indexed `(row, col)`.
type TabCells = BTreeMap<(u32, u32), String>;

#[derive(Default)]
struct StoreData {
    tabs: HashMap<String, TabCells>,
}

/// Sparse in-process spreadsheet.
///
/// Reads behave like the remote API: trailing empty rows are omitted and each
/// row is cut after its last non-empty cell. Counters and failure switches
/// make it usable as a test double.
#[derive(Default)]
pub struct InMemorySheetStore {
    spreadsheet_id: String,
    data: Mutex<StoreData>,
    reads: AtomicU64,
    writes: AtomicU64,
    offline: AtomicBool,
    failing_writes: AtomicUsize,
}

impl InMemorySheetStore {
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            ..Self::default()
        }
    }

    /// Seed `tab` with `rows`, top-left at `A1`.
    pub fn with_tab(self, tab: &str, rows: &[&[&str]]) -> Self {
        {
            let mut data = self.data.lock().expect("store mutex poisoned");
            let cells = data.tabs.entry(tab.to_string()).or_default();
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    if !value.is_empty() {
                        cells.insert((r as u32, c as u32), value.to_string());
                    }
                }
            }
        }
        self
    }

    /// Current value of a 0-indexed cell.
    pub fn cell(&self, tab: &str, row: u32, col: u32) -> Option<String> {
        let data = self.data.lock().expect("store mutex poisoned");
        data.tabs.get(tab)?.get(&(row, col)).cloned()
    }

    /// Change a cell behind the cache's back (another client, a formula).
    pub fn put_cell(&self, tab: &str, row: u32, col: u32, value: &str) {
        let mut data = self.data.lock().expect("store mutex poisoned");
        let cells = data.tabs.entry(tab.to_string()).or_default();
        if value.is_empty() {
            cells.remove(&(row, col));
        } else {
            cells.insert((row, col), value.to_string());
        }
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// While offline, every call fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` write requests.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn check_target(&self, spreadsheet_id: &str) -> Result<(), InMemoryStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(InMemoryStoreError::Offline);
        }
        if spreadsheet_id != self.spreadsheet_id {
            return Err(InMemoryStoreError::UnknownSpreadsheet(spreadsheet_id.to_string()));
        }
        Ok(())
    }

    fn take_injected_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read_sync(&self, spreadsheet_id: &str, range: &str) -> Result<Rows, InMemoryStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_target(spreadsheet_id)?;

        let (tab, area) = parse_range(range)?;
        let data = self.data.lock().expect("store mutex poisoned");
        let Some(cells) = data.tabs.get(tab) else {
            return Ok(Vec::new());
        };

        let mut rows: Rows = Vec::new();
        for row in area.row_start..=area.row_end {
            let mut values: Vec<String> = Vec::new();
            for col in area.col_start..=area.col_end {
                if let Some(value) = cells.get(&(row, col)) {
                    values.resize((col - area.col_start) as usize, String::new());
                    values.push(value.clone());
                }
            }
            rows.push(values);
        }
        while rows.last().is_some_and(|row| row.is_empty()) {
            rows.pop();
        }
        Ok(rows)
    }

    fn write_sync(&self, spreadsheet_id: &str, writes: Vec<CellWrite>) -> Result<u64, InMemoryStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_target(spreadsheet_id)?;
        if self.take_injected_write_failure() {
            return Err(InMemoryStoreError::InjectedWriteFailure);
        }

        // Validate the whole request before touching any cell.
        let mut parsed = Vec::with_capacity(writes.len());
        for write in &writes {
            let (tab, area) = parse_range(&write.range)?;
            let value = write
                .values
                .first()
                .and_then(|row| row.first())
                .cloned()
                .unwrap_or_default();
            parsed.push((tab.to_string(), area.row_start, area.col_start, value));
        }

        let mut data = self.data.lock().expect("store mutex poisoned");
        for (tab, row, col, value) in &parsed {
            let cells = data.tabs.entry(tab.clone()).or_default();
            if value.is_empty() {
                cells.remove(&(*row, *col));
            } else {
                cells.insert((*row, *col), value.clone());
            }
        }
        Ok(parsed.len() as u64)
    }
}

impl SheetStore for InMemorySheetStore {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> Result<Rows, UpstreamError> {
        self.read_sync(spreadsheet_id, range).map_err(UpstreamError::from)
    }

    async fn write_cells(&self, spreadsheet_id: &str, writes: Vec<CellWrite>) -> Result<u64, UpstreamError> {
        self.write_sync(spreadsheet_id, writes).map_err(UpstreamError::from)
    }
}

/// 0-indexed inclusive rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Area {
    row_start: u32,
    row_end: u32,
    col_start: u32,
    col_end: u32,
}

fn parse_range(range: &str) -> Result<(&str, Area), InMemoryStoreError> {
    let malformed = || InMemoryStoreError::MalformedRange(range.to_string());
    let (tab, cells) = range.rsplit_once('!').ok_or_else(malformed)?;
    let (start, end) = match cells.split_once(':') {
        Some((a, b)) => (parse_cell(a).ok_or_else(malformed)?, parse_cell(b).ok_or_else(malformed)?),
        None => {
            let cell = parse_cell(cells).ok_or_else(malformed)?;
            (cell, cell)
        }
    };
    Ok((
        tab,
        Area {
            row_start: start.0.min(end.0),
            row_end: start.0.max(end.0),
            col_start: start.1.min(end.1),
            col_end: start.1.max(end.1),
        },
    ))
}

/// `B12` -> `(11, 1)`.
fn parse_cell(a1: &str) -> Option<(u32, u32)> {
    let split = a1.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = a1.split_at(split);
    let col = label_to_index(letters).ok()?;
    let row: u32 = digits.parse().ok()?;
    Some((row.checked_sub(1)?, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_single_cells() {
        let (tab, area) = parse_range("Sales!B2:D10").unwrap();
        assert_eq!(tab, "Sales");
        assert_eq!(
            area,
            Area {
                row_start: 1,
                row_end: 9,
                col_start: 1,
                col_end: 3,
            }
        );
        let (_, cell) = parse_range("Sales!AA1").unwrap();
        assert_eq!((cell.row_start, cell.col_start), (0, 26));
        assert!(parse_range("Sales").is_err());
        assert!(parse_range("Sales!A0").is_err());
        assert!(parse_range("Sales!1A").is_err());
    }

    #[test]
    fn reads_trim_like_the_remote_api() {
        let store = InMemorySheetStore::new("id").with_tab(
            "T",
            &[&["a", "", "c", ""], &["", "", "", ""], &["", "b"], &[""]],
        );
        let rows = store.read_sync("id", "T!A1:D10").unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), String::new(), "c".to_string()],
                vec![],
                vec![String::new(), "b".to_string()],
            ]
        );
        assert_eq!(store.read_sync("id", "T!B1:B1").unwrap(), Vec::<Vec<String>>::new());
        assert_eq!(store.read_count(), 2);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = InMemorySheetStore::new("id");
        store.fail_next_writes(1);
        let write = || vec![CellWrite::single("T!A1".to_string(), "x".to_string())];
        assert_eq!(
            store.write_sync("id", write()),
            Err(InMemoryStoreError::InjectedWriteFailure)
        );
        assert_eq!(store.write_sync("id", write()), Ok(1));
        assert_eq!(store.cell("T", 0, 0).as_deref(), Some("x"));
        assert_eq!(
            store.write_sync("other", write()),
            Err(InMemoryStoreError::UnknownSpreadsheet("other".to_string()))
        );
    }
}
