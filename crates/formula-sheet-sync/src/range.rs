//! Canonical range addressing.
//!
//! Rows are **1-indexed** here (they are what the remote store sees); a
//! [`RangeKey`] is the exact range string sent upstream and doubles as the
//! cache key.

use core::fmt;

use crate::columns::is_valid_label;
use crate::config::FetchConfig;
use crate::error::{Result, SyncError};

/// A `FIRST:LAST` column span with normalized (uppercase) labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnSpan {
    first: String,
    last: String,
}

impl ColumnSpan {
    /// Parse a span like `A:F` (case-insensitive).
    ///
    /// The span must contain exactly one `:` and both sides must be column
    /// labels. The sides are not required to be ordered.
    pub fn parse(span: &str) -> Result<Self> {
        let normalized = span.trim().to_ascii_uppercase();
        let mut parts = normalized.split(':');
        let (Some(first), Some(last), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SyncError::invalid_range(format!(
                "column span {span:?} must look like A:Z"
            )));
        };
        if !is_valid_label(first) || !is_valid_label(last) {
            return Err(SyncError::invalid_range(format!(
                "column span {span:?} must use A-Z column labels"
            )));
        }
        Ok(Self {
            first: first.to_string(),
            last: last.to_string(),
        })
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn last(&self) -> &str {
        &self.last
    }
}

impl fmt::Display for ColumnSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// `"<tab>!<FIRST><start>:<LAST><end>"`.
///
/// Two keys are equal iff they were built from the same tab, span and rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RangeKey {
    key: String,
    tab_len: usize,
}

impl RangeKey {
    pub fn new(tab: &str, columns: &ColumnSpan, start_row: u32, end_row: u32) -> Self {
        let key = format!(
            "{tab}!{}{start_row}:{}{end_row}",
            columns.first(),
            columns.last()
        );
        Self {
            key,
            tab_len: tab.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn tab(&self) -> &str {
        &self.key[..self.tab_len]
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Prefix shared by every key of `tab`.
pub fn tab_prefix(tab: &str) -> String {
    format!("{tab}!")
}

/// Single-cell address `"<tab>!<COL><row>"` used for batched writes.
pub fn cell_address(tab: &str, col: &str, row: u32) -> String {
    format!("{tab}!{col}{row}")
}

/// A requested row window: `limit` rows starting at 1-indexed `start`, over
/// `columns`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowRequest {
    pub start: u32,
    pub limit: u32,
    pub columns: String,
}

impl WindowRequest {
    pub const DEFAULT_LIMIT: u32 = 500;
    pub const DEFAULT_COLUMNS: &'static str = "A:Z";

    pub fn new(start: u32, limit: u32, columns: impl Into<String>) -> Self {
        Self {
            start,
            limit,
            columns: columns.into(),
        }
    }

    /// Build a window from raw query parameters (`start`, `limit`, `cols`).
    ///
    /// Missing values fall back to `start=1` and the defaults in `defaults`.
    /// `start` is clamped to at least 1 and the column span is uppercased; it
    /// is validated later by the fetcher.
    pub fn from_query(
        start: Option<&str>,
        limit: Option<&str>,
        cols: Option<&str>,
        defaults: &FetchConfig,
    ) -> Result<Self> {
        let start = parse_query_int("start", start, 1)?.max(1);
        let limit = parse_query_int("limit", limit, i64::from(defaults.default_limit))?;
        let columns = cols
            .map(str::trim)
            .filter(|cols| !cols.is_empty())
            .unwrap_or(defaults.default_columns.as_str())
            .to_ascii_uppercase();
        Ok(Self {
            start: u32::try_from(start).unwrap_or(u32::MAX),
            limit: u32::try_from(limit.max(0)).unwrap_or(u32::MAX),
            columns,
        })
    }
}

impl Default for WindowRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT, Self::DEFAULT_COLUMNS)
    }
}

fn parse_query_int(name: &str, raw: Option<&str>, default: i64) -> Result<i64> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<i64>()
            .map_err(|_| SyncError::invalid_range(format!("{name} must be an integer, got {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_span_is_normalized() {
        let span = ColumnSpan::parse("a:f").unwrap();
        assert_eq!(span.first(), "A");
        assert_eq!(span.last(), "F");
        assert_eq!(span.to_string(), "A:F");
        assert_eq!(ColumnSpan::parse("C:A").unwrap().to_string(), "C:A");
    }

    #[test]
    fn column_span_rejects_bad_shapes() {
        for bad in ["A", "A:B:C", ":B", "A:", "A1:B2", "A:*", ""] {
            assert!(
                matches!(ColumnSpan::parse(bad), Err(SyncError::InvalidRange { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn range_key_is_canonical() {
        let a = RangeKey::new("Sales", &ColumnSpan::parse("A:B").unwrap(), 1, 2);
        let b = RangeKey::new("Sales", &ColumnSpan::parse("a:b").unwrap(), 1, 2);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Sales!A1:B2");
        assert_eq!(a.tab(), "Sales");
        assert!(a.as_str().starts_with(&tab_prefix("Sales")));
    }

    #[test]
    fn query_defaults_and_clamping() {
        let defaults = FetchConfig::default();
        let window = WindowRequest::from_query(None, None, None, &defaults).unwrap();
        assert_eq!(window, WindowRequest::new(1, 500, "A:Z"));

        let window = WindowRequest::from_query(Some("-4"), Some("25"), Some("b:d"), &defaults).unwrap();
        assert_eq!(window, WindowRequest::new(1, 25, "B:D"));

        assert!(matches!(
            WindowRequest::from_query(Some("ten"), None, None, &defaults),
            Err(SyncError::InvalidRange { .. })
        ));
    }
}
