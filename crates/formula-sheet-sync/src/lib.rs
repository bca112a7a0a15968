//! Windowed reads and batched writes against a remote spreadsheet.
//!
//! The remote store is slow and rate limited, so this crate sits between an
//! interactive grid and the store and exposes:
//! - Column label <-> index conversion
//! - A TTL range cache with tab-scoped invalidation
//! - A range fetcher that serves repeated windows from the cache
//! - Validation of raw batch-write candidates
//! - A server-side batch path that writes once per batch and invalidates the tab
//! - A debounced, optimistic edit session with rollback on failed commits

mod cache;
mod coalescer;
pub mod columns;
pub mod config;
mod error;
mod fetcher;
pub mod range;
mod service;
mod session;
pub mod store;
mod validate;

pub use cache::{RangeCache, RangeCacheStats, Rows};
pub use coalescer::{CellKey, CoalescerState, CommitBatch, GridView, PendingEdit, WriteCoalescer, MAX_ROW_INDEX};
pub use config::{ConfigError, FetchConfig, RangeCacheConfig, SessionConfig, SyncConfig};
pub use error::{Result, SyncError, UpstreamError};
pub use fetcher::{RangeFetcher, RangeWindow};
pub use range::{ColumnSpan, RangeKey, WindowRequest};
pub use service::{BatchRequest, BatchResponse, SheetBackend, SheetService};
pub use session::{EditSession, SessionStats};
pub use store::{CellWrite, InMemorySheetStore, SheetStore};
pub use validate::{BatchValidator, Rejection, Validation, Write, WriteCandidate};
