use core::fmt;
use std::collections::{BTreeMap, HashMap};

use crate::cache::Rows;
use crate::columns::index_to_label;
use crate::error::{Result, SyncError};
use crate::validate::Write;

/// Largest 0-indexed row an edit may target.
pub const MAX_ROW_INDEX: u32 = u32::MAX - 1;

/// 0-indexed grid coordinate; displays as `"row:col"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: u32,
    pub col: u32,
}

impl CellKey {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// The cells a user currently sees, including not-yet-confirmed edits.
///
/// Coordinates are absolute 0-indexed sheet positions, so a window fetched
/// from `B2` lands at `(1, 1)`. Only cells that were fetched or edited are
/// stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GridView {
    cells: BTreeMap<CellKey, String>,
}

impl GridView {
    /// Rows anchored at `A1`.
    pub fn new(rows: Rows) -> Self {
        Self::from_window(CellKey::new(0, 0), rows)
    }

    /// Rows as returned for a window whose top-left cell is `origin`.
    pub fn from_window(origin: CellKey, rows: Rows) -> Self {
        let mut cells = BTreeMap::new();
        for (r, row) in rows.into_iter().enumerate() {
            let Some(row_index) = offset(origin.row, r) else {
                break;
            };
            for (c, value) in row.into_iter().enumerate() {
                let Some(col_index) = offset(origin.col, c) else {
                    break;
                };
                cells.insert(CellKey::new(row_index, col_index), value);
            }
        }
        Self { cells }
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&str> {
        self.cells.get(&CellKey::new(row, col)).map(String::as_str)
    }

    /// Set a cell, returning what was there before (`None` if the cell was
    /// never loaded).
    pub fn set(&mut self, row: u32, col: u32, value: String) -> Option<String> {
        self.cells.insert(CellKey::new(row, col), value)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Loaded cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &str)> + '_ {
        self.cells.iter().map(|(key, value)| (*key, value.as_str()))
    }

    /// Put back a value captured by [`GridView::set`].
    fn restore(&mut self, key: CellKey, previous: Option<String>) {
        match previous {
            Some(value) => {
                self.cells.insert(key, value);
            }
            None => {
                self.cells.remove(&key);
            }
        }
    }
}

fn offset(base: u32, delta: usize) -> Option<u32> {
    u32::try_from(delta).ok().and_then(|d| base.checked_add(d))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEdit {
    pub row_index: u32,
    pub col_index: u32,
    pub value: String,
    seq: u64,
}

impl PendingEdit {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.row_index, self.col_index)
    }

    /// 1-indexed row, column label.
    pub fn to_write(&self) -> Write {
        Write {
            row: self.row_index + 1,
            col: index_to_label(self.col_index),
            value: self.value.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoalescerState {
    /// No pending edits.
    Idle,
    /// Edits applied locally, waiting for the quiet interval.
    Accumulating,
    /// A batch is in flight.
    Committing,
    /// The last batch failed and its cells were reverted.
    RolledBack,
}

/// Snapshot of the pending edits taken when a commit starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitBatch {
    edits: Vec<PendingEdit>,
}

impl CommitBatch {
    pub fn edits(&self) -> &[PendingEdit] {
        &self.edits
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.edits.iter().map(PendingEdit::to_write).collect()
    }
}

/// Optimistic edit state for one tab.
///
/// Every edit is applied to the [`GridView`] immediately and recorded as a
/// sequence-numbered [`PendingEdit`] (last write wins per cell). For each
/// edited cell the value the grid last received from the server is kept as
/// the rollback target.
///
/// At most one [`CommitBatch`] is outstanding: `begin_commit` refuses to start
/// another until `commit_succeeded` or `commit_failed` is called.
#[derive(Debug)]
pub struct WriteCoalescer {
    grid: GridView,
    pending: BTreeMap<CellKey, PendingEdit>,
    confirmed: HashMap<CellKey, Option<String>>,
    state: CoalescerState,
    next_seq: u64,
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new(GridView::default())
    }
}

impl WriteCoalescer {
    pub fn new(grid: GridView) -> Self {
        Self {
            grid,
            pending: BTreeMap::new(),
            confirmed: HashMap::new(),
            state: CoalescerState::Idle,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> CoalescerState {
        self.state
    }

    pub fn grid(&self) -> &GridView {
        &self.grid
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self, key: CellKey) -> Option<&PendingEdit> {
        self.pending.get(&key)
    }

    /// Apply an edit to the grid and record it as pending.
    ///
    /// Fails with [`SyncError::InvalidRange`] for a row the remote grid cannot
    /// address (its 1-indexed row would overflow `u32`).
    pub fn apply_edit(&mut self, row_index: u32, col_index: u32, value: impl Into<String>) -> Result<()> {
        if row_index > MAX_ROW_INDEX {
            return Err(SyncError::invalid_range(format!(
                "row index {row_index} is past the last addressable row"
            )));
        }
        let value = value.into();
        let key = CellKey::new(row_index, col_index);
        let previous = self.grid.set(row_index, col_index, value.clone());
        self.confirmed.entry(key).or_insert(previous);

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(
            key,
            PendingEdit {
                row_index,
                col_index,
                value,
                seq,
            },
        );

        if self.state != CoalescerState::Committing {
            self.state = CoalescerState::Accumulating;
        }
        Ok(())
    }

    /// Snapshot the pending edits for submission. Returns `None` when there is
    /// nothing to send or a batch is already in flight.
    pub fn begin_commit(&mut self) -> Option<CommitBatch> {
        if self.state == CoalescerState::Committing || self.pending.is_empty() {
            return None;
        }
        self.state = CoalescerState::Committing;
        Some(CommitBatch {
            edits: self.pending.values().cloned().collect(),
        })
    }

    /// Drop the committed edits. Edits made to a cell after the snapshot stay
    /// pending, now with the committed value as their rollback target.
    pub fn commit_succeeded(&mut self, batch: &CommitBatch) {
        for edit in &batch.edits {
            let key = edit.key();
            if self.pending.get(&key).is_some_and(|p| p.seq == edit.seq) {
                self.pending.remove(&key);
                self.confirmed.remove(&key);
            } else {
                self.confirmed.insert(key, Some(edit.value.clone()));
            }
        }
        self.state = self.resting_state();
    }

    /// Revert every cell of `batch` whose pending edit is still the one that
    /// failed, and forget those edits. Leaves the coalescer in
    /// [`CoalescerState::RolledBack`] until [`WriteCoalescer::settle`].
    ///
    /// Returns the reverted cells.
    pub fn commit_failed(&mut self, batch: &CommitBatch) -> Vec<CellKey> {
        let mut reverted = Vec::new();
        for edit in &batch.edits {
            let key = edit.key();
            if !self.pending.get(&key).is_some_and(|p| p.seq == edit.seq) {
                continue;
            }
            self.pending.remove(&key);
            let previous = self.confirmed.remove(&key).flatten();
            self.grid.restore(key, previous);
            reverted.push(key);
        }
        self.state = CoalescerState::RolledBack;
        reverted
    }

    /// Leave `RolledBack` once the failure has been reported.
    pub fn settle(&mut self) {
        if self.state == CoalescerState::RolledBack {
            self.state = self.resting_state();
        }
    }

    /// Replace the grid with freshly fetched rows whose top-left cell is
    /// `origin`, then re-apply pending edits on top. The fetched values become
    /// the rollback targets.
    pub fn reconcile(&mut self, origin: CellKey, rows: Rows) {
        self.grid = GridView::from_window(origin, rows);
        self.confirmed.clear();
        for (key, edit) in &self.pending {
            let previous = self.grid.set(key.row, key.col, edit.value.clone());
            self.confirmed.insert(*key, previous);
        }
    }

    /// Forget everything (tab switch).
    pub fn reset(&mut self, grid: GridView) {
        self.grid = grid;
        self.pending.clear();
        self.confirmed.clear();
        self.state = CoalescerState::Idle;
    }

    fn resting_state(&self) -> CoalescerState {
        if self.pending.is_empty() {
            CoalescerState::Idle
        } else {
            CoalescerState::Accumulating
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grid(rows: &[&[&str]]) -> GridView {
        GridView::new(
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn grid_set_reports_previous_value() {
        let mut g = grid(&[&["a"]]);
        assert_eq!(g.set(0, 0, "b".to_string()), Some("a".to_string()));
        assert_eq!(g.set(2, 2, "c".to_string()), None);
        assert_eq!(
            g.cells().collect::<Vec<_>>(),
            vec![(CellKey::new(0, 0), "b"), (CellKey::new(2, 2), "c")]
        );
    }

    #[test]
    fn window_rows_land_at_their_sheet_position() {
        let g = GridView::from_window(CellKey::new(4, 1), vec![vec!["x".to_string()], vec![], vec![String::new(), "y".to_string()]]);
        assert_eq!(g.get(4, 1), Some("x"));
        assert_eq!(g.get(6, 1), Some(""));
        assert_eq!(g.get(6, 2), Some("y"));
        assert_eq!(g.get(0, 0), None);
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn edits_far_down_the_sheet_stay_sparse() {
        let mut c = WriteCoalescer::default();
        c.apply_edit(MAX_ROW_INDEX, u32::MAX, "last").unwrap();
        assert_eq!(c.grid().len(), 1);
        let batch = c.begin_commit().unwrap();
        assert_eq!(batch.writes()[0].row, u32::MAX);
        assert_eq!(batch.writes()[0].col, "MWLQKWV");
    }

    #[test]
    fn unaddressable_rows_are_rejected() {
        let mut c = WriteCoalescer::default();
        assert!(matches!(
            c.apply_edit(u32::MAX, 0, "x"),
            Err(SyncError::InvalidRange { .. })
        ));
        assert_eq!(c.state(), CoalescerState::Idle);
        assert!(c.grid().is_empty());
        assert!(c.begin_commit().is_none());
    }

    #[test]
    fn repeated_edits_coalesce_to_last_value() {
        let mut c = WriteCoalescer::new(grid(&[&["1", "2"]]));
        assert_eq!(c.state(), CoalescerState::Idle);
        c.apply_edit(0, 1, "a").unwrap();
        c.apply_edit(0, 1, "b").unwrap();
        c.apply_edit(0, 1, "c").unwrap();
        assert_eq!(c.state(), CoalescerState::Accumulating);
        assert_eq!(c.pending_len(), 1);

        let batch = c.begin_commit().unwrap();
        assert_eq!(
            batch.writes(),
            vec![Write {
                row: 1,
                col: "B".to_string(),
                value: "c".to_string(),
            }]
        );
    }

    #[test]
    fn writes_use_column_labels_past_z() {
        let mut c = WriteCoalescer::default();
        c.apply_edit(9, 27, "x").unwrap();
        let batch = c.begin_commit().unwrap();
        assert_eq!(batch.writes()[0].col, "AB");
        assert_eq!(batch.writes()[0].row, 10);
    }

    #[test]
    fn only_one_batch_in_flight() {
        let mut c = WriteCoalescer::default();
        assert!(c.begin_commit().is_none());
        c.apply_edit(0, 0, "x").unwrap();
        let batch = c.begin_commit().unwrap();
        c.apply_edit(1, 0, "y").unwrap();
        assert_eq!(c.state(), CoalescerState::Committing);
        assert!(c.begin_commit().is_none());

        c.commit_succeeded(&batch);
        assert_eq!(c.state(), CoalescerState::Accumulating);
        let next = c.begin_commit().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next.edits()[0].key(), CellKey::new(1, 0));
    }

    #[test]
    fn success_clears_snapshot_but_keeps_newer_edits() {
        let mut c = WriteCoalescer::new(grid(&[&["orig"]]));
        c.apply_edit(0, 0, "first").unwrap();
        let batch = c.begin_commit().unwrap();
        c.apply_edit(0, 0, "second").unwrap();
        c.commit_succeeded(&batch);

        assert_eq!(c.pending(CellKey::new(0, 0)).map(|p| p.value.as_str()), Some("second"));
        assert_eq!(c.grid().get(0, 0), Some("second"));

        // If the follow-up commit fails, the cell falls back to what the
        // server acknowledged, not the original value.
        let batch = c.begin_commit().unwrap();
        c.commit_failed(&batch);
        c.settle();
        assert_eq!(c.grid().get(0, 0), Some("first"));
        assert_eq!(c.state(), CoalescerState::Idle);
    }

    #[test]
    fn failure_restores_pre_edit_values() {
        let mut c = WriteCoalescer::new(grid(&[&["a", "b"], &["c"]]));
        c.apply_edit(0, 1, "B!").unwrap();
        c.apply_edit(1, 0, "C!").unwrap();
        c.apply_edit(1, 0, "C!!").unwrap();
        let batch = c.begin_commit().unwrap();

        let mut reverted = c.commit_failed(&batch);
        reverted.sort();
        assert_eq!(reverted, vec![CellKey::new(0, 1), CellKey::new(1, 0)]);
        assert_eq!(c.state(), CoalescerState::RolledBack);
        assert_eq!(c.pending_len(), 0);
        assert_eq!(c.grid(), &grid(&[&["a", "b"], &["c"]]));

        c.settle();
        assert_eq!(c.state(), CoalescerState::Idle);
    }

    #[test]
    fn failure_keeps_edits_made_during_the_commit() {
        let mut c = WriteCoalescer::new(grid(&[&["a", "b"]]));
        c.apply_edit(0, 0, "x").unwrap();
        c.apply_edit(0, 1, "y").unwrap();
        let batch = c.begin_commit().unwrap();
        c.apply_edit(0, 1, "z").unwrap();

        assert_eq!(c.commit_failed(&batch), vec![CellKey::new(0, 0)]);
        c.settle();
        assert_eq!(c.grid().get(0, 0), Some("a"));
        assert_eq!(c.grid().get(0, 1), Some("z"));
        assert_eq!(c.state(), CoalescerState::Accumulating);

        let retry = c.begin_commit().unwrap();
        c.commit_failed(&retry);
        assert_eq!(c.grid().get(0, 1), Some("b"));
    }

    #[test]
    fn edits_outside_loaded_rows_roll_back_to_unloaded() {
        let mut c = WriteCoalescer::default();
        c.apply_edit(3, 2, "new").unwrap();
        let batch = c.begin_commit().unwrap();
        c.commit_failed(&batch);
        assert_eq!(c.grid().get(3, 2), None);
        assert!(c.grid().is_empty());
    }

    #[test]
    fn reconcile_overlays_pending_edits_on_fresh_rows() {
        let mut c = WriteCoalescer::new(grid(&[&["a", "b"]]));
        c.apply_edit(0, 0, "mine").unwrap();
        c.reconcile(CellKey::new(0, 0), vec![vec!["server".to_string(), "=SUM()".to_string()]]);

        assert_eq!(c.grid().get(0, 0), Some("mine"));
        assert_eq!(c.grid().get(0, 1), Some("=SUM()"));

        let batch = c.begin_commit().unwrap();
        c.commit_failed(&batch);
        assert_eq!(c.grid().get(0, 0), Some("server"));
    }

    #[test]
    fn reconcile_places_rows_at_the_window_origin() {
        let mut c = WriteCoalescer::default();
        c.apply_edit(1, 1, "110").unwrap();
        // Window B2:C3.
        c.reconcile(
            CellKey::new(1, 1),
            vec![
                vec!["100".to_string(), "n".to_string()],
                vec!["200".to_string()],
            ],
        );
        assert_eq!(c.grid().get(1, 1), Some("110"));
        assert_eq!(c.grid().get(1, 2), Some("n"));
        assert_eq!(c.grid().get(2, 1), Some("200"));
        assert_eq!(c.grid().get(0, 0), None);

        let batch = c.begin_commit().unwrap();
        c.commit_failed(&batch);
        assert_eq!(c.grid().get(1, 1), Some("100"));
    }

    #[test]
    fn reset_discards_everything() {
        let mut c = WriteCoalescer::new(grid(&[&["a"]]));
        c.apply_edit(0, 0, "x").unwrap();
        c.reset(GridView::default());
        assert_eq!(c.state(), CoalescerState::Idle);
        assert_eq!(c.pending_len(), 0);
        assert!(c.begin_commit().is_none());
        assert_eq!(c.grid(), &GridView::default());
    }
}
