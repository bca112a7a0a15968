//! Column label codec.
//!
//! Labels are bijective base-26 numerals (`A` = 1 ... `Z` = 26 per position);
//! indices are **0-indexed**, so `A` is column `0` and `AA` is column `26`.

use crate::error::{Result, SyncError};

/// Returns true if `label` is a non-empty run of uppercase `A`-`Z`.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.bytes().all(|b| b.is_ascii_uppercase())
}

/// Convert a column label (`A`, `Z`, `AA`, ...) to a 0-indexed column.
///
/// Lowercase letters are rejected; callers that accept user input should
/// uppercase first. Labels whose value does not fit in `u32` are rejected as
/// well.
pub fn label_to_index(label: &str) -> Result<u32> {
    let invalid = || SyncError::InvalidFormat {
        label: label.to_string(),
    };
    if !is_valid_label(label) {
        return Err(invalid());
    }

    let mut col: u64 = 0;
    for b in label.bytes() {
        let digit = u64::from(b - b'A') + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(digit))
            .ok_or_else(invalid)?;
    }
    u32::try_from(col - 1).map_err(|_| invalid())
}

/// Convert a 0-indexed column to its label.
pub fn index_to_label(index: u32) -> String {
    let mut n = u64::from(index) + 1;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
