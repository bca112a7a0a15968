use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::columns::is_valid_label;
use crate::error::{Result, SyncError};

/// A single-cell write as sent to the remote store: 1-indexed `row`,
/// column label `col`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub row: u32,
    pub col: String,
    pub value: String,
}

/// A write as received from a client, before validation.
///
/// Decoding is lenient: a field of the wrong JSON type decodes as absent so
/// that one bad candidate is rejected on its own instead of failing the whole
/// batch. Numbers and booleans are accepted as values and stringified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCandidate {
    #[serde(default, deserialize_with = "lenient_row")]
    pub row: Option<i64>,
    #[serde(default, deserialize_with = "lenient_col")]
    pub col: Option<String>,
    #[serde(default, deserialize_with = "lenient_value")]
    pub value: Option<String>,
}

impl WriteCandidate {
    pub fn new(row: i64, col: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            col: Some(col.into()),
            value: Some(value.into()),
        }
    }
}

impl From<Write> for WriteCandidate {
    fn from(write: Write) -> Self {
        Self {
            row: Some(i64::from(write.row)),
            col: Some(write.col),
            value: Some(write.value),
        }
    }
}

fn lenient_row<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(JsonValue::deserialize(deserializer)?.as_i64())
}

fn lenient_col<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    })
}

/// Why a candidate was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    MissingRow,
    RowOutOfRange,
    MissingColumn,
    InvalidColumn,
    MissingValue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    pub accepted: Vec<Write>,
    pub rejected: usize,
}

impl Validation {
    /// Accepted writes of a batch that had `submitted` candidates.
    ///
    /// An empty batch yields `Ok(None)` (nothing to do); a non-empty batch
    /// with nothing accepted is [`SyncError::ValidationRejected`].
    pub fn into_accepted(self, submitted: usize) -> Result<Option<Vec<Write>>> {
        if submitted == 0 {
            return Ok(None);
        }
        if self.accepted.is_empty() {
            return Err(SyncError::ValidationRejected {
                rejected: self.rejected,
            });
        }
        Ok(Some(self.accepted))
    }
}

/// Structural filter applied to every incoming batch before dispatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchValidator;

impl BatchValidator {
    pub fn check(candidate: &WriteCandidate) -> std::result::Result<Write, Rejection> {
        let row = candidate.row.ok_or(Rejection::MissingRow)?;
        let row = u32::try_from(row)
            .ok()
            .filter(|row| *row >= 1)
            .ok_or(Rejection::RowOutOfRange)?;
        let col = candidate.col.as_deref().ok_or(Rejection::MissingColumn)?;
        if !is_valid_label(col) {
            return Err(Rejection::InvalidColumn);
        }
        let value = candidate.value.as_ref().ok_or(Rejection::MissingValue)?;
        Ok(Write {
            row,
            col: col.to_string(),
            value: value.clone(),
        })
    }

    pub fn validate(&self, candidates: &[WriteCandidate]) -> Validation {
        let mut validation = Validation::default();
        for candidate in candidates {
            match Self::check(candidate) {
                Ok(write) => validation.accepted.push(write),
                Err(reason) => {
                    log::warn!("invalid write {candidate:?}: {reason:?}");
                    validation.rejected += 1;
                }
            }
        }
        if validation.rejected > 0 {
            log::warn!("filtered out {} invalid writes", validation.rejected);
        }
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filters_structurally_invalid_candidates() {
        let candidates = vec![
            WriteCandidate::new(1, "A", "x"),
            WriteCandidate::new(0, "B", "y"),
            WriteCandidate::new(2, "1", "z"),
        ];
        let validation = BatchValidator.validate(&candidates);
        assert_eq!(
            validation.accepted,
            vec![Write {
                row: 1,
                col: "A".to_string(),
                value: "x".to_string(),
            }]
        );
        assert_eq!(validation.rejected, 2);
    }

    #[test]
    fn checks_run_in_order() {
        let empty = WriteCandidate::default();
        assert_eq!(BatchValidator::check(&empty), Err(Rejection::MissingRow));

        let mut candidate = WriteCandidate::new(-3, "a", "v");
        assert_eq!(BatchValidator::check(&candidate), Err(Rejection::RowOutOfRange));
        candidate.row = Some(3);
        assert_eq!(BatchValidator::check(&candidate), Err(Rejection::InvalidColumn));
        candidate.col = None;
        assert_eq!(BatchValidator::check(&candidate), Err(Rejection::MissingColumn));
        candidate.col = Some("AB".to_string());
        candidate.value = None;
        assert_eq!(BatchValidator::check(&candidate), Err(Rejection::MissingValue));
    }

    #[test]
    fn empty_string_is_a_value() {
        let write = BatchValidator::check(&WriteCandidate::new(4, "C", "")).unwrap();
        assert_eq!(write.value, "");
    }

    #[test]
    fn lenient_decoding_isolates_bad_candidates() {
        let raw = r#"[
            {"row": 10, "col": "D", "value": 5200},
            {"row": "ten", "col": "D", "value": "x"},
            {"row": 2, "col": "E", "value": null},
            {"row": 3, "col": "F", "value": true}
        ]"#;
        let candidates: Vec<WriteCandidate> = serde_json::from_str(raw).unwrap();
        let validation = BatchValidator.validate(&candidates);
        assert_eq!(
            validation.accepted,
            vec![
                Write {
                    row: 10,
                    col: "D".to_string(),
                    value: "5200".to_string(),
                },
                Write {
                    row: 3,
                    col: "F".to_string(),
                    value: "true".to_string(),
                },
            ]
        );
        assert_eq!(validation.rejected, 2);
    }

    #[test]
    fn empty_and_fully_rejected_batches_differ() {
        assert_eq!(Validation::default().into_accepted(0).unwrap(), None);

        let validation = BatchValidator.validate(&[WriteCandidate::new(0, "A", "x")]);
        assert!(matches!(
            validation.into_accepted(1),
            Err(SyncError::ValidationRejected { rejected: 1 })
        ));
    }
}
