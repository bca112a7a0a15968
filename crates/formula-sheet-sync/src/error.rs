use thiserror::Error;

/// Boxed cause of a failed remote call (network, auth, quota, ...).
pub type UpstreamError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid column label {label:?}: expected uppercase letters A-Z")]
    InvalidFormat { label: String },
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },
    #[error("upstream {operation} failed: {source}")]
    UpstreamFailure {
        operation: &'static str,
        #[source]
        source: UpstreamError,
    },
    #[error("no valid writes to process ({rejected} rejected)")]
    ValidationRejected { rejected: usize },
    #[error("edit session is closed")]
    SessionClosed,
}

impl SyncError {
    pub(crate) fn invalid_range(reason: impl Into<String>) -> Self {
        SyncError::InvalidRange {
            reason: reason.into(),
        }
    }

    pub(crate) fn upstream(operation: &'static str, source: UpstreamError) -> Self {
        SyncError::UpstreamFailure { operation, source }
    }

    /// Caller errors are rejected before any remote call and must not be retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidFormat { .. }
                | SyncError::InvalidRange { .. }
                | SyncError::ValidationRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
