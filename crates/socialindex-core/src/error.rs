//! Error types for the socialindex pipeline.

use thiserror::Error;

/// Errors that can occur while indexing blocks or answering queries.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The referenced entity does not exist (or is already soft-deleted).
    #[error("not found")]
    NotFound,

    /// A gap in block delivery: the block after the stored height must come first.
    #[error("requested height {requested} is too high, expected {expected}")]
    HeightTooHigh { requested: u64, expected: u64 },

    /// The block was already applied.
    #[error("requested height {requested} is too low, expected {expected}")]
    HeightTooLow { requested: u64, expected: u64 },

    #[error("Height lock error: {0}")]
    Lock(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A message handler failed; `source` is the error it returned.
    #[error("Handler error in '{handler}': {source}")]
    Handler {
        handler: String,
        #[source]
        source: Box<IndexerError>,
    },

    /// Malformed query parameters, rejected before reaching storage.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Block source error: {0}")]
    Source(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the referenced entity was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` if the block was already committed by an earlier delivery.
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::HeightTooLow { .. })
    }

    /// Returns `true` for errors raised by the height gate's own bookkeeping
    /// rather than by a message handler.
    pub fn is_gate_error(&self) -> bool {
        matches!(
            self,
            Self::HeightTooHigh { .. } | Self::HeightTooLow { .. } | Self::Lock(_)
        )
    }

    /// Returns `true` if the consumer was cancelled before the block began.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns `true` if redelivering the same block may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler { source, .. } => source.is_retryable(),
            other => matches!(
                other,
                Self::HeightTooHigh { .. } | Self::Lock(_) | Self::Storage(_) | Self::Source(_)
            ),
        }
    }

    /// Whether a block source configured to skip errored blocks may move
    /// past this error. Gate errors and cancellation are never skipped: a
    /// skipped gap would leave every later block too high.
    pub fn is_skippable(&self) -> bool {
        !self.is_gate_error() && !self.is_aborted()
    }

    /// The innermost error, looking through handler wrappers.
    pub fn root_cause(&self) -> &IndexerError {
        match self {
            Self::Handler { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_low_is_already_applied() {
        let err = IndexerError::HeightTooLow { requested: 4, expected: 6 };
        assert!(err.is_already_applied());
        assert!(err.is_gate_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn handler_errors_keep_their_cause() {
        let err = IndexerError::Handler {
            handler: "SetLike".into(),
            source: Box::new(IndexerError::Storage("connection reset".into())),
        };
        assert!(!err.is_gate_error());
        assert!(err.is_retryable());
        assert!(err.is_skippable());
        assert!(matches!(err.root_cause(), IndexerError::Storage(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "Handler error in 'SetLike': Storage error: connection reset"
        );
    }

    #[test]
    fn handler_wrapping_validation_is_terminal() {
        let err = IndexerError::Handler {
            handler: "DistributeRewards".into(),
            source: Box::new(IndexerError::Validation("bad reward".into())),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn gap_and_cancellation_are_never_skipped() {
        let gap = IndexerError::HeightTooHigh { requested: 3, expected: 2 };
        assert!(!gap.is_skippable());
        let aborted = IndexerError::Aborted { reason: "cancelled".into() };
        assert!(aborted.is_aborted());
        assert!(!aborted.is_skippable());
        assert!(IndexerError::Storage("duplicate key".into()).is_skippable());
    }

    #[test]
    fn validation_is_terminal() {
        let err = IndexerError::Validation("invalid sortBy".into());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Invalid request: invalid sortBy");
    }
}
