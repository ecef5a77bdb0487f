//! Error taxonomy for the encryption and analytics layers.
//!
//! Read-path crypto failures never cross the repository boundary: an
//! unwrap failure degrades one record, a field decrypt failure degrades
//! one field. Write-path failures always propagate, because silently
//! dropping a write is worse than surfacing it.

use thiserror::Error;

/// Master-key and data-key failures from the vault layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// No authenticated session; fatal to the whole load.
    #[error("no authenticated session, master key unavailable")]
    Unavailable,
    /// The wrapped payload is malformed or was wrapped under a different
    /// master key.
    #[error("data key unwrap failed (wrong master key or corrupted wrap)")]
    UnwrapFailure,
    /// Write-path wrap failure.
    #[error("data key wrap failed")]
    WrapFailure,
}

/// Per-field encryption failures from the codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Write-path encryption failure.
    #[error("field encryption failed")]
    EncryptFailure,
    /// Authentication-tag mismatch: wrong key, corrupted ciphertext, or
    /// tampering. Distinct from field absence, which is not an error.
    #[error("field decryption failed (wrong key, corrupted ciphertext, or tampering)")]
    DecryptFailure,
}

/// Store-level failures. These propagate on both read and write paths:
/// a store that cannot be read at all is not a per-record condition.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("malformed row for goal {goal_id}: {reason}")]
    MalformedRow { goal_id: String, reason: String },
}

/// Failures surfaced by the goal repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The underlying row was deleted concurrently. Retryable conflict.
    #[error("record was deleted concurrently")]
    StaleRecord,
    /// Mutation attempted on a record whose data key never unwrapped.
    #[error("record could not be decrypted; its data key is unavailable")]
    RecordUnreadable,
    /// A structured field payload failed to serialize on the write path.
    #[error("malformed {field} payload: {source}")]
    Payload {
        field: &'static str,
        source: serde_json::Error,
    },
}

/// Why a goal was skipped during an analytics pass. Aggregated in
/// `InsightRun::skipped` so skipped analyses are observable, not just
/// logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The record carries a failed-decryption placeholder instead of
    /// real content; there is nothing meaningful to analyze.
    #[error("record was not decryptable")]
    UndecryptedRecord,
}
