//! Error taxonomy for the exchange-note workflow

use crate::note::NoteStatus;
use sled::transaction::TransactionError;

/// Result type used across the crate.
pub type NoteResult<T> = Result<T, NoteError>;

/// Every failure the workflow can surface to a caller.
///
/// The first five variants are client errors: nothing has been persisted, or
/// the touched rows were left exactly as they were. `Storage` and `Codec` are
/// server-side failures; any in-flight transaction has been rolled back.
#[derive(thiserror::Error, Debug)]
pub enum NoteError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} {code} not found")]
    NotFound { kind: &'static str, code: String },

    #[error("cannot {action} a note in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: NoteStatus,
    },

    #[error("insufficient stock of {product} at {location}: have {available}, need {requested}")]
    InsufficientStock {
        location: String,
        product: String,
        available: u64,
        requested: u64,
    },

    #[error("user {user} is not permitted to {action}")]
    Unauthorized { user: String, action: &'static str },

    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec failure: {0}")]
    Codec(String),
}

impl NoteError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, code: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            code: code.into(),
        }
    }
}

// A transaction either aborted with a domain error or failed in sled itself;
// flatten both back into the caller-facing enum.
impl From<TransactionError<NoteError>> for NoteError {
    fn from(err: TransactionError<NoteError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => NoteError::Storage(e),
        }
    }
}
