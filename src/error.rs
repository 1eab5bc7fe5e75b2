use std::result;

use thiserror::Error;

/// Errors surfaced by this crate.
///
/// `InvalidIso` means the on-disc data violates an invariant we do not
/// tolerate; `InvalidInput` means a caller-supplied argument was rejected
/// before any mutation took place; `Internal` means a state-machine
/// invariant was violated and indicates a bug in the library or its caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid ISO: {0}")]
    InvalidIso(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_iso(msg: impl Into<String>) -> Self {
        Error::InvalidIso(msg.into())
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

pub type Result<T> = result::Result<T, Error>;
