//! Crate-wide error type and result alias.

use thiserror::Error;

/// Errors the storage engine can surface to a caller.
///
/// A lookup miss is never an error: `get` returns `Ok(None)` for an unknown
/// or deleted key (see `crate::engine`).
#[derive(Error, Debug)]
pub enum Error {
    /// Any underlying filesystem failure: open, write, flush, seek, read,
    /// rename, unlink, mkdir.
    #[error("I/O error - {0}")]
    Io(#[from] std::io::Error),
    /// Decoding detected a truncated slice or an invalid size field.
    #[error("malformed record - {0}")]
    MalformedRecord(String),
    /// A caller-detectable misuse, e.g. operating on an engine whose
    /// directory was removed by `clear(true)`.
    #[error("precondition violation - {0}")]
    PreconditionViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
