//! Error types for query parsing and search.

use thiserror::Error;

/// Errors that can occur while parsing a query or running a search.
#[derive(Debug, Error)]
pub enum Error {
    /// The query text is malformed.
    #[error("query error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// Virtual tree error.
    #[error("{0}")]
    Vfs(sqpack_vfs::Error),

    /// The search was cancelled.
    #[error("search cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a cancellation rather than a failure.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            position,
            message: message.into(),
        }
    }
}

impl From<sqpack_vfs::Error> for Error {
    fn from(err: sqpack_vfs::Error) -> Self {
        match err {
            sqpack_vfs::Error::Cancelled => Error::Cancelled,
            other => Error::Vfs(other),
        }
    }
}

impl From<sqpack_common::Error> for Error {
    fn from(err: sqpack_common::Error) -> Self {
        Error::from(sqpack_vfs::Error::from(err))
    }
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, Error>;
