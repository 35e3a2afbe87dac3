//! Error types for the virtual tree.

use thiserror::Error;

/// Errors that can occur while navigating or reading the virtual tree.
#[derive(Debug, Error)]
pub enum Error {
    /// Archive error.
    #[error("{0}")]
    Archive(sqpack_archive::Error),

    /// Common library error.
    #[error("{0}")]
    Common(sqpack_common::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A folder was enumerated before its resolution finished.
    #[error("folder {path:?} is not resolved yet")]
    NotResolved { path: String },

    /// A node id that does not belong to this tree.
    #[error("invalid tree node {0}")]
    InvalidNode(u32),

    /// A typed resource could not be parsed from the file contents.
    #[error("not a {kind} resource: {reason}")]
    Resource { kind: &'static str, reason: String },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a cancellation rather than a failure.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn resource(kind: &'static str, reason: impl ToString) -> Self {
        Error::Resource {
            kind,
            reason: reason.to_string(),
        }
    }
}

impl From<sqpack_archive::Error> for Error {
    fn from(err: sqpack_archive::Error) -> Self {
        match err {
            sqpack_archive::Error::Cancelled => Error::Cancelled,
            other => Error::Archive(other),
        }
    }
}

impl From<sqpack_common::Error> for Error {
    fn from(err: sqpack_common::Error) -> Self {
        match err {
            sqpack_common::Error::Cancelled => Error::Cancelled,
            other => Error::Common(other),
        }
    }
}

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, Error>;
