//! Error types for the archive crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading SqPack indexes and dat files.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(sqpack_common::Error),

    /// The SqPack header names a different file kind than expected.
    #[error("unexpected SqPack file type: expected {expected}, got {actual}")]
    UnexpectedPackType { expected: u32, actual: u32 },

    /// A table or block points outside the mapped file.
    #[error("range {offset:#x}+{len:#x} is outside the file ({file_len:#x} bytes)")]
    OutOfBounds { offset: u64, len: u64, file_len: u64 },

    /// Unsupported file entry type.
    #[error("unsupported file entry type: {0}")]
    UnsupportedFileType(u32),

    /// Malformed block header or block table.
    #[error("invalid block at {offset:#x}: {reason}")]
    InvalidBlock { offset: u64, reason: String },

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// An index file name that does not follow `<cc><ee><kk>.<platform>.index`.
    #[error("invalid index file name: {}", .0.display())]
    InvalidIndexName(PathBuf),

    /// A dat file id the index does not declare.
    #[error("dat file {dat_id} does not exist for index {index_id:06x}")]
    MissingDatFile { index_id: u32, dat_id: u8 },

    /// Invalid glob pattern built from the archive directory.
    #[error("invalid archive path pattern: {0}")]
    Pattern(#[from] glob::PatternError),

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

    pub(crate) fn invalid_block(offset: u64, reason: impl Into<String>) -> Self {
        Error::InvalidBlock {
            offset,
            reason: reason.into(),
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

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io) => io,
            Error::Cancelled => std::io::Error::new(std::io::ErrorKind::Interrupted, err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
