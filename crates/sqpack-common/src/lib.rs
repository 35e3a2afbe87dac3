//! Common utilities for SqPack tooling.
//!
//! This crate provides foundational types and utilities used across all sqpack crates:
//!
//! - [`BinaryReader`] - Zero-copy binary reading from byte slices
//! - [`hash`] - The client's CRC32 path hashing
//! - [`CancellationToken`] - Cooperative cancellation shared across threads

mod cancel;
mod error;
mod reader;

pub mod hash;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
