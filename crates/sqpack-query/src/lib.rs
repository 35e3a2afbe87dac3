//! Boolean query language and parallel search over a [`sqpack_vfs::VirtualTree`].
//!
//! A query combines predicates with `AND`, `OR`, `XOR` and `NOT`:
//!
//! - `name:`, `path:` and `data:` match text, as plain text, wildcards or
//!   `/regex/`, optionally anchored (`name:=exact`, `name:^prefix`)
//! - `type:` selects files, folders or a structural file type
//! - `hash:` matches a folder, file name or full path hash
//! - `size:`, `occupied:` and `reserved:` compare byte counts (`size:>=1m`)
//!
//! A bare word matches the item name or path.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sqpack_common::CancellationToken;
//! use sqpack_query::{SearchObserver, SearchOptions, Searcher};
//! use sqpack_vfs::{FileId, PathListNameService, TreeOptions, VirtualTree};
//!
//! struct Print;
//!
//! impl SearchObserver for Print {
//!     fn file_found(&self, tree: &VirtualTree, id: FileId) {
//!         if let Ok(path) = tree.file_path(id) {
//!             println!("{path}");
//!         }
//!     }
//! }
//!
//! let names = PathListNameService::load("paths.txt")?;
//! let tree = VirtualTree::open("game/sqpack", Arc::new(names), &TreeOptions::default())?;
//! let searcher = Searcher::new(&tree, SearchOptions::default());
//! searcher.run(tree.root(), "type:texture AND NOT name:*.atex", &Print, &CancellationToken::new())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod lexer;
mod literal;
mod matcher;
mod parser;
mod pattern;
mod search;
mod size;

pub use error::{Error, Result};
pub use literal::{Literal, Segment};
pub use matcher::{Matcher, SizeField, Subject, TextField, TextMatcher, TypeFilter};
pub use parser::Query;
pub use pattern::{Deadline, Equality, MatchMode, Outcome, TextPattern, Wild};
pub use search::{SearchObserver, SearchOptions, SearchProgress, SearchState, Searcher, MIN_PROGRESS_INTERVAL};
pub use size::SizePredicate;
