//! Compiled matcher trees.

use std::borrow::Cow;

use sqpack_archive::FileType;
use sqpack_vfs::FileInfo;

use crate::pattern::{Deadline, Outcome, TextPattern};
use crate::size::SizePredicate;

/// The view of a folder or file that matchers evaluate.
///
/// Implementations should compute expensive facts (entry header, contents)
/// lazily, since most matchers never ask for them.
pub trait Subject {
    fn is_folder(&self) -> bool;

    /// Name without a trailing slash.
    fn name(&self) -> Option<Cow<'_, str>>;

    /// Full path without a trailing slash.
    fn path(&self) -> Option<Cow<'_, str>>;

    /// Hashes the item is known by: a file's name and full path hashes, or a
    /// folder's path hash.
    fn hashes(&self) -> Vec<u32>;

    /// Entry header facts, for files.
    fn info(&self) -> Option<FileInfo>;

    /// Logical contents, for files.
    fn data(&self) -> Option<&[u8]>;
}

/// Which text a text matcher reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Name,
    Path,
    Data,
    /// Bare terms: name first, then path.
    NameOrPath,
}

/// Which size a size matcher reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    /// Declared logical size
    Raw,
    Occupied,
    Reserved,
}

/// Target of a `type:` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    File,
    Folder,
    Structural(FileType),
}

#[derive(Debug, Clone)]
pub struct TextMatcher {
    pub field: TextField,
    pub pattern: TextPattern,
}

impl TextMatcher {
    fn evaluate(&self, subject: &dyn Subject, deadline: &Deadline) -> Outcome {
        match self.field {
            TextField::Name => self.text(subject.name(), deadline),
            TextField::Path => self.text(subject.path(), deadline),
            TextField::Data if subject.is_folder() => Outcome::NoMatch,
            // Contents are only read while the item still has budget.
            TextField::Data if deadline.expired() => Outcome::TimedOut,
            TextField::Data => match subject.data() {
                Some(data) => self.pattern.find(data, deadline),
                None => Outcome::NoMatch,
            },
            TextField::NameOrPath => match self.text(subject.name(), deadline) {
                Outcome::NoMatch => self.text(subject.path(), deadline),
                decided => decided,
            },
        }
    }

    fn text(&self, text: Option<Cow<'_, str>>, deadline: &Deadline) -> Outcome {
        let Some(text) = text else {
            return Outcome::NoMatch;
        };
        if self.pattern.wants_lowercase() {
            self.pattern.find(text.to_lowercase().as_bytes(), deadline)
        } else {
            self.pattern.find(text.as_bytes(), deadline)
        }
    }
}

/// A node of the compiled query.
#[derive(Debug, Clone)]
pub enum Matcher {
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Xor(Vec<Matcher>),
    Not(Box<Matcher>),
    Text(TextMatcher),
    Type(TypeFilter),
    Hash(u32),
    Size(SizeField, SizePredicate),
}

impl Matcher {
    /// Negate `inner`, unwrapping a double negation.
    pub fn not(inner: Matcher) -> Matcher {
        match inner {
            Matcher::Not(original) => *original,
            other => Matcher::Not(Box::new(other)),
        }
    }

    /// Evaluate against one item.
    ///
    /// `And` and `Or` stop at the first decisive operand; a timeout only
    /// decides the result when nothing else does.
    pub fn evaluate(&self, subject: &dyn Subject, deadline: &Deadline) -> Outcome {
        match self {
            Matcher::And(parts) => {
                let mut timed_out = false;
                for part in parts {
                    match part.evaluate(subject, deadline) {
                        Outcome::NoMatch => return Outcome::NoMatch,
                        Outcome::TimedOut => timed_out = true,
                        Outcome::Match => {}
                    }
                }
                if timed_out {
                    Outcome::TimedOut
                } else {
                    Outcome::Match
                }
            }
            Matcher::Or(parts) => {
                let mut timed_out = false;
                for part in parts {
                    match part.evaluate(subject, deadline) {
                        Outcome::Match => return Outcome::Match,
                        Outcome::TimedOut => timed_out = true,
                        Outcome::NoMatch => {}
                    }
                }
                if timed_out {
                    Outcome::TimedOut
                } else {
                    Outcome::NoMatch
                }
            }
            Matcher::Xor(parts) => {
                let mut odd = false;
                for part in parts {
                    match part.evaluate(subject, deadline) {
                        Outcome::TimedOut => return Outcome::TimedOut,
                        Outcome::Match => odd = !odd,
                        Outcome::NoMatch => {}
                    }
                }
                Outcome::from_bool(odd)
            }
            Matcher::Not(inner) => inner.evaluate(subject, deadline).negate(),
            Matcher::Text(text) => text.evaluate(subject, deadline),
            Matcher::Type(filter) => Outcome::from_bool(match filter {
                TypeFilter::Folder => subject.is_folder(),
                TypeFilter::File => !subject.is_folder(),
                TypeFilter::Structural(file_type) => {
                    !subject.is_folder() && subject.info().is_some_and(|info| info.file_type == *file_type)
                }
            }),
            Matcher::Hash(hash) => Outcome::from_bool(subject.hashes().contains(hash)),
            Matcher::Size(field, predicate) => {
                if subject.is_folder() {
                    return Outcome::NoMatch;
                }
                let Some(info) = subject.info() else {
                    return Outcome::NoMatch;
                };
                let size = match field {
                    SizeField::Raw => info.size,
                    SizeField::Occupied => info.occupied,
                    SizeField::Reserved => info.reserved,
                };
                Outcome::from_bool(predicate.matches(size))
            }
        }
    }
}
