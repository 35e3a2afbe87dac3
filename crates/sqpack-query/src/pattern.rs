//! Text patterns with a per-item time budget.

use std::time::{Duration, Instant};

use memchr::memmem;
use regex::bytes::{Regex, RegexBuilder};

use crate::literal::{Literal, Segment};
use crate::{Error, Result};

/// Result of evaluating a matcher against one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Match,
    NoMatch,
    /// The time budget ran out before a decision was reached.
    TimedOut,
}

impl Outcome {
    #[inline]
    pub fn from_bool(matched: bool) -> Self {
        if matched {
            Outcome::Match
        } else {
            Outcome::NoMatch
        }
    }

    #[inline]
    pub fn is_match(self) -> bool {
        self == Outcome::Match
    }

    /// Swap match and no match. A timeout stays a timeout.
    #[inline]
    pub fn negate(self) -> Self {
        match self {
            Outcome::Match => Outcome::NoMatch,
            Outcome::NoMatch => Outcome::Match,
            Outcome::TimedOut => Outcome::TimedOut,
        }
    }
}

/// A shared stopwatch with a budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Self::new(Duration::MAX)
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }
}

/// How the pattern must line up with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
}

/// How the pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    PlainText,
    Wildcard,
    Regex,
}

/// One element of a wildcard pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wild<T> {
    Lit(T),
    Any,
    Star,
}

/// A compiled text pattern.
#[derive(Debug, Clone)]
pub enum TextPattern {
    /// Literal bytes; for case-insensitive use the needle is lowercased.
    Plain { needle: Vec<u8>, equality: Equality },
    /// Wildcards over characters, for names and paths.
    CharWildcard(Vec<Wild<char>>),
    /// Wildcards over bytes, for file contents.
    ByteWildcard(Vec<Wild<u8>>),
    Regex(Regex),
}

/// Steps between deadline checks in the wildcard matcher.
const CHECK_INTERVAL: usize = 1024;

impl TextPattern {
    /// Compile a decoded literal as plain text or wildcards.
    ///
    /// With `case_insensitive` the haystack passed to [`TextPattern::find`]
    /// must be lowercased; regexes handle case themselves.
    pub fn compile(literal: &Literal, wildcards: bool, equality: Equality, case_insensitive: bool) -> Self {
        if !wildcards {
            let needle = if case_insensitive {
                literal.to_text().to_lowercase().into_bytes()
            } else {
                literal.bytes().to_vec()
            };
            return TextPattern::Plain { needle, equality };
        }

        if case_insensitive {
            let mut tokens = Vec::new();
            for segment in literal.segments() {
                match segment {
                    Segment::Text(bytes) => {
                        tokens.extend(String::from_utf8_lossy(bytes).to_lowercase().chars().map(Wild::Lit))
                    }
                    Segment::Star => tokens.push(Wild::Star),
                    Segment::Any => tokens.push(Wild::Any),
                }
            }
            TextPattern::CharWildcard(anchor(tokens, equality))
        } else {
            let mut tokens = Vec::new();
            for segment in literal.segments() {
                match segment {
                    Segment::Text(bytes) => tokens.extend(bytes.iter().copied().map(Wild::Lit)),
                    Segment::Star => tokens.push(Wild::Star),
                    Segment::Any => tokens.push(Wild::Any),
                }
            }
            TextPattern::ByteWildcard(anchor(tokens, equality))
        }
    }

    /// Compile a regular expression.
    pub fn compile_regex(pattern: &str, equality: Equality, case_insensitive: bool, position: usize) -> Result<Self> {
        let anchored = match equality {
            Equality::Contains => pattern.to_string(),
            Equality::Equals => format!("^(?:{pattern})$"),
            Equality::StartsWith => format!("^(?:{pattern})"),
            Equality::EndsWith => format!("(?:{pattern})$"),
        };
        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(case_insensitive)
            .unicode(case_insensitive)
            .size_limit(1 << 22)
            .build()
            .map_err(|e| Error::parse(position, format!("invalid regular expression: {e}")))?;
        Ok(TextPattern::Regex(regex))
    }

    /// Whether the pattern needs a lowercased haystack.
    pub fn wants_lowercase(&self) -> bool {
        matches!(self, TextPattern::Plain { .. } | TextPattern::CharWildcard(_))
    }

    /// Match `haystack` within the deadline.
    pub fn find(&self, haystack: &[u8], deadline: &Deadline) -> Outcome {
        if deadline.expired() {
            return Outcome::TimedOut;
        }
        let outcome = match self {
            TextPattern::Plain { needle, equality } => Outcome::from_bool(match equality {
                Equality::Contains => memmem::find(haystack, needle).is_some(),
                Equality::Equals => haystack == needle.as_slice(),
                Equality::StartsWith => haystack.starts_with(needle),
                Equality::EndsWith => haystack.ends_with(needle),
            }),
            TextPattern::CharWildcard(tokens) => {
                let chars: Vec<char> = String::from_utf8_lossy(haystack).chars().collect();
                wildcard(tokens, &chars, deadline)
            }
            TextPattern::ByteWildcard(tokens) => wildcard(tokens, haystack, deadline),
            TextPattern::Regex(regex) => Outcome::from_bool(regex.is_match(haystack)),
        };
        // A decision reached after the budget ran out is not trusted.
        if outcome == Outcome::NoMatch && deadline.expired() {
            return Outcome::TimedOut;
        }
        outcome
    }
}

fn anchor<T>(mut tokens: Vec<Wild<T>>, equality: Equality) -> Vec<Wild<T>> {
    if matches!(equality, Equality::Contains | Equality::EndsWith) {
        tokens.insert(0, Wild::Star);
    }
    if matches!(equality, Equality::Contains | Equality::StartsWith) {
        tokens.push(Wild::Star);
    }
    tokens
}

/// Greedy wildcard matching with single-star backtracking.
fn wildcard<T: PartialEq + Copy>(pattern: &[Wild<T>], text: &[T], deadline: &Deadline) -> Outcome {
    let mut p = 0usize;
    let mut t = 0usize;
    let mut star: Option<usize> = None;
    let mut star_text = 0usize;
    let mut steps = 0usize;

    while t < text.len() {
        steps += 1;
        if steps % CHECK_INTERVAL == 0 && deadline.expired() {
            return Outcome::TimedOut;
        }

        match pattern.get(p) {
            Some(Wild::Any) => {
                p += 1;
                t += 1;
                continue;
            }
            Some(Wild::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            Some(Wild::Star) => {
                star = Some(p);
                p += 1;
                star_text = t;
                continue;
            }
            _ => {}
        }

        match star {
            Some(at) => {
                p = at + 1;
                star_text += 1;
                t = star_text;
            }
            None => return Outcome::NoMatch,
        }
    }

    while matches!(pattern.get(p), Some(Wild::Star)) {
        p += 1;
    }
    Outcome::from_bool(p == pattern.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(raw: &str) -> Literal {
        Literal::decode(raw, 0).unwrap()
    }

    fn check(raw: &str, wildcards: bool, equality: Equality, haystack: &str) -> Outcome {
        let pattern = TextPattern::compile(&literal(raw), wildcards, equality, true);
        pattern.find(haystack.to_lowercase().as_bytes(), &Deadline::unbounded())
    }

    #[test]
    fn test_plain_equality_modes() {
        let hay = "chara/equipment/e0001.mdl";
        assert!(check("EQUIP", false, Equality::Contains, hay).is_match());
        assert!(check("chara", false, Equality::StartsWith, hay).is_match());
        assert!(check(".MDL", false, Equality::EndsWith, hay).is_match());
        assert!(!check("chara", false, Equality::Equals, hay).is_match());
        // A star is literal in plain text.
        assert!(!check("*.mdl", false, Equality::Contains, hay).is_match());
    }

    #[test]
    fn test_wildcards() {
        assert!(check("*.atex", true, Equality::Equals, "fire.ATEX").is_match());
        assert!(!check("*.atex", true, Equality::Equals, "fire.atex.bak").is_match());
        assert!(check("e00?1", true, Equality::Contains, "x/e0001/y").is_match());
        assert!(check("a*b*c", true, Equality::Equals, "aXXbYYbc").is_match());
        assert!(check(r"a\*", true, Equality::Equals, "a*").is_match());
        assert!(!check(r"a\*", true, Equality::Equals, "ab").is_match());
        assert!(check("é?", true, Equality::Equals, "Éx").is_match());
    }

    #[test]
    fn test_byte_wildcards_are_case_sensitive() {
        let pattern = TextPattern::compile(&literal(r"\x00?AB"), true, Equality::Contains, false);
        let deadline = Deadline::unbounded();
        assert!(pattern.find(b"xx\x00\xffABzz", &deadline).is_match());
        assert!(!pattern.find(b"xx\x00\xffabzz", &deadline).is_match());
    }

    #[test]
    fn test_regex() {
        let pattern = TextPattern::compile_regex(r"e\d{4}", Equality::Contains, true, 0).unwrap();
        assert!(pattern.find(b"chara/E0001", &Deadline::unbounded()).is_match());
        let pattern = TextPattern::compile_regex(r"e\d{4}", Equality::Equals, true, 0).unwrap();
        assert!(!pattern.find(b"chara/e0001", &Deadline::unbounded()).is_match());
        assert!(TextPattern::compile_regex("(", Equality::Contains, true, 3).is_err());
    }

    #[test]
    fn test_zero_budget_times_out() {
        let pattern = TextPattern::compile(&literal("*a*a*a*b"), true, Equality::Equals, false);
        let haystack = vec![b'a'; 1 << 20];
        let deadline = Deadline::new(Duration::ZERO);
        assert_eq!(pattern.find(&haystack, &deadline), Outcome::TimedOut);
    }

    #[test]
    fn test_outcome_negation() {
        assert_eq!(Outcome::Match.negate(), Outcome::NoMatch);
        assert_eq!(Outcome::TimedOut.negate(), Outcome::TimedOut);
    }
}
