//! Recursive-descent query parser.
//!
//! Precedence from loosest to tightest: `OR`, `XOR`, `AND` (also implied by
//! juxtaposition), prefix `NOT`, then primaries. Operators with a missing
//! operand collapse to whatever operands remain.

use sqpack_archive::FileType;

use crate::lexer::{tokenize, Bracket, Token, TokenKind};
use crate::literal::Literal;
use crate::matcher::{Matcher, SizeField, Subject, TextField, TextMatcher, TypeFilter};
use crate::pattern::{Deadline, Equality, MatchMode, Outcome, TextPattern};
use crate::size::SizePredicate;
use crate::{Error, Result};

/// A parsed query.
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    root: Option<Matcher>,
}

impl Query {
    /// Parse query text. An empty query parses but matches nothing.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            index: 0,
            end: text.len(),
        };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(Error::parse(token.position, unexpected(&token.kind)));
        }
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// The query text as written.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The compiled matcher tree, if the query has any terms.
    pub fn matcher(&self) -> Option<&Matcher> {
        self.root.as_ref()
    }

    pub fn evaluate(&self, subject: &dyn Subject, deadline: &Deadline) -> Outcome {
        match &self.root {
            Some(root) => root.evaluate(subject, deadline),
            None => Outcome::NoMatch,
        }
    }

    /// Whether the item matches. A timeout counts as no match.
    pub fn matches(&self, subject: &dyn Subject, deadline: &Deadline) -> bool {
        self.evaluate(subject, deadline).is_match()
    }
}

fn unexpected(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Close(bracket) => format!("unexpected '{}'", bracket.close_char()),
        other => format!("unexpected {other:?}"),
    }
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Option<Matcher>> {
        let mut parts = vec![self.parse_xor()?];
        while self.eat(&TokenKind::Or) {
            parts.push(self.parse_xor()?);
        }
        Ok(combine(parts, Matcher::Or))
    }

    fn parse_xor(&mut self) -> Result<Option<Matcher>> {
        let mut parts = vec![self.parse_and()?];
        while self.eat(&TokenKind::Xor) {
            parts.push(self.parse_and()?);
        }
        Ok(combine(parts, Matcher::Xor))
    }

    fn parse_and(&mut self) -> Result<Option<Matcher>> {
        let mut parts = Vec::new();
        loop {
            match self.peek_kind() {
                None | Some(TokenKind::Or | TokenKind::Xor | TokenKind::Close(_)) => break,
                Some(TokenKind::And) => self.index += 1,
                Some(_) => parts.push(self.parse_not()?),
            }
        }
        Ok(combine(parts, Matcher::And))
    }

    fn parse_not(&mut self) -> Result<Option<Matcher>> {
        if self.eat(&TokenKind::Not) {
            return Ok(self.parse_not()?.map(Matcher::not));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Option<Matcher>> {
        let Some(token) = self.peek().cloned() else {
            return Ok(None);
        };
        match token.kind {
            TokenKind::Open(bracket) => {
                self.index += 1;
                let inner = self.parse_or()?;
                self.close(bracket, token.position)?;
                Ok(inner)
            }
            TokenKind::Word(raw) => {
                self.index += 1;
                parse_term(&raw, token.position).map(Some)
            }
            // An operator where an operand belongs contributes nothing.
            _ => Ok(None),
        }
    }

    fn close(&mut self, bracket: Bracket, opened_at: usize) -> Result<()> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Close(found),
                ..
            }) if *found == bracket => {
                self.index += 1;
                Ok(())
            }
            Some(token) => Err(Error::parse(
                token.position,
                format!("expected '{}' to close the group opened at byte {opened_at}", bracket.close_char()),
            )),
            None => Err(Error::parse(self.end, format!("missing closing '{}'", bracket.close_char()))),
        }
    }
}

fn combine(parts: Vec<Option<Matcher>>, node: fn(Vec<Matcher>) -> Matcher) -> Option<Matcher> {
    let mut parts: Vec<Matcher> = parts.into_iter().flatten().collect();
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(node(parts)),
    }
}

/// Parse a `field:value` predicate or a bare text term.
fn parse_term(raw: &str, position: usize) -> Result<Matcher> {
    if let Some((field, value)) = raw.split_once(':') {
        let value_at = position + field.len() + 1;
        let field = field.to_ascii_lowercase();
        match field.as_str() {
            "name" => return parse_text(TextField::Name, value, value_at),
            "path" => return parse_text(TextField::Path, value, value_at),
            "data" => return parse_text(TextField::Data, value, value_at),
            "type" => return parse_type(value, value_at),
            "hash" => return parse_hash(value, value_at),
            "size" | "rawsize" | "length" => {
                return Ok(Matcher::Size(SizeField::Raw, SizePredicate::parse(value, value_at)?))
            }
            "occupied" => return Ok(Matcher::Size(SizeField::Occupied, SizePredicate::parse(value, value_at)?)),
            "reserved" => return Ok(Matcher::Size(SizeField::Reserved, SizePredicate::parse(value, value_at)?)),
            _ => {}
        }
    }
    parse_text(TextField::NameOrPath, raw, position)
}

#[derive(Debug, Clone, Copy, Default)]
struct TextOptions {
    equality: Option<Equality>,
    mode: Option<MatchMode>,
    negate: bool,
}

impl TextOptions {
    /// Apply a single-character option. Returns false if `ch` is not one.
    fn apply_symbol(&mut self, ch: char, in_cluster: bool) -> bool {
        match ch {
            '=' => self.equality = Some(Equality::Equals),
            '<' | '^' => self.equality = Some(Equality::StartsWith),
            '>' | '$' => self.equality = Some(Equality::EndsWith),
            '!' | '~' => self.negate = !self.negate,
            ':' if in_cluster => self.mode = Some(MatchMode::PlainText),
            '*' | '?' if in_cluster => self.mode = Some(MatchMode::Wildcard),
            '/' | '%' if in_cluster => self.mode = Some(MatchMode::Regex),
            _ => return false,
        }
        true
    }

    fn apply_word(&mut self, word: &str) -> bool {
        match word.to_ascii_lowercase().as_str() {
            "contains" => self.equality = Some(Equality::Contains),
            "equals" | "eq" => self.equality = Some(Equality::Equals),
            "starts-with" | "startswith" | "prefix" => self.equality = Some(Equality::StartsWith),
            "ends-with" | "endswith" | "suffix" => self.equality = Some(Equality::EndsWith),
            "wildcard" | "glob" => self.mode = Some(MatchMode::Wildcard),
            "regex" | "re" => self.mode = Some(MatchMode::Regex),
            "plain" | "plain-text" | "text" => self.mode = Some(MatchMode::PlainText),
            "not" | "negate" => self.negate = !self.negate,
            _ => return false,
        }
        true
    }

    /// Apply a `[...]` cluster body.
    fn apply_cluster(&mut self, body: &str, position: usize) -> Result<()> {
        for word in body.split(|c: char| c == ',' || c.is_whitespace()).filter(|w| !w.is_empty()) {
            if self.apply_word(word) {
                continue;
            }
            for ch in word.chars() {
                if !self.apply_symbol(ch, true) {
                    return Err(Error::parse(position, format!("unknown text option {word:?}")));
                }
            }
        }
        Ok(())
    }
}

fn parse_text(field: TextField, value: &str, position: usize) -> Result<Matcher> {
    let mut options = TextOptions::default();
    let mut rest = value;
    let mut at = position;

    while let Some(ch) = rest.chars().next() {
        if ch == '[' {
            let Some(end) = rest.find(']') else {
                return Err(Error::parse(at, "unterminated option list"));
            };
            options.apply_cluster(&rest[1..end], at)?;
            rest = &rest[end + 1..];
            at += end + 1;
        } else if options.apply_symbol(ch, false) {
            rest = &rest[ch.len_utf8()..];
            at += ch.len_utf8();
        } else {
            break;
        }
    }

    let (body, quoted) = unquote(rest);
    if body.is_empty() {
        return Err(Error::parse(at, "missing text value"));
    }
    let body_at = at + usize::from(quoted);
    let case_insensitive = field != TextField::Data;

    let slashed = (!quoted && body.len() >= 2 && body.starts_with('/') && body.ends_with('/'))
        .then(|| &body[1..body.len() - 1]);
    let pattern = match (options.mode, slashed) {
        (None | Some(MatchMode::Regex), Some(regex)) => {
            let equality = options.equality.unwrap_or(Equality::Contains);
            TextPattern::compile_regex(regex, equality, case_insensitive, body_at + 1)?
        }
        (Some(MatchMode::Regex), None) => {
            let equality = options.equality.unwrap_or(Equality::Contains);
            TextPattern::compile_regex(body, equality, case_insensitive, body_at)?
        }
        (mode, _) => {
            let literal = Literal::decode(body, body_at)?;
            let wildcards = match mode {
                Some(MatchMode::Wildcard) => true,
                Some(_) => false,
                None => literal.has_wildcards(),
            };
            let default_equality = if wildcards { Equality::Equals } else { Equality::Contains };
            let equality = options.equality.unwrap_or(default_equality);
            TextPattern::compile(&literal, wildcards, equality, case_insensitive)
        }
    };

    let matcher = Matcher::Text(TextMatcher { field, pattern });
    Ok(if options.negate { Matcher::not(matcher) } else { matcher })
}

/// Strip surrounding double quotes.
fn unquote(value: &str) -> (&str, bool) {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        (&value[1..value.len() - 1], true)
    } else {
        (value, false)
    }
}

fn parse_type(value: &str, position: usize) -> Result<Matcher> {
    let filter = match value.trim().to_ascii_lowercase().as_str() {
        "file" => TypeFilter::File,
        "folder" | "dir" | "directory" => TypeFilter::Folder,
        "empty" => TypeFilter::Structural(FileType::Empty),
        "standard" | "std" | "binary" => TypeFilter::Structural(FileType::Standard),
        "texture" | "image" | "tex" => TypeFilter::Structural(FileType::Texture),
        "model" | "object" | "mesh" | "mdl" => TypeFilter::Structural(FileType::Model),
        other => return Err(Error::parse(position, format!("unknown type {other:?}"))),
    };
    Ok(Matcher::Type(filter))
}

fn parse_hash(value: &str, position: usize) -> Result<Matcher> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::parse(position, format!("hash must be 1 to 8 hex digits, got {value:?}")));
    }
    let hash = u32::from_str_radix(&digits, 16).map_err(|e| Error::parse(position, e.to_string()))?;
    Ok(Matcher::Hash(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::Item;

    fn matches(query: &str, item: &Item) -> bool {
        Query::parse(query).unwrap().matches(item, &Deadline::unbounded())
    }

    fn texture(path: &str) -> Item {
        Item::file(path, FileType::Texture, 4096)
    }

    #[test]
    fn test_type_and_not_name() {
        let query = "type:texture AND NOT name:*.atex";
        assert!(matches(query, &texture("chara/x/body.tex")));
        assert!(!matches(query, &texture("vfx/fire.atex")));
        assert!(!matches(query, &Item::file("chara/x/body.mdl", FileType::Model, 10)));
        assert!(!matches(query, &Item::folder("chara/x")));
    }

    #[test]
    fn test_precedence() {
        let query = "(a OR b) AND c";
        assert!(matches(query, &Item::folder("ac")));
        assert!(matches(query, &Item::folder("bc")));
        assert!(!matches(query, &Item::folder("c")));
        assert!(!matches(query, &Item::folder("ab")));

        // AND binds tighter than OR.
        let query = "a OR b c";
        assert!(matches(query, &Item::folder("a")));
        assert!(!matches(query, &Item::folder("b")));
        assert!(matches(query, &Item::folder("bc")));

        // XOR sits between OR and AND.
        let query = "a ^ b";
        assert!(matches(query, &Item::folder("a")));
        assert!(!matches(query, &Item::folder("ab")));
    }

    #[test]
    fn test_size_and_hash() {
        let small = Item::file("a/small.bin", FileType::Standard, 1_048_575);
        let large = Item::file("a/large.bin", FileType::Standard, 1_048_576);
        assert!(!matches("size:>=1m", &small));
        assert!(matches("size:>=1m", &large));
        assert!(matches("rawsize:<1m", &small));
        assert!(matches("occupied:1m", &large));

        let mut item = Item::file("a/b.bin", FileType::Standard, 1);
        item.hashes = vec![0x1234, 0xDEAD_BEEF];
        assert!(matches("hash:deadbeef", &item));
        assert!(matches("hash:DEAD_BEEF", &item));
        assert!(matches("hash:1234", &item));
        assert!(!matches("hash:beef", &item));
    }

    #[test]
    fn test_text_options() {
        let item = Item::file("chara/equipment/e0001/model.mdl", FileType::Model, 10);
        assert!(matches("name:model", &item));
        assert!(matches("name:=model.mdl", &item));
        assert!(!matches("name:=model", &item));
        assert!(matches("name:^mod", &item));
        assert!(matches("name:$.MDL", &item));
        assert!(!matches("name:!model", &item));
        assert!(matches("name:[ends-with]mdl", &item));
        assert!(matches("path:[equals,regex]chara/.*/e\\d{4}/model\\.mdl", &item));
        assert!(matches(r"path:/e\d{4}/", &item));
        assert!(matches("name:[:]mo", &item));
        assert!(!matches("name:[plain]mo*", &item));
        assert!(matches(r#"path:"equipment/e0001""#, &item));
        assert!(matches("e0001", &item));
        assert!(matches("*.mdl", &item));
    }

    #[test]
    fn test_data_matching() {
        let mut item = Item::file("a/b.bin", FileType::Standard, 8);
        item.data = vec![0x01, 0x00, 0x00, 0x00, b'H', b'i', 0xFF, 0x00];
        assert!(matches(r"data:\s{<I:1}", &item));
        assert!(matches(r"data:\B{SGk=}", &item));
        assert!(!matches("data:hi", &item));
        assert!(matches(r"data:[<]\x01", &item));
        assert!(matches(r"data:[contains]Hi?\0", &item));
        assert!(!matches(r"data:Hi?\0", &item));
    }

    #[test]
    fn test_double_not_and_collapse() {
        let item = Item::folder("abc");
        assert!(matches("NOT NOT abc", &item));
        assert!(matches("- !abc", &item));
        assert!(!matches("-abc", &item));
        assert!(matches("abc AND", &item));
        assert!(matches("OR abc ()", &item));
        assert!(matches("{abc} [] <>", &item));
        let query = Query::parse("NOT NOT abc").unwrap();
        assert!(matches!(query.matcher(), Some(Matcher::Text(_))));
        assert!(Query::parse("").unwrap().matcher().is_none());
        assert!(!Query::parse("()").unwrap().matches(&item, &Deadline::unbounded()));
    }

    #[test]
    fn test_parse_errors() {
        for (query, position) in [("(a", 2), ("(a]", 2), ("a)", 1), ("type:blob", 5), ("hash:123456789", 5), ("size:>x", 5)] {
            match Query::parse(query) {
                Err(Error::Parse { position: at, .. }) => assert_eq!(at, position, "{query}"),
                other => panic!("{query}: unexpected {other:?}"),
            }
        }
        assert!(Query::parse("name:[bogus]x").is_err());
        assert!(Query::parse("name:/(/").is_err());
        assert!(Query::parse("name:").is_err());
    }

    #[test]
    fn test_unknown_field_is_text() {
        let item = Item::folder("foo:bar");
        assert!(matches("foo:bar", &item));
    }
}
