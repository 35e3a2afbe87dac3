//! Query tokenizer.

use crate::{Error, Result};

/// Grouping bracket styles. Each is closed only by its own closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bracket {
    Paren,
    Square,
    Curly,
    Angle,
}

impl Bracket {
    fn opening(ch: char) -> Option<Self> {
        match ch {
            '(' => Some(Bracket::Paren),
            '[' => Some(Bracket::Square),
            '{' => Some(Bracket::Curly),
            '<' => Some(Bracket::Angle),
            _ => None,
        }
    }

    fn closing(ch: char) -> Option<Self> {
        match ch {
            ')' => Some(Bracket::Paren),
            ']' => Some(Bracket::Square),
            '}' => Some(Bracket::Curly),
            '>' => Some(Bracket::Angle),
            _ => None,
        }
    }

    pub(crate) fn close_char(self) -> char {
        match self {
            Bracket::Paren => ')',
            Bracket::Square => ']',
            Bracket::Curly => '}',
            Bracket::Angle => '>',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Word(String),
    Open(Bracket),
    Close(Bracket),
    And,
    Or,
    Xor,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset in the query text
    pub position: usize,
}

/// Characters allowed right after a field colon before the value starts.
const VALUE_PREFIX: &[char] = &['=', '<', '>', '^', '$', '!', '~'];

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut cursor = 0usize;

    while let Some(ch) = input[cursor..].chars().next() {
        if ch.is_whitespace() {
            cursor += ch.len_utf8();
            continue;
        }

        let position = cursor;
        let (kind, len) = if let Some(bracket) = Bracket::opening(ch) {
            (TokenKind::Open(bracket), 1)
        } else if let Some(bracket) = Bracket::closing(ch) {
            (TokenKind::Close(bracket), 1)
        } else {
            match ch {
                '|' => (TokenKind::Or, repeated(input, cursor, "||")),
                '&' => (TokenKind::And, repeated(input, cursor, "&&")),
                '^' => (TokenKind::Xor, repeated(input, cursor, "^^")),
                '!' | '-' => (TokenKind::Not, 1),
                _ => {
                    let end = scan_word(input, cursor)?;
                    let raw = &input[cursor..end];
                    (keyword(raw).unwrap_or_else(|| TokenKind::Word(raw.to_string())), end - cursor)
                }
            }
        };
        tokens.push(Token { kind, position });
        cursor += len;
    }

    Ok(tokens)
}

fn repeated(input: &str, cursor: usize, doubled: &str) -> usize {
    if input[cursor..].starts_with(doubled) {
        2
    } else {
        1
    }
}

fn keyword(raw: &str) -> Option<TokenKind> {
    [
        ("and", TokenKind::And),
        ("or", TokenKind::Or),
        ("xor", TokenKind::Xor),
        ("not", TokenKind::Not),
    ]
    .into_iter()
    .find(|(word, _)| raw.eq_ignore_ascii_case(word))
    .map(|(_, kind)| kind)
}

/// Find the end of the word starting at `start`.
///
/// After the first `:` the value may begin with option symbols, a `[...]`
/// option cluster and a `/regex/`, none of which end the word. Quoted strings
/// and braced escapes are always taken whole.
fn scan_word(input: &str, start: usize) -> Result<usize> {
    let mut cursor = start;
    let mut seen_colon = false;
    let mut in_prefix = false;

    while let Some(ch) = input[cursor..].chars().next() {
        if ch.is_whitespace() {
            break;
        }
        match ch {
            '"' => {
                cursor = skip_quoted(input, cursor)?;
                in_prefix = false;
                continue;
            }
            '\\' => {
                cursor = skip_escape(input, cursor)?;
                in_prefix = false;
                continue;
            }
            _ => {}
        }

        if in_prefix {
            if ch == '[' {
                cursor = skip_until(input, cursor, ']', "option list")?;
                continue;
            }
            if VALUE_PREFIX.contains(&ch) {
                cursor += 1;
                continue;
            }
            in_prefix = false;
            if ch == '/' {
                cursor = skip_until(input, cursor, '/', "regular expression")?;
                continue;
            }
        }

        if ch == ':' && !seen_colon {
            seen_colon = true;
            in_prefix = true;
            cursor += 1;
            continue;
        }
        if Bracket::opening(ch).is_some() || Bracket::closing(ch).is_some() || matches!(ch, '|' | '&') {
            break;
        }
        cursor += ch.len_utf8();
    }

    Ok(cursor)
}

/// Skip a `"..."` string, returning the offset after the closing quote.
fn skip_quoted(input: &str, start: usize) -> Result<usize> {
    let mut chars = input[start + 1..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '"' => return Ok(start + 1 + offset + 1),
            _ => {}
        }
    }
    Err(Error::parse(start, "missing closing quote"))
}

/// Skip from an opening delimiter through `close`, honouring backslashes.
fn skip_until(input: &str, start: usize, close: char, what: &str) -> Result<usize> {
    let mut chars = input[start + 1..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        if ch == '\\' {
            chars.next();
        } else if ch == close {
            return Ok(start + 1 + offset + close.len_utf8());
        }
    }
    Err(Error::parse(start, format!("unterminated {what}")))
}

/// Skip `\c` or a braced escape such as `\s{<I:1,2}`.
fn skip_escape(input: &str, start: usize) -> Result<usize> {
    let mut chars = input[start + 1..].chars();
    let Some(escaped) = chars.next() else {
        return Err(Error::parse(start, "dangling backslash"));
    };
    let after = start + 1 + escaped.len_utf8();
    if escaped.is_ascii_alphabetic() && input[after..].starts_with('{') {
        return skip_until(input, after, '}', "escape");
    }
    Ok(after)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn word(s: &str) -> TokenKind {
        TokenKind::Word(s.to_string())
    }

    #[test]
    fn test_operators_and_keywords() {
        assert_eq!(
            kinds("a || b && c ^^ d | e & f ^ g"),
            vec![
                word("a"),
                TokenKind::Or,
                word("b"),
                TokenKind::And,
                word("c"),
                TokenKind::Xor,
                word("d"),
                TokenKind::Or,
                word("e"),
                TokenKind::And,
                word("f"),
                TokenKind::Xor,
                word("g"),
            ]
        );
        assert_eq!(
            kinds("a Or NOT b xor c AND d"),
            vec![
                word("a"),
                TokenKind::Or,
                TokenKind::Not,
                word("b"),
                TokenKind::Xor,
                word("c"),
                TokenKind::And,
                word("d"),
            ]
        );
        assert_eq!(kinds("-a !b"), vec![TokenKind::Not, word("a"), TokenKind::Not, word("b")]);
    }

    #[test]
    fn test_brackets() {
        assert_eq!(
            kinds("(a)[b]{c}<d>"),
            vec![
                TokenKind::Open(Bracket::Paren),
                word("a"),
                TokenKind::Close(Bracket::Paren),
                TokenKind::Open(Bracket::Square),
                word("b"),
                TokenKind::Close(Bracket::Square),
                TokenKind::Open(Bracket::Curly),
                word("c"),
                TokenKind::Close(Bracket::Curly),
                TokenKind::Open(Bracket::Angle),
                word("d"),
                TokenKind::Close(Bracket::Angle),
            ]
        );
    }

    #[test]
    fn test_field_values_keep_prefix_symbols() {
        assert_eq!(kinds("size:>=1m"), vec![word("size:>=1m")]);
        assert_eq!(kinds("<name:<foo>"), vec![
            TokenKind::Open(Bracket::Angle),
            word("name:<foo"),
            TokenKind::Close(Bracket::Angle),
        ]);
        assert_eq!(kinds("(name:[equals,regex]a.c)"), vec![
            TokenKind::Open(Bracket::Paren),
            word("name:[equals,regex]a.c"),
            TokenKind::Close(Bracket::Paren),
        ]);
        assert_eq!(kinds("name:/a (b)|c/ x"), vec![word("name:/a (b)|c/"), word("x")]);
    }

    #[test]
    fn test_quotes_and_escapes() {
        assert_eq!(kinds(r#"name:"a b" c"#), vec![word(r#"name:"a b""#), word("c")]);
        assert_eq!(kinds(r"data:\s{<I:1,2} x"), vec![word(r"data:\s{<I:1,2}"), word("x")]);
        assert_eq!(kinds(r"a\ b"), vec![word(r"a\ b")]);
    }

    #[test]
    fn test_positions_and_errors() {
        let tokens = tokenize("  ab  (c").unwrap();
        assert_eq!(tokens[0].position, 2);
        assert_eq!(tokens[1].position, 6);

        match tokenize(r#"x name:"open"#) {
            Err(Error::Parse { position, .. }) => assert_eq!(position, 7),
            other => panic!("unexpected {other:?}"),
        }
        assert!(tokenize("name:[equals").is_err());
        assert!(tokenize(r"data:\B{AAAA").is_err());
    }
}
