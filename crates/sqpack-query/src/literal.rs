//! Decoding of literal values with backslash escapes.
//!
//! Besides the usual control escapes, a literal may embed raw bytes
//! (`\xHH`), code points (`\uHHHH`, `\u{H..}`, `\o{ooo}`), base64 blobs
//! (`\B{...}`) and packed binary values (`\s{<I:1,2,3}`). Unescaped `*` and
//! `?` are remembered so wildcard patterns can tell them from escaped ones.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::{Error, Result};

/// A decoded literal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Literal {
    bytes: Vec<u8>,
    /// Offsets of unescaped `*` and `?` in `bytes`
    wildcards: Vec<usize>,
}

/// A piece of a literal as seen by wildcard matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a [u8]),
    Star,
    Any,
}

impl Literal {
    /// Decode `raw`, whose first byte sits at `position` in the query.
    pub fn decode(raw: &str, position: usize) -> Result<Self> {
        let mut decoder = Decoder {
            src: raw,
            cursor: 0,
            base: position,
            out: Literal::default(),
        };
        decoder.run()?;
        Ok(decoder.out)
    }

    /// The decoded bytes, wildcards included as `*` and `?`.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether an unescaped `*` or `?` is present.
    pub fn has_wildcards(&self) -> bool {
        !self.wildcards.is_empty()
    }

    /// Split into literal runs and wildcard markers.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments = Vec::new();
        let mut start = 0;
        for &at in &self.wildcards {
            if at > start {
                segments.push(Segment::Text(&self.bytes[start..at]));
            }
            segments.push(if self.bytes[at] == b'*' { Segment::Star } else { Segment::Any });
            start = at + 1;
        }
        if start < self.bytes.len() {
            segments.push(Segment::Text(&self.bytes[start..]));
        }
        segments
    }

    /// The bytes as text, with invalid UTF-8 replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

struct Decoder<'a> {
    src: &'a str,
    cursor: usize,
    base: usize,
    out: Literal,
}

impl<'a> Decoder<'a> {
    fn run(&mut self) -> Result<()> {
        while let Some(ch) = self.next() {
            match ch {
                '\\' => self.escape()?,
                '*' | '?' => {
                    self.out.wildcards.push(self.out.bytes.len());
                    self.out.bytes.push(ch as u8);
                }
                _ => self.push_char(ch),
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Option<char> {
        let ch = self.src[self.cursor..].chars().next()?;
        self.cursor += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.base + self.cursor, message)
    }

    fn push_char(&mut self, ch: char) {
        let mut buf = [0u8; 4];
        self.out.bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    }

    fn escape(&mut self) -> Result<()> {
        let Some(ch) = self.next() else {
            return Err(self.error("dangling backslash"));
        };
        let byte = match ch {
            'n' => b'\n',
            'r' => b'\r',
            't' => b'\t',
            '0' => 0,
            'a' => 0x07,
            'b' => 0x08,
            'f' => 0x0C,
            'v' => 0x0B,
            'e' => 0x1B,
            'x' => {
                let digits = self.take(2);
                hex_digits(digits, 2)
                    .and_then(|code| u8::try_from(code).ok())
                    .ok_or_else(|| self.error(format!("invalid byte escape {digits:?}")))?
            }
            'u' => {
                let code = if self.src[self.cursor..].starts_with('{') {
                    let body = self.braced()?;
                    hex_digits(body, body.len().max(1))
                } else {
                    hex_digits(self.take(4), 4)
                };
                return self.push_code_point(code);
            }
            'o' => {
                let body = self.braced()?;
                let code = u32::from_str_radix(body, 8).ok();
                return self.push_code_point(code);
            }
            'B' => {
                let body = self.braced()?.trim();
                let bytes = STANDARD
                    .decode(body)
                    .or_else(|_| STANDARD_NO_PAD.decode(body))
                    .map_err(|e| self.error(format!("invalid base64: {e}")))?;
                self.out.bytes.extend_from_slice(&bytes);
                return Ok(());
            }
            's' => {
                let body = self.braced()?;
                let bytes = pack_struct(body).map_err(|message| self.error(message))?;
                self.out.bytes.extend_from_slice(&bytes);
                return Ok(());
            }
            other => {
                self.push_char(other);
                return Ok(());
            }
        };
        self.out.bytes.push(byte);
        Ok(())
    }

    fn take(&mut self, count: usize) -> &'a str {
        let src = self.src;
        let rest = &src[self.cursor..];
        let end = rest.char_indices().nth(count).map_or(rest.len(), |(i, _)| i);
        self.cursor += end;
        &rest[..end]
    }

    /// Consume `{...}` and return its body.
    fn braced(&mut self) -> Result<&'a str> {
        let src = self.src;
        let rest = &src[self.cursor..];
        if !rest.starts_with('{') {
            return Err(self.error("expected '{'"));
        }
        let Some(end) = rest.find('}') else {
            return Err(self.error("missing '}'"));
        };
        self.cursor += end + 1;
        Ok(&rest[1..end])
    }

    fn push_code_point(&mut self, code: Option<u32>) -> Result<()> {
        match code.and_then(char::from_u32) {
            Some(ch) => {
                self.push_char(ch);
                Ok(())
            }
            None => Err(self.error("invalid code point")),
        }
    }
}

/// Parse exactly `count` hex digits.
fn hex_digits(digits: &str, count: usize) -> Option<u32> {
    if digits.len() != count || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

#[derive(Debug, Clone, Copy)]
enum Endian {
    Little,
    Big,
    Native,
}

macro_rules! encode {
    ($out:expr, $endian:expr, $value:expr) => {
        match $endian {
            Endian::Little => $out.extend_from_slice(&$value.to_le_bytes()),
            Endian::Big => $out.extend_from_slice(&$value.to_be_bytes()),
            Endian::Native => $out.extend_from_slice(&$value.to_ne_bytes()),
        }
    };
}

/// Encode a `[<>=]fmt:v1,v2,..` body into bytes.
fn pack_struct(body: &str) -> std::result::Result<Vec<u8>, String> {
    let (endian, rest) = match body.chars().next() {
        Some('<') => (Endian::Little, &body[1..]),
        Some('>') => (Endian::Big, &body[1..]),
        Some('=') => (Endian::Native, &body[1..]),
        _ => (Endian::Little, body),
    };
    let Some((format, values)) = rest.split_once(':') else {
        return Err(format!("expected 'format:values' in struct literal {body:?}"));
    };
    let format = format.trim();

    let mut out = Vec::new();
    for value in values.split(',').map(str::trim) {
        if value.is_empty() {
            return Err("empty value in struct literal".to_string());
        }
        match format {
            "f" => encode!(out, endian, value.parse::<f32>().map_err(|e| e.to_string())?),
            "d" => encode!(out, endian, value.parse::<f64>().map_err(|e| e.to_string())?),
            _ => {
                let number = parse_int(value).ok_or_else(|| format!("invalid integer {value:?}"))?;
                push_int(&mut out, endian, format, number)?;
            }
        }
    }
    Ok(out)
}

fn push_int(out: &mut Vec<u8>, endian: Endian, format: &str, value: i128) -> std::result::Result<(), String> {
    let range = || format!("{value} does not fit format '{format}'");
    match format {
        "b" => encode!(out, endian, i8::try_from(value).map_err(|_| range())?),
        "B" => encode!(out, endian, u8::try_from(value).map_err(|_| range())?),
        "h" => encode!(out, endian, i16::try_from(value).map_err(|_| range())?),
        "H" => encode!(out, endian, u16::try_from(value).map_err(|_| range())?),
        "i" | "l" => encode!(out, endian, i32::try_from(value).map_err(|_| range())?),
        "I" | "L" => encode!(out, endian, u32::try_from(value).map_err(|_| range())?),
        "q" => encode!(out, endian, i64::try_from(value).map_err(|_| range())?),
        "Q" => encode!(out, endian, u64::try_from(value).map_err(|_| range())?),
        _ => return Err(format!("unknown struct format '{format}'")),
    }
    Ok(())
}

/// Parse a signed integer with an optional `0x`, `0o` or `0b` prefix.
pub(crate) fn parse_int(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = split_radix(digits);
    let digits = digits.replace('_', "");
    if digits.is_empty() {
        return None;
    }
    let magnitude = i128::from_str_radix(&digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Strip a radix prefix, returning the radix and the remaining digits.
pub(crate) fn split_radix(text: &str) -> (u32, &str) {
    let lower = text.get(..2).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("0x") => (16, &text[2..]),
        Some("0o") => (8, &text[2..]),
        Some("0b") => (2, &text[2..]),
        _ => (10, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(raw: &str) -> Vec<u8> {
        Literal::decode(raw, 0).unwrap().bytes().to_vec()
    }

    #[test]
    fn test_control_escapes() {
        assert_eq!(bytes(r#"a\n\r\t\0\e\\\"b"#), b"a\n\r\t\0\x1b\\\"b");
        assert_eq!(bytes(r"\x41\xff"), b"A\xff");
        assert_eq!(bytes(r"é\u{1F600}\o{101}"), "é😀A".as_bytes());
    }

    #[test]
    fn test_base64_and_struct() {
        assert_eq!(bytes(r"\B{SGVsbG8=}"), b"Hello");
        assert_eq!(bytes(r"\B{SGVsbG8}"), b"Hello");
        assert_eq!(bytes(r"\s{<I:1,2}"), [1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(bytes(r"\s{>H:0x1234}"), [0x12, 0x34]);
        assert_eq!(bytes(r"\s{<b:-1}"), [0xFF]);
        assert_eq!(bytes(r"\s{<f:1.0}"), 1.0f32.to_le_bytes());
        assert_eq!(bytes(r"\s{>d:-2.5}"), (-2.5f64).to_be_bytes());
    }

    #[test]
    fn test_wildcards_track_escapes() {
        let literal = Literal::decode(r"a*b\*c?", 0).unwrap();
        assert_eq!(literal.bytes(), b"a*b*c?");
        assert_eq!(
            literal.segments(),
            vec![Segment::Text(b"a"), Segment::Star, Segment::Text(b"b*c"), Segment::Any]
        );
        assert!(!Literal::decode(r"plain\?", 0).unwrap().has_wildcards());
    }

    #[test]
    fn test_errors_carry_position() {
        for raw in [r"\x4", r"\s{<B:256}", r"\s{<Z:1}", r"\B{@@}", r"\u{110000}", "\\"] {
            match Literal::decode(raw, 10) {
                Err(Error::Parse { position, .. }) => assert!(position >= 10, "{raw}"),
                other => panic!("{raw}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("0x_ff"), Some(255));
        assert_eq!(parse_int("-0b101"), Some(-5));
        assert_eq!(parse_int("1_000"), Some(1000));
        assert_eq!(parse_int("0o"), None);
    }
}
