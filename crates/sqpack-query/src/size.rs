//! Size predicate parsing and matching.

use crate::literal::split_radix;
use crate::{Error, Result};

/// A parsed size predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizePredicate {
    Less(u64),
    LessEq(u64),
    Greater(u64),
    GreaterEq(u64),
    Equal(u64),
    /// A bare value: within half a unit of the written amount.
    Around { low: f64, high: f64 },
}

impl SizePredicate {
    /// Parse `[op][0x|0o|0b]number[unit]`.
    pub fn parse(raw: &str, position: usize) -> Result<Self> {
        let trimmed = raw.trim();
        let error = |message: String| Error::parse(position, message);
        if trimmed.is_empty() {
            return Err(error("size requires a value".to_string()));
        }

        let (op, rest) = [
            ("<=", Op::LessEq),
            (">=", Op::GreaterEq),
            ("<", Op::Less),
            (">", Op::Greater),
            ("=", Op::Equal),
        ]
        .into_iter()
        .find_map(|(symbol, op)| trimmed.strip_prefix(symbol).map(|rest| (Some(op), rest.trim_start())))
        .unwrap_or((None, trimmed));

        let (value, unit) = parse_amount(rest).ok_or_else(|| error(format!("invalid size {raw:?}")))?;
        let bytes = value * unit as f64;
        if !bytes.is_finite() || bytes < 0.0 {
            return Err(error(format!("size {raw:?} is out of range")));
        }
        // Saturating float-to-int conversion.
        let exact = bytes.round() as u64;

        Ok(match op {
            Some(Op::Less) => SizePredicate::Less(exact),
            Some(Op::LessEq) => SizePredicate::LessEq(exact),
            Some(Op::Greater) => SizePredicate::Greater(exact),
            Some(Op::GreaterEq) => SizePredicate::GreaterEq(exact),
            Some(Op::Equal) => SizePredicate::Equal(exact),
            None => {
                let half = unit as f64 / 2.0;
                SizePredicate::Around {
                    low: bytes - half,
                    high: bytes + half,
                }
            }
        })
    }

    pub fn matches(&self, size: u64) -> bool {
        match *self {
            SizePredicate::Less(limit) => size < limit,
            SizePredicate::LessEq(limit) => size <= limit,
            SizePredicate::Greater(limit) => size > limit,
            SizePredicate::GreaterEq(limit) => size >= limit,
            SizePredicate::Equal(value) => size == value,
            SizePredicate::Around { low, high } => {
                let size = size as f64;
                size >= low && size < high
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
}

/// Split into a numeric value and the multiplier of its unit.
fn parse_amount(text: &str) -> Option<(f64, u64)> {
    let (radix, body) = split_radix(text);
    let split = body
        .char_indices()
        .find(|&(_, ch)| {
            let digit = if radix == 10 {
                ch.is_ascii_digit() || ch == '.'
            } else {
                ch.is_digit(radix)
            };
            !(digit || ch == '_')
        })
        .map_or(body.len(), |(i, _)| i);
    let (number, unit) = body.split_at(split);
    let number = number.replace('_', "");
    if number.is_empty() {
        return None;
    }

    let value = if radix == 10 {
        number.parse::<f64>().ok()?
    } else {
        u64::from_str_radix(&number, radix).ok()? as f64
    };
    Some((value, unit_multiplier(unit)?))
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let power = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        _ => return None,
    };
    Some(1024u64.pow(power))
}
