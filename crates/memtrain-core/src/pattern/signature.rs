use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One position of a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternByte {
    Exact(u8),
    Any,
}

impl PatternByte {
    fn accepts(self, actual: u8) -> bool {
        match self {
            Self::Exact(expected) => expected == actual,
            Self::Any => true,
        }
    }
}

impl FromStr for PatternByte {
    type Err = String;

    fn from_str(token: &str) -> std::result::Result<Self, String> {
        if token == "??" || token == "?" {
            return Ok(Self::Any);
        }
        let bytes = token.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_hexdigit) {
            return Err(format!("'{}' is not a hex byte or wildcard", token));
        }
        u8::from_str_radix(token, 16)
            .map(Self::Exact)
            .map_err(|e| e.to_string())
    }
}

impl fmt::Display for PatternByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{:02X}", value),
            Self::Any => f.write_str("??"),
        }
    }
}

/// Split an AOB signature such as `"48 8B ?? 24 ?? FF"` into positions.
///
/// Errors name the 1-based token that failed.
pub fn parse_pattern(text: &str) -> Result<Vec<PatternByte>> {
    let bytes = text
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token
                .parse()
                .map_err(|reason| Error::InvalidPattern(format!("token {}: {}", i + 1, reason)))
        })
        .collect::<Result<Vec<_>>>()?;

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("pattern is empty".to_string()));
    }
    Ok(bytes)
}

pub fn format_pattern(bytes: &[PatternByte]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&byte.to_string());
    }
    out
}

/// A parsed signature with at least one fixed byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<PatternByte>,
    anchor: usize,
    anchor_byte: u8,
}

impl Pattern {
    pub fn new(bytes: Vec<PatternByte>) -> Result<Self> {
        let (anchor, anchor_byte) = bytes
            .iter()
            .enumerate()
            .find_map(|(i, b)| match b {
                PatternByte::Exact(value) => Some((i, *value)),
                PatternByte::Any => None,
            })
            .ok_or_else(|| Error::InvalidPattern("pattern has no fixed bytes".to_string()))?;
        Ok(Self {
            bytes,
            anchor,
            anchor_byte,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    /// Index and value of the first fixed byte
    pub(crate) fn anchor(&self) -> (usize, u8) {
        (self.anchor, self.anchor_byte)
    }

    /// Whether `window` (same length as the pattern) matches.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.accepts(*actual))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(parse_pattern(s)?)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_pattern(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::PatternByte::{Any, Exact};

    #[test]
    fn test_tokens_and_wildcards() {
        assert_eq!(
            parse_pattern("48 8b ?? ? FF").unwrap(),
            vec![Exact(0x48), Exact(0x8B), Any, Any, Exact(0xFF)]
        );
    }

    #[test]
    fn test_errors_name_the_token() {
        let err = parse_pattern("48 8B GG 24").unwrap_err();
        assert!(err.to_string().contains("token 3"), "{err}");

        for bad in ["", "   ", "4", "488B", "+1", "-1", "???"] {
            assert!(
                matches!(parse_pattern(bad), Err(Error::InvalidPattern(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_normalizes_case_and_wildcards() {
        let pattern: Pattern = "e8  ?  0a ??".parse().unwrap();
        assert_eq!(pattern.to_string(), "E8 ?? 0A ??");
        assert_eq!(pattern.to_string().parse::<Pattern>().unwrap(), pattern);
    }

    #[test]
    fn test_all_wildcards_rejected() {
        assert!(matches!(
            "?? ??".parse::<Pattern>(),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_anchor_skips_leading_wildcards() {
        let pattern: Pattern = "?? ?? 8B 05".parse().unwrap();
        assert_eq!(pattern.anchor(), (2, 0x8B));
        assert!(pattern.matches(&[0x00, 0x11, 0x8B, 0x05]));
        assert!(!pattern.matches(&[0x00, 0x11, 0x8B, 0x06]));
        assert!(!pattern.matches(&[0x8B, 0x05]));
    }
}
