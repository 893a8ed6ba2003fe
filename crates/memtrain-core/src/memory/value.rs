//! Typed scalar values as they are laid out in target memory (little-endian).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{Error, Result};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ValueType {
    #[serde(alias = "int8")]
    #[strum(to_string = "i8", serialize = "int8")]
    I8,
    #[serde(alias = "int16", alias = "short")]
    #[strum(to_string = "i16", serialize = "int16", serialize = "short")]
    I16,
    #[serde(alias = "int32", alias = "int")]
    #[strum(to_string = "i32", serialize = "int32", serialize = "int")]
    I32,
    #[serde(alias = "int64", alias = "long")]
    #[strum(to_string = "i64", serialize = "int64", serialize = "long")]
    I64,
    #[serde(alias = "uint8", alias = "byte")]
    #[strum(to_string = "u8", serialize = "uint8", serialize = "byte")]
    U8,
    #[serde(alias = "uint16")]
    #[strum(to_string = "u16", serialize = "uint16")]
    U16,
    #[serde(alias = "uint32")]
    #[strum(to_string = "u32", serialize = "uint32")]
    U32,
    #[serde(alias = "uint64")]
    #[strum(to_string = "u64", serialize = "uint64")]
    U64,
    #[serde(alias = "float")]
    #[strum(to_string = "f32", serialize = "float")]
    F32,
    #[serde(alias = "double")]
    #[strum(to_string = "f64", serialize = "double")]
    F64,
}

impl ValueType {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Fast-scan alignment for this type (natural alignment, capped at 4).
    pub fn alignment(&self) -> usize {
        self.size().min(4)
    }

    /// Parse user text into a value of this type.
    ///
    /// Integers accept decimal or `0x` hex with an optional leading `-`.
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        let text = text.trim();
        let invalid = || Error::InvalidType(format!("'{}' is not a valid {}", text, self));

        macro_rules! int {
            ($variant:ident, $t:ty) => {
                parse_int(text)
                    .and_then(|v| <$t>::try_from(v).ok())
                    .map(Value::$variant)
                    .ok_or_else(invalid)
            };
        }

        match self {
            Self::I8 => int!(I8, i8),
            Self::I16 => int!(I16, i16),
            Self::I32 => int!(I32, i32),
            Self::I64 => int!(I64, i64),
            Self::U8 => int!(U8, u8),
            Self::U16 => int!(U16, u16),
            Self::U32 => int!(U32, u32),
            Self::U64 => int!(U64, u64),
            Self::F32 => text.parse().map(Value::F32).map_err(|_| invalid()),
            Self::F64 => text.parse().map(Value::F64).map_err(|_| invalid()),
        }
    }
}

fn parse_int(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (radix, digits) = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => (16, hex),
        None => (10, digits),
    };
    // from_str_radix takes its own sign; one leading '-' is all we allow
    if !digits.starts_with(|c: char| c.is_ascii_hexdigit()) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// A typed scalar read from or written to target memory
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::I8(_) => ValueType::I8,
            Self::I16(_) => ValueType::I16,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::U8(_) => ValueType::U8,
            Self::U16(_) => ValueType::U16,
            Self::U32(_) => ValueType::U32,
            Self::U64(_) => ValueType::U64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
        }
    }

    /// Little-endian encoding, exactly `value_type().size()` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::I8(v) => v.to_le_bytes().to_vec(),
            Self::I16(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) => v.to_le_bytes().to_vec(),
            Self::U8(v) => v.to_le_bytes().to_vec(),
            Self::U16(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::U64(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_le_bytes().to_vec(),
            Self::F64(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Decode `bytes` as `value_type`; the length must match exactly.
    pub fn from_bytes(value_type: ValueType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != value_type.size() {
            return Err(Error::InvalidType(format!(
                "{} needs {} bytes, got {}",
                value_type,
                value_type.size(),
                bytes.len()
            )));
        }

        macro_rules! decode {
            ($variant:ident, $t:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                Value::$variant(<$t>::from_le_bytes(raw))
            }};
        }

        Ok(match value_type {
            ValueType::I8 => decode!(I8, i8),
            ValueType::I16 => decode!(I16, i16),
            ValueType::I32 => decode!(I32, i32),
            ValueType::I64 => decode!(I64, i64),
            ValueType::U8 => decode!(U8, u8),
            ValueType::U16 => decode!(U16, u16),
            ValueType::U32 => decode!(U32, u32),
            ValueType::U64 => decode!(U64, u64),
            ValueType::F32 => decode!(F32, f32),
            ValueType::F64 => decode!(F64, f64),
        })
    }

    /// Numeric ordering between two values of the same type.
    ///
    /// Returns `None` across types or when a float is NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::I8(a), Self::I8(b)) => a.partial_cmp(b),
            (Self::I16(a), Self::I16(b)) => a.partial_cmp(b),
            (Self::I32(a), Self::I32(b)) => a.partial_cmp(b),
            (Self::I64(a), Self::I64(b)) => a.partial_cmp(b),
            (Self::U8(a), Self::U8(b)) => a.partial_cmp(b),
            (Self::U16(a), Self::U16(b)) => a.partial_cmp(b),
            (Self::U32(a), Self::U32(b)) => a.partial_cmp(b),
            (Self::U64(a), Self::U64(b)) => a.partial_cmp(b),
            (Self::F32(a), Self::F32(b)) => a.partial_cmp(b),
            (Self::F64(a), Self::F64(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::U8(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_value_type_names() {
        assert_eq!("i32".parse::<ValueType>().unwrap(), ValueType::I32);
        assert_eq!("int32".parse::<ValueType>().unwrap(), ValueType::I32);
        assert_eq!("Float".parse::<ValueType>().unwrap(), ValueType::F32);
        assert_eq!("double".parse::<ValueType>().unwrap(), ValueType::F64);
        assert_eq!(ValueType::U8.to_string(), "u8");
        assert!("int128".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_serde_aliases() {
        let parsed: ValueType = serde_json::from_str("\"int32\"").unwrap();
        assert_eq!(parsed, ValueType::I32);
        assert_eq!(serde_json::to_string(&ValueType::F64).unwrap(), "\"f64\"");
    }

    #[test]
    fn test_sizes_match_encoding() {
        for ty in ValueType::iter() {
            let value = ty.parse_value("1").unwrap();
            assert_eq!(value.to_bytes().len(), ty.size(), "{}", ty);
            assert_eq!(value.value_type(), ty);
        }
    }

    #[test]
    fn test_parse_integers() {
        assert_eq!(ValueType::I32.parse_value("100").unwrap(), Value::I32(100));
        assert_eq!(ValueType::I32.parse_value("-75").unwrap(), Value::I32(-75));
        assert_eq!(ValueType::U16.parse_value("0xFFFF").unwrap(), Value::U16(0xFFFF));
        assert_eq!(ValueType::I64.parse_value("-0x10").unwrap(), Value::I64(-16));
        assert_eq!(
            ValueType::U64.parse_value("18446744073709551615").unwrap(),
            Value::U64(u64::MAX)
        );
    }

    #[test]
    fn test_parse_out_of_range() {
        assert!(matches!(
            ValueType::U8.parse_value("256"),
            Err(Error::InvalidType(_))
        ));
        assert!(ValueType::U32.parse_value("-1").is_err());
        assert!(ValueType::I32.parse_value("ten").is_err());
        assert!(ValueType::F32.parse_value("").is_err());
    }

    #[test]
    fn test_parse_rejects_stacked_signs_and_prefixes() {
        for text in ["--5", "-+5", "+5", "0x-5", "-0x+5", "0x0x10", "-"] {
            assert!(
                ValueType::I32.parse_value(text).is_err(),
                "{text} should not parse"
            );
        }
        assert_eq!(ValueType::I32.parse_value("-0x5").unwrap(), Value::I32(-5));
    }

    #[test]
    fn test_parse_floats() {
        assert_eq!(ValueType::F32.parse_value("1.5").unwrap(), Value::F32(1.5));
        assert_eq!(ValueType::F64.parse_value("-2").unwrap(), Value::F64(-2.0));
    }

    #[test]
    fn test_from_bytes_length_mismatch() {
        assert!(matches!(
            Value::from_bytes(ValueType::I32, &[1, 2]),
            Err(Error::InvalidType(_))
        ));
        assert_eq!(
            Value::from_bytes(ValueType::I16, &[0x34, 0x12]).unwrap(),
            Value::I16(0x1234)
        );
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::I32(1).compare(&Value::I32(2)), Some(Ordering::Less));
        assert_eq!(Value::F32(2.0).compare(&Value::F32(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::I32(1).compare(&Value::U32(1)), None);
        assert_eq!(Value::F64(f64::NAN).compare(&Value::F64(1.0)), None);
    }
}
