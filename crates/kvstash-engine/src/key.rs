//! Primary keys and their order-preserving byte encoding

use crate::{EngineError, Result};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

const NUMBER_TAG: u8 = 0x10;
const TEXT_TAG: u8 = 0x20;

/// A primary-key value extracted from a record
///
/// Every number sorts before every string. Numbers compare by value,
/// strings compare bytewise.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    Text(String),
}

impl Key {
    /// Build a numeric key. NaN is not a valid key.
    pub fn number(n: f64) -> Option<Self> {
        if n.is_nan() {
            return None;
        }
        // -0.0 and 0.0 are the same key
        Some(Key::Number(if n == 0.0 { 0.0 } else { n }))
    }

    /// Fail with `InvalidKey` unless this is a usable key
    ///
    /// Only a NaN number is rejected; it can be built through
    /// `From<f64>` or the public variant.
    pub fn validate(&self) -> Result<()> {
        match self {
            Key::Number(n) if n.is_nan() => Err(EngineError::InvalidKey("NaN".to_string())),
            _ => Ok(()),
        }
    }

    /// Extract a key from a JSON value
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().and_then(Key::number),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back to the JSON value it was extracted from
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => match as_integer(*n) {
                Some(i) => Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            },
            Key::Text(s) => Value::String(s.clone()),
        }
    }

    /// Encode so that bytewise order matches key order
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Number(n) => {
                let bits = n.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                let mut out = Vec::with_capacity(9);
                out.push(NUMBER_TAG);
                out.extend_from_slice(&ordered.to_be_bytes());
                out
            }
            Key::Text(s) => {
                let mut out = Vec::with_capacity(s.len() + 1);
                out.push(TEXT_TAG);
                out.extend_from_slice(s.as_bytes());
                out
            }
        }
    }

    /// Decode bytes produced by [`Key::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&NUMBER_TAG, rest)) => {
                let raw: [u8; 8] = rest
                    .try_into()
                    .map_err(|_| EngineError::InvalidKey(format!("{} byte number", rest.len())))?;
                let ordered = u64::from_be_bytes(raw);
                let bits = if ordered >> 63 == 1 { ordered & !(1 << 63) } else { !ordered };
                Ok(Key::Number(f64::from_bits(bits)))
            }
            Some((&TEXT_TAG, rest)) => String::from_utf8(rest.to_vec())
                .map(Key::Text)
                .map_err(|e| EngineError::InvalidKey(e.to_string())),
            Some((tag, _)) => Err(EngineError::InvalidKey(format!("unknown tag {:#04x}", tag))),
            None => Err(EngineError::InvalidKey("empty".to_string())),
        }
    }
}

fn as_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Number(_), Key::Text(_)) => Ordering::Less,
            (Key::Text(_), Key::Number(_)) => Ordering::Greater,
            (Key::Text(a), Key::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => match as_integer(*n) {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{}", n),
            },
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

/// Unlike [`Key::number`] this cannot refuse NaN; check with [`Key::validate`]
impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(if n == 0.0 { 0.0 } else { n })
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
