/*!
An owned, in-memory CBOR value tree.

[`Value`] mirrors the wire model: integers, floats with their source width,
text, byte strings, arrays, maps (order preserved, duplicate keys allowed),
tagged values, and the four supported simple values.

Equality is structural. Floats compare by bit pattern with all NaNs equal
(`-0.0` and `+0.0` are distinct) and ignore the recorded width, so a value
decoded at one width equals the same number decoded at another. `Display`
renders RFC 8949 section 8 diagnostic notation.
*/

use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};

use crate::float::{self, Width};

/// A single CBOR data item.
#[derive(Debug, Clone)]
pub enum Value {
    /// Major 0 or 1, any value representable in a signed 64-bit integer.
    Int(i64),
    /// Major 7 minor 25/26/27. `width` records the source encoding;
    /// [`Width::Auto`] lets the encoder choose the narrowest lossless form.
    Float {
        /// The numeric value, widened to binary64.
        value: f64,
        /// The source (or requested) encoding width.
        width: Width,
    },
    /// Major 3, valid UTF-8.
    Text(String),
    /// Major 2, arbitrary bytes.
    Blob(Vec<u8>),
    /// Major 4.
    Array(Vec<Value>),
    /// Major 5. Order preserved; duplicate keys permitted.
    Map(Vec<(Value, Value)>),
    /// Major 6: a tag number and the single value it encloses.
    Tag(u64, Box<Value>),
    /// Major 7 minor 20.
    False,
    /// Major 7 minor 21.
    True,
    /// Major 7 minor 22.
    Null,
    /// Major 7 minor 23.
    Undefined,
}

impl Value {
    /// A float with [`Width::Auto`].
    pub fn float(value: f64) -> Self {
        Self::Float {
            value,
            width: Width::Auto,
        }
    }

    /// `True` or `False`.
    pub fn bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }

    /// Checks internal constraints recursively. Primitives are always
    /// valid; a float is invalid when its declared non-auto width cannot
    /// represent the value losslessly (NaN is accepted at any width).
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Float { value, width } => match width {
                Width::Auto | Width::Double => true,
                Width::Half => value.is_nan() || float::narrow_f16(*value).is_some(),
                Width::Single => value.is_nan() || float::narrow_f32(*value).is_some(),
            },
            Self::Array(items) => items.iter().all(Value::is_valid),
            Self::Map(entries) => entries.iter().all(|(k, v)| k.is_valid() && v.is_valid()),
            Self::Tag(_, inner) => inner.is_valid(),
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float { value: a, .. }, Self::Float { value: b, .. }) => float::f64_equal(*a, *b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Tag(t, a), Self::Tag(u, b)) => t == u && a == b,
            (Self::False, Self::False)
            | (Self::True, Self::True)
            | (Self::Null, Self::Null)
            | (Self::Undefined, Self::Undefined) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Int(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            Self::Float { value, .. } => {
                state.write_u8(1);
                float::canonical_bits(*value).hash(state);
            }
            Self::Text(s) => {
                state.write_u8(2);
                s.hash(state);
            }
            Self::Blob(b) => {
                state.write_u8(3);
                b.hash(state);
            }
            Self::Array(items) => {
                state.write_u8(4);
                items.hash(state);
            }
            Self::Map(entries) => {
                state.write_u8(5);
                entries.hash(state);
            }
            Self::Tag(t, inner) => {
                state.write_u8(6);
                t.hash(state);
                inner.hash(state);
            }
            Self::False => state.write_u8(7),
            Self::True => state.write_u8(8),
            Self::Null => state.write_u8(9),
            Self::Undefined => state.write_u8(10),
        }
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("NaN")
    } else if value == f64::INFINITY {
        f.write_str("Infinity")
    } else if value == f64::NEG_INFINITY {
        f.write_str("-Infinity")
    } else {
        // Debug gives the shortest round-trip form with a ".0" on integers.
        write!(f, "{value:?}")
    }
}

fn fmt_text(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float { value, .. } => fmt_float(f, *value),
            Self::Text(s) => fmt_text(f, s),
            Self::Blob(bytes) => {
                f.write_str("h'")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                f.write_char('\'')
            }
            Self::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            Self::Map(entries) => {
                f.write_char('{')?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_char('}')
            }
            Self::Tag(tag, inner) => write!(f, "{tag}({inner})"),
            Self::False => f.write_str("false"),
            Self::True => f.write_str("true"),
            Self::Null => f.write_str("null"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_ignores_width() {
        let a = Value::Float {
            value: 55.0,
            width: Width::Half,
        };
        let b = Value::float(55.0);
        assert_eq!(a, b);
    }

    #[test]
    fn nan_equals_nan_and_zero_signs_differ() {
        assert_eq!(Value::float(f64::NAN), Value::float(f64::NAN));
        assert_ne!(Value::float(0.0), Value::float(-0.0));
    }

    #[test]
    fn hash_matches_equality() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let a = Value::Float {
            value: f64::NAN,
            width: Width::Half,
        };
        let b = Value::float(-f64::NAN);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn invalid_width() {
        let v = Value::Float {
            value: 1.1,
            width: Width::Half,
        };
        assert!(!v.is_valid());
        assert!(Value::float(1.1).is_valid());
        assert!(!Value::Array(vec![v]).is_valid());
    }

    #[test]
    fn diagnostic_notation() {
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::float(55.0).to_string(), "55.0");
        assert_eq!(Value::float(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::float(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(
            Value::Text("a\"b\\c\u{1}".into()).to_string(),
            "\"a\\\"b\\\\c\\u0001\""
        );
        assert_eq!(Value::Blob(vec![0xDE, 0xAD]).to_string(), "h'DEAD'");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::True]).to_string(),
            "[1, true]"
        );
        assert_eq!(
            Value::Map(vec![(Value::Int(1), Value::Null)]).to_string(),
            "{1: null}"
        );
        assert_eq!(
            Value::Tag(32, Box::new(Value::Text("x".into()))).to_string(),
            "32(\"x\")"
        );
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }
}
