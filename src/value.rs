use std::fmt;

use itoa::Buffer as ItoaBuffer;
use ryu::Buffer as RyuBuffer;
use time::Date;

/// Represents a single coerced cell value produced by the CSV reader.
///
/// Absence is modelled as `Option<Value>`: an empty input cell, a filter
/// that maps a value away, and an unset default all yield `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Trimmed source string.
    Str(String),
    /// Positive integer without a leading zero.
    Int(i64),
    /// Decimal number recognised by the float patterns.
    Float(f64),
    /// Calendar date recognised by one of the date patterns.
    Date(Date),
    /// Boolean, produced by boolean filters rather than raw coercion.
    Bool(bool),
}

impl Value {
    /// Borrows the string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Interprets the value as a boolean.
    ///
    /// Strings parse through [`parse_bool`]; integers map 0/1; anything
    /// else is not a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(s) => parse_bool(s),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            _ => None,
        }
    }

    /// Renders the value into a CSV output field.
    pub(crate) fn encode_field(
        &self,
        out: &mut Vec<u8>,
        ryu: &mut RyuBuffer,
        itoa: &mut ItoaBuffer,
    ) {
        out.clear();
        match self {
            Self::Str(s) => out.extend_from_slice(s.as_bytes()),
            Self::Int(v) => out.extend_from_slice(itoa.format(*v).as_bytes()),
            Self::Float(v) => out.extend_from_slice(ryu.format(*v).as_bytes()),
            Self::Date(d) => {
                let _ = std::io::Write::write_fmt(out, format_args!("{d}"));
            }
            Self::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Parses the conventional boolean spellings, ASCII case-insensitive.
#[must_use]
pub fn parse_bool(s: &str) -> Option<bool> {
    let t = s.trim();
    if t.eq_ignore_ascii_case("true")
        || t.eq_ignore_ascii_case("t")
        || t.eq_ignore_ascii_case("yes")
        || t.eq_ignore_ascii_case("y")
        || t == "1"
    {
        Some(true)
    } else if t.eq_ignore_ascii_case("false")
        || t.eq_ignore_ascii_case("f")
        || t.eq_ignore_ascii_case("no")
        || t.eq_ignore_ascii_case("n")
        || t == "0"
    {
        Some(false)
    } else {
        None
    }
}
