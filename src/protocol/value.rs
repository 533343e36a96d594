//! Typed primitive values and their text encoding

use std::fmt;

use super::CommandError;

/// Spelling of boolean true on the wire
pub const TRUE_LITERAL: &str = "True";

/// Spelling of boolean false on the wire
pub const FALSE_LITERAL: &str = "False";

/// Kind of a value once the signed distinction is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Bool,
}

impl ValueKind {
    /// Reply tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Bool => "bool",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A primitive value moved across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedValue {
    Int(i64),
    Bool(bool),
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Int(_) => ValueKind::Int,
            TypedValue::Bool(_) => ValueKind::Bool,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(v) => Some(*v),
            TypedValue::Bool(_) => None,
        }
    }

    /// Literal form without the tag
    pub fn literal(&self) -> String {
        match self {
            TypedValue::Int(v) => v.to_string(),
            TypedValue::Bool(true) => TRUE_LITERAL.to_string(),
            TypedValue::Bool(false) => FALSE_LITERAL.to_string(),
        }
    }

    /// Encode as a typed reply: `<tag>,<literal>`
    pub fn encode(&self) -> String {
        format!("{},{}", self.kind().tag(), self.literal())
    }

    /// Decode a typed reply produced by [`TypedValue::encode`]
    pub fn decode(text: &str) -> Result<Self, CommandError> {
        let malformed = || CommandError::MalformedReply(text.to_string());

        let (tag, literal) = text.split_once(',').ok_or_else(malformed)?;
        match tag {
            "int" => parse_int(literal).map(TypedValue::Int).ok_or_else(malformed),
            "bool" => Ok(TypedValue::Bool(parse_bool(literal))),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Int(v)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Bool(v)
    }
}

/// Parse a decimal integer literal, optionally negative
pub(crate) fn parse_int(literal: &str) -> Option<i64> {
    let digits = literal.strip_prefix('-').unwrap_or(literal);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    literal.parse().ok()
}

/// Anything but the exact true spelling is false
pub(crate) fn parse_bool(literal: &str) -> bool {
    literal == TRUE_LITERAL
}
