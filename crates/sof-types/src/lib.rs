#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exponents outside this window render in scientific notation.
const PLAIN_EXPONENT_LIMIT: i64 = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid decimal literal {text:?}: {reason}")]
    InvalidDecimal { text: String, reason: &'static str },
}

/// Arbitrary-precision decimal kept in normalized form, so equality is numeric:
/// `5`, `5.0`, `5.00` and `0.5e1` are all the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    // Significant digits without leading or trailing zeros; empty means zero.
    digits: String,
    exponent: i64,
}

impl Decimal {
    pub fn parse(text: &str) -> Result<Self, TypeError> {
        let invalid = |reason| TypeError::InvalidDecimal {
            text: text.to_owned(),
            reason,
        };

        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            Some(_) => (false, text),
            None => return Err(invalid("empty input")),
        };

        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(pos) => {
                let raw = &unsigned[pos + 1..];
                let exponent = raw
                    .parse::<i64>()
                    .map_err(|_| invalid("exponent is not an integer"))?;
                (&unsigned[..pos], exponent)
            }
            None => (unsigned, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("no digits"));
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid("unexpected character"));
        }

        let frac_len = i64::try_from(frac_part.len()).map_err(|_| invalid("too many digits"))?;
        let exponent = exponent
            .checked_sub(frac_len)
            .ok_or_else(|| invalid("exponent out of range"))?;

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        Self::normalized(negative, digits, exponent).ok_or_else(|| invalid("exponent out of range"))
    }

    fn normalized(negative: bool, digits: String, exponent: i64) -> Option<Self> {
        let leading = digits.trim_start_matches('0');
        let significant = leading.trim_end_matches('0');
        if significant.is_empty() {
            return Some(Self::zero());
        }
        let trailing = i64::try_from(leading.len() - significant.len()).ok()?;
        let exponent = exponent.checked_add(trailing)?;
        // The most significant digit's power of ten must stay representable.
        exponent.checked_add(i64::try_from(significant.len() - 1).ok()?)?;
        Some(Self {
            negative,
            digits: significant.to_owned(),
            exponent,
        })
    }

    #[must_use]
    pub fn zero() -> Self {
        Self {
            negative: false,
            digits: String::new(),
            exponent: 0,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    // Power of ten of the most significant digit.
    fn adjusted_exponent(&self) -> i128 {
        i128::from(self.exponent) + self.digits.len() as i128 - 1
    }

    fn cmp_magnitude(&self, other: &Self) -> Ordering {
        match (self.is_zero(), other.is_zero()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        self.adjusted_exponent()
            .cmp(&other.adjusted_exponent())
            .then_with(|| self.digits.cmp(&other.digits))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.cmp_magnitude(other),
            (true, true) => other.cmp_magnitude(self),
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        if self.negative {
            f.write_str("-")?;
        }

        if !(-PLAIN_EXPONENT_LIMIT..=PLAIN_EXPONENT_LIMIT).contains(&self.exponent) {
            let (head, tail) = self.digits.split_at(1);
            f.write_str(head)?;
            if !tail.is_empty() {
                write!(f, ".{tail}")?;
            }
            return write!(f, "E{}", self.adjusted_exponent());
        }

        if self.exponent >= 0 {
            f.write_str(&self.digits)?;
            for _ in 0..self.exponent {
                f.write_str("0")?;
            }
            return Ok(());
        }

        let scale = self.exponent.unsigned_abs() as usize;
        if self.digits.len() > scale {
            let (int_part, frac_part) = self.digits.split_at(self.digits.len() - scale);
            write!(f, "{int_part}.{frac_part}")
        } else {
            f.write_str("0.")?;
            for _ in 0..scale - self.digits.len() {
                f.write_str("0")?;
            }
            f.write_str(&self.digits)
        }
    }
}

/// A FHIR resource id or reference, e.g. `p1`, `Patient/p1` or
/// `http://example.org/fhir/Patient/p1/_history/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdValue {
    value: String,
}

impl IdValue {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    fn without_history(&self) -> &str {
        match self.value.find("/_history/") {
            Some(pos) => &self.value[..pos],
            None => self.value.trim_end_matches('/'),
        }
    }

    /// The bare logical id, ignoring base URL, resource type and version.
    #[must_use]
    pub fn id_part(&self) -> &str {
        if self.value.starts_with("urn:") {
            return &self.value;
        }
        let path = self.without_history();
        path.rsplit('/').next().unwrap_or(path)
    }

    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        if self.value.starts_with("urn:") {
            return None;
        }
        let mut segments = self.without_history().rsplit('/');
        segments.next()?;
        segments
            .next()
            .filter(|segment| segment.starts_with(|c: char| c.is_ascii_uppercase()))
    }

    #[must_use]
    pub fn version_id(&self) -> Option<&str> {
        let pos = self.value.find("/_history/")?;
        let rest = &self.value[pos + "/_history/".len()..];
        rest.split('/').next().filter(|version| !version.is_empty())
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A value produced by a view evaluator for one row element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    String(String),
    Identifier(IdValue),
    Decimal { value: Decimal, text: String },
    /// Any other FHIR primitive (`integer`, `boolean`, `date`, ...) in canonical text form.
    Primitive { type_name: String, text: String },
    /// A non-primitive element such as a `HumanName` or `Reference`.
    Complex { type_name: String },
}

impl TypedValue {
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    #[must_use]
    pub fn identifier(value: impl Into<String>) -> Self {
        Self::Identifier(IdValue::new(value))
    }

    pub fn decimal(text: impl Into<String>) -> Result<Self, TypeError> {
        let text = text.into();
        let value = Decimal::parse(&text)?;
        Ok(Self::Decimal { value, text })
    }

    #[must_use]
    pub fn primitive(type_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Primitive {
            type_name: type_name.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::String(_) => "string",
            Self::Identifier(_) => "id",
            Self::Decimal { .. } => "decimal",
            Self::Primitive { type_name, .. } | Self::Complex { type_name } => type_name,
        }
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Complex { .. })
    }

    /// Canonical string form of a primitive; `None` for complex values.
    #[must_use]
    pub fn canonical_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            Self::Identifier(id) => Some(id.as_str()),
            Self::Decimal { text, .. } | Self::Primitive { text, .. } => Some(text),
            Self::Complex { .. } => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_string() {
            Some(text) => write!(f, "{}({text:?})", self.type_name()),
            None => write!(f, "{}{{..}}", self.type_name()),
        }
    }
}

/// An expected field value as written in a fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<JsonValue>),
    /// Kept verbatim; an object never matches a produced value.
    Object(serde_json::Map<String, serde_json::Value>),
}

impl JsonValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// String form of a primitive the way a JSON tree library reports it:
    /// number source text, `true`/`false`, or the string contents.
    #[must_use]
    pub fn string_form(&self) -> Option<String> {
        match self {
            Self::Bool(value) => Some(value.to_string()),
            Self::Number(number) => Some(number.to_string()),
            Self::String(value) => Some(value.clone()),
            Self::Null | Self::Array(_) | Self::Object(_) => None,
        }
    }
}

impl From<serde_json::Value> for JsonValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => Self::Number(number),
            Value::String(value) => Self::String(value),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map),
        }
    }
}

impl From<JsonValue> for serde_json::Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(value),
            JsonValue::Number(number) => Self::Number(number),
            JsonValue::String(value) => Self::String(value),
            JsonValue::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(map) => Self::Object(map),
        }
    }
}
