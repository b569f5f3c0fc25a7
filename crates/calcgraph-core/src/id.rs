use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CalcGraphError, Result};

const SEPARATOR: char = '~';

/// Stable logical identity of a versioned entity, independent of its version.
///
/// The textual form is `Scheme~Value`, e.g. `Ticker~AAPL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId {
    scheme: String,
    value: String,
}

impl ObjectId {
    /// Builds an identifier without validation. Use [`ObjectId::parse`] for text.
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let (scheme, value) = text
            .split_once(SEPARATOR)
            .ok_or_else(|| CalcGraphError::InvalidIdentifier(format!("missing '~' in {text}")))?;
        if scheme.is_empty() || value.is_empty() {
            return Err(CalcGraphError::InvalidIdentifier(format!(
                "empty scheme or value in {text}"
            )));
        }
        Ok(Self::of(scheme, value))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SEPARATOR, self.value)
    }
}

impl FromStr for ObjectId {
    type Err = CalcGraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = CalcGraphError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}

/// Identifies one running view process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewProcessId(Uuid);

impl ViewProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ViewProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_value() {
        let oid: ObjectId = "Ticker~AAPL".parse().unwrap();
        assert_eq!(oid.scheme(), "Ticker");
        assert_eq!(oid.value(), "AAPL");
        assert_eq!(oid.to_string(), "Ticker~AAPL");
    }

    #[test]
    fn value_may_contain_separator() {
        let oid = ObjectId::parse("Curve~USD~3M").unwrap();
        assert_eq!(oid.scheme(), "Curve");
        assert_eq!(oid.value(), "USD~3M");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!(ObjectId::parse("NoSeparator").is_err());
        assert!(ObjectId::parse("~value").is_err());
        assert!(ObjectId::parse("scheme~").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let oid = ObjectId::of("Holiday", "GBLO");
        let json = serde_json::to_string(&oid).unwrap();
        assert_eq!(json, "\"Holiday~GBLO\"");
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, oid);
    }
}
