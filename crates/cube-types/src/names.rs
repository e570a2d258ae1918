//! Validated event-type names and event keys.
//!
//! Every event belongs to a named type. A type name doubles as the prefix
//! of the type's two storage collections (`<name>_events` and
//! `<name>_metrics`), so it is validated once at the boundary and carried
//! as a [`TypeName`] from then on.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// An event-type name matching `^[a-z][a-zA-Z0-9_]+$`.
///
/// Construction goes through [`TypeName::parse`], so holding a value is
/// proof that the name is safe to use as a collection prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeName(String);

impl TypeName {
    /// Validate `raw` against the identifier pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidType`] if the first character is
    /// not a lowercase ASCII letter, any later character is not an ASCII
    /// alphanumeric or underscore, or the name is shorter than two
    /// characters.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if is_valid_type_name(raw) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(ValidationError::InvalidType(raw.to_owned()))
        }
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the event-log collection for this type.
    pub fn events_collection(&self) -> String {
        format!("{}_events", self.0)
    }

    /// Name of the metric-cache collection for this type.
    pub fn metrics_collection(&self) -> String {
        format!("{}_metrics", self.0)
    }
}

fn is_valid_type_name(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let mut rest = 0_usize;
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        rest = rest.saturating_add(1);
    }
    rest >= 1
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TypeName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TypeName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_type_name(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidType(value))
        }
    }
}

impl From<TypeName> for String {
    fn from(name: TypeName) -> Self {
        name.0
    }
}

/// Primary key of a stored event.
///
/// Events submitted with an external `id` are keyed by it, so a second
/// submission with the same id replaces the first. Events without one get a
/// time-ordered UUID v7 key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    /// Generate a fresh key using UUID v7 (time-ordered).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Promote an external id to a key.
    ///
    /// Strings are used verbatim; numbers by their JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidKey`] for any other JSON kind.
    pub fn from_external(id: &Value) -> Result<Self, ValidationError> {
        match id {
            Value::String(s) => Ok(Self(s.clone())),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(ValidationError::InvalidKey(other.to_string())),
        }
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
