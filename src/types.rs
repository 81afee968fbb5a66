//! Validated, immutable data model: tags, typed fields, and measurements.

use std::time::SystemTime;

use crate::error::InfluxError;
use crate::sets::{FieldSet, TagSet};

/// Protocol version used when rendering field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Lenient v1: unsigned integers are clamped to `i64::MAX` and written
    /// with the `i` suffix (lossy compatibility shim).
    V1,
    /// Strict v1: unsigned integer fields are rejected at render time.
    V1Strict,
    /// v2: unsigned integers are written natively with the `u` suffix.
    V2,
}

/// Resolution of the timestamp column appended to each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampResolution {
    /// Omit the timestamp column; the server assigns its own time.
    None,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimestampResolution {
    /// Value of the `precision` query parameter, if one is sent at all.
    pub(crate) fn query_unit(self) -> Option<&'static str> {
        match self {
            TimestampResolution::None => None,
            TimestampResolution::Nanoseconds => Some("ns"),
            TimestampResolution::Microseconds => Some("us"),
            TimestampResolution::Milliseconds => Some("ms"),
            TimestampResolution::Seconds => Some("s"),
        }
    }
}

/// Typed scalar carried by a [`Field`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    /// Native to protocol v2 only. Lenient v1 clamps values above `i64::MAX`
    /// to `i64::MAX` (observable, deliberate approximation); strict v1
    /// rejects the field at render time.
    UInteger(u64),
    Text(String),
    Boolean(bool),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInteger(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// A single field: the measured value of a point. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    key: String,
    value: FieldValue,
}

impl Field {
    /// Creates a new field.
    ///
    /// The key must be non-empty, must not be whitespace-only, must not start
    /// with an underscore, and must not contain control characters. `Text`
    /// values must not contain control characters either.
    pub fn new(key: &str, value: impl Into<FieldValue>) -> Result<Self, InfluxError> {
        validate_key(key)?;
        let value = value.into();
        if let FieldValue::Text(text) = &value {
            if has_control_chars(text) {
                return Err(InfluxError::InvalidValue(
                    "value must not contain any control characters".to_string(),
                ));
            }
        }
        Ok(Field {
            key: key.to_string(),
            value,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

/// A single tag: indexed string-valued metadata on a point. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a new tag.
    ///
    /// Key rules are the same as for [`Field::new`], with one addition: the
    /// key `"time"` is reserved by the server and rejected. The value must
    /// not contain control characters.
    pub fn new(key: &str, value: &str) -> Result<Self, InfluxError> {
        validate_key(key)?;
        if key == "time" {
            return Err(InfluxError::ReservedKey(key.to_string()));
        }
        if has_control_chars(value) {
            return Err(InfluxError::InvalidValue(
                "value must not contain any control characters".to_string(),
            ));
        }
        Ok(Tag {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// One timestamped observation: a name, a tag set, a field set, and an instant.
///
/// The name and timestamp are fixed at construction; tags and fields may be
/// appended afterwards (uniqueness and validity rules still apply). At least
/// one field is required before the measurement can be rendered.
#[derive(Debug)]
pub struct Measurement {
    name: String,
    tags: TagSet,
    fields: FieldSet,
    timestamp: SystemTime,
}

impl Measurement {
    /// Creates a measurement stamped with the current time.
    pub fn new(name: &str) -> Result<Self, InfluxError> {
        Self::with_timestamp(name, SystemTime::now())
    }

    /// Creates a measurement with an explicit timestamp.
    ///
    /// The name must be non-empty, not whitespace-only, must not start with
    /// an underscore, and must not contain control characters. A timestamp
    /// before the Unix epoch is accepted here but fails at render time.
    pub fn with_timestamp(name: &str, timestamp: SystemTime) -> Result<Self, InfluxError> {
        validate_name(name)?;
        Ok(Measurement {
            name: name.to_string(),
            tags: TagSet::new(),
            fields: FieldSet::new(),
            timestamp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Adds a tag; chainable shortcut for [`TagSet::add`].
    pub fn add_tag(&self, key: &str, value: &str) -> Result<&Self, InfluxError> {
        self.tags.add(Tag::new(key, value)?)?;
        Ok(self)
    }

    /// Adds a field; chainable shortcut for [`FieldSet::add`].
    pub fn add_field(&self, key: &str, value: impl Into<FieldValue>) -> Result<&Self, InfluxError> {
        self.fields.add(Field::new(key, value)?)?;
        Ok(self)
    }
}

impl Clone for Measurement {
    fn clone(&self) -> Self {
        Measurement {
            name: self.name.clone(),
            tags: self.tags.clone(),
            fields: self.fields.clone(),
            timestamp: self.timestamp,
        }
    }
}

fn has_control_chars(text: &str) -> bool {
    text.chars().any(char::is_control)
}

fn validate_key(key: &str) -> Result<(), InfluxError> {
    if key.trim().is_empty() {
        return Err(InfluxError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.starts_with('_') {
        return Err(InfluxError::InvalidKey(
            "key cannot start with underscore".to_string(),
        ));
    }
    if has_control_chars(key) {
        return Err(InfluxError::InvalidKey(
            "key must not contain any control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), InfluxError> {
    if name.trim().is_empty() {
        return Err(InfluxError::InvalidName(
            "name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('_') {
        return Err(InfluxError::InvalidName(
            "name cannot start with underscore".to_string(),
        ));
    }
    if has_control_chars(name) {
        return Err(InfluxError::InvalidName(
            "name must not contain any control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_validation() {
        assert!(Field::new("ok", 1i64).is_ok());
        assert!(matches!(
            Field::new("", 1i64),
            Err(InfluxError::InvalidKey(_))
        ));
        assert!(matches!(
            Field::new("   ", 1i64),
            Err(InfluxError::InvalidKey(_))
        ));
        assert!(matches!(
            Field::new("_internal", 1i64),
            Err(InfluxError::InvalidKey(_))
        ));
        assert!(matches!(
            Field::new("bad\tkey", 1i64),
            Err(InfluxError::InvalidKey(_))
        ));
    }

    #[test]
    fn field_text_value_rejects_control_chars() {
        assert!(Field::new("key", "plain text").is_ok());
        assert!(matches!(
            Field::new("key", "line\nbreak"),
            Err(InfluxError::InvalidValue(_))
        ));
    }

    #[test]
    fn field_value_conversions() {
        assert_eq!(
            Field::new("k", 1.5f64).unwrap().value(),
            &FieldValue::Float(1.5)
        );
        assert_eq!(
            Field::new("k", -42i64).unwrap().value(),
            &FieldValue::Integer(-42)
        );
        assert_eq!(
            Field::new("k", 42u64).unwrap().value(),
            &FieldValue::UInteger(42)
        );
        assert_eq!(
            Field::new("k", "text").unwrap().value(),
            &FieldValue::Text("text".to_string())
        );
        assert_eq!(
            Field::new("k", true).unwrap().value(),
            &FieldValue::Boolean(true)
        );
    }

    #[test]
    fn tag_validation() {
        assert!(Tag::new("host", "server-1").is_ok());
        assert!(matches!(
            Tag::new("time", "now"),
            Err(InfluxError::ReservedKey(_))
        ));
        assert!(matches!(
            Tag::new("_hidden", "x"),
            Err(InfluxError::InvalidKey(_))
        ));
        assert!(matches!(
            Tag::new("host", "bad\u{0007}value"),
            Err(InfluxError::InvalidValue(_))
        ));
    }

    #[test]
    fn measurement_name_validation() {
        assert!(Measurement::new("cpu").is_ok());
        assert!(matches!(
            Measurement::new(""),
            Err(InfluxError::InvalidName(_))
        ));
        assert!(matches!(
            Measurement::new(" \t "),
            Err(InfluxError::InvalidName(_))
        ));
        assert!(matches!(
            Measurement::new("_cpu"),
            Err(InfluxError::InvalidName(_))
        ));
    }

    #[test]
    fn measurement_appends_keep_set_invariants() {
        let m = Measurement::new("cpu").unwrap();
        m.add_tag("host", "a").unwrap();
        assert!(matches!(
            m.add_tag("host", "b"),
            Err(InfluxError::DuplicateKey(_))
        ));
        m.add_field("usage", 0.5).unwrap();
        assert!(matches!(
            m.add_field("usage", 0.9),
            Err(InfluxError::DuplicateKey(_))
        ));
        assert_eq!(m.tags().len(), 1);
        assert_eq!(m.fields().len(), 1);
    }
}
