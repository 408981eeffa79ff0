//! Key/value configuration surface shared by every filter.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A property value as seen by editors and state files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats; state files written by hand often drop the `.0`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

/// One editable property, as listed by `Filter::properties`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterProperty {
    pub key: &'static str,
    pub name: &'static str,
    pub value: PropertyValue,
    pub help: &'static str,
}

impl FilterProperty {
    pub fn new(
        key: &'static str,
        name: &'static str,
        value: impl Into<PropertyValue>,
        help: &'static str,
    ) -> Self {
        Self {
            key,
            name,
            value: value.into(),
            help,
        }
    }
}

/// What a successful `set_property` means for cached output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEffect {
    /// Output changes: the filter and everything below it must recompute.
    Recompute,
    /// Accepted, but streams are unaffected.
    Cosmetic,
    /// The new value equals the old one.
    Unchanged,
}

impl PropertyEffect {
    pub fn needs_update(self) -> bool {
        self == PropertyEffect::Recompute
    }
}

/// Rejected property edits. The filter is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    #[error("Unknown property '{0}'")]
    UnknownKey(String),

    #[error("Property '{key}' expects a {expected} value, got {got}")]
    WrongType {
        key: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl PropertyError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        PropertyError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str, value: &PropertyValue) -> PropertyError {
    PropertyError::WrongType {
        key: key.to_string(),
        expected,
        got: value.type_name(),
    }
}

pub(crate) fn expect_bool(key: &str, value: &PropertyValue) -> Result<bool, PropertyError> {
    value.as_bool().ok_or_else(|| wrong_type(key, "bool", value))
}

pub(crate) fn expect_int(key: &str, value: &PropertyValue) -> Result<i64, PropertyError> {
    value.as_int().ok_or_else(|| wrong_type(key, "int", value))
}

pub(crate) fn expect_float(key: &str, value: &PropertyValue) -> Result<f64, PropertyError> {
    match value.as_float() {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(PropertyError::invalid(key, "must be finite")),
        None => Err(wrong_type(key, "float", value)),
    }
}

pub(crate) fn expect_str<'a>(key: &str, value: &'a PropertyValue) -> Result<&'a str, PropertyError> {
    value.as_str().ok_or_else(|| wrong_type(key, "string", value))
}

/// Unsigned count within `min..=max`.
pub(crate) fn expect_count(
    key: &str,
    value: &PropertyValue,
    min: usize,
    max: usize,
) -> Result<usize, PropertyError> {
    let v = expect_int(key, value)?;
    if v < min as i64 || v > max as i64 {
        return Err(PropertyError::invalid(
            key,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(v as usize)
}

pub(crate) fn expect_colour(
    key: &str,
    value: &PropertyValue,
) -> Result<crate::types::Colour, PropertyError> {
    let s = expect_str(key, value)?;
    crate::types::Colour::from_hex(s)
        .ok_or_else(|| PropertyError::invalid(key, format!("'{s}' is not a #rrggbb colour")))
}

/// Parse `x,y,z`.
pub(crate) fn expect_vec3(key: &str, value: &PropertyValue) -> Result<[f32; 3], PropertyError> {
    let s = expect_str(key, value)?;
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(PropertyError::invalid(key, "expected three comma separated numbers"));
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(parts) {
        let v: f32 = part
            .parse()
            .map_err(|_| PropertyError::invalid(key, format!("'{part}' is not a number")))?;
        if !v.is_finite() {
            return Err(PropertyError::invalid(key, "must be finite"));
        }
        *slot = v;
    }
    Ok(out)
}

pub(crate) fn format_vec3(v: [f32; 3]) -> String {
    format!("{},{},{}", v[0], v[1], v[2])
}

/// Assign `new` to `slot`, reporting whether anything changed.
pub(crate) fn update<T: PartialEq>(slot: &mut T, new: T, effect: PropertyEffect) -> PropertyEffect {
    if *slot == new {
        PropertyEffect::Unchanged
    } else {
        *slot = new;
        effect
    }
}
