//! Typed property bags.
//!
//! Devices, modules and commands all pass around the same loosely typed
//! key/value map. [`PropertyValue`] is the tagged union of what can go in
//! it; [`Properties`] is the map itself, with typed accessors so callers
//! don't have to match on the enum at every call site.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A single property value. Mirrors the small set of scalar/vector types
/// that show up in module commands and configuration properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum PropertyValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Int32Vec(Vec<i32>),
    Int64Vec(Vec<i64>),
    Float32Vec(Vec<f32>),
    Float64Vec(Vec<f64>),
    StringVec(Vec<String>),
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int32(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float32(v)
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

/// A named bag of [`PropertyValue`]s, used for module/device configuration
/// and for module commands and command replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    entries: HashMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a key and type-checks it, returning `InvalidParameter` if the
    /// key is present under a different type, or `NotFound` if absent.
    pub fn get_int32(&self, key: &str) -> ModelResult<i32> {
        match self.entries.get(key) {
            Some(PropertyValue::Int32(v)) => Ok(*v),
            Some(_) => Err(ModelError::InvalidParameter(format!(
                "property '{key}' is not an Int32"
            ))),
            None => Err(ModelError::NotFound(format!("property '{key}'"))),
        }
    }

    pub fn get_float32(&self, key: &str) -> ModelResult<f32> {
        match self.entries.get(key) {
            Some(PropertyValue::Float32(v)) => Ok(*v),
            Some(_) => Err(ModelError::InvalidParameter(format!(
                "property '{key}' is not a Float32"
            ))),
            None => Err(ModelError::NotFound(format!("property '{key}'"))),
        }
    }

    pub fn get_string(&self, key: &str) -> ModelResult<&str> {
        match self.entries.get(key) {
            Some(PropertyValue::String(v)) => Ok(v.as_str()),
            Some(_) => Err(ModelError::InvalidParameter(format!(
                "property '{key}' is not a String"
            ))),
            None => Err(ModelError::NotFound(format!("property '{key}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let mut props = Properties::new();
        props.set("gain_db_tenths", -60i32);
        assert_eq!(props.get_int32("gain_db_tenths").unwrap(), -60);
    }

    #[test]
    fn test_wrong_type_is_invalid_parameter() {
        let mut props = Properties::new();
        props.set("name", "volume");
        assert!(matches!(
            props.get_int32("name"),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let props = Properties::new();
        assert!(matches!(
            props.get_int32("missing"),
            Err(ModelError::NotFound(_))
        ));
    }
}
