//! Validated property maps attached to filesystem entries and columns.
//!
//! Keys must match `^[A-Za-z0-9_]+$`. A key whose value is `null` is never stored:
//! on creation it's dropped, on update it deletes the existing key.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

lazy_static! {
    static ref KEY_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Invalid property key {key:?}: keys may only contain ASCII letters, digits and underscores")]
    InvalidKey { key: String },
}

pub fn validate_key(key: &str) -> Result<(), PropertyError> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(PropertyError::InvalidKey {
            key: key.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

/// A property update whose keys have all been validated. Null values mark
/// keys to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesUpdate(Map<String, Value>);

impl PropertiesUpdate {
    pub fn try_from_map(map: Map<String, Value>) -> Result<Self, PropertyError> {
        for key in map.keys() {
            validate_key(key)?;
        }
        Ok(Self(map))
    }
}

impl Properties {
    /// Build a property map from raw input, validating every key and
    /// pruning null values.
    pub fn try_from_map(map: Map<String, Value>) -> Result<Self, PropertyError> {
        let mut properties = Self::default();
        properties.merge(map)?;
        Ok(properties)
    }

    /// Apply an update: non-null values overwrite, null values delete the key.
    /// Keys are validated before anything is applied.
    pub fn merge(&mut self, update: Map<String, Value>) -> Result<(), PropertyError> {
        self.apply(&PropertiesUpdate::try_from_map(update)?);
        Ok(())
    }

    pub fn apply(&mut self, update: &PropertiesUpdate) {
        for (key, value) in &update.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}
