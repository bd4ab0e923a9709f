//! Flat key-value transport used to carry commands across a process boundary.
//!
//! Getters are forgiving: a missing key, an explicit
//! [`BundleValue::Null`] and a value of the wrong type all read as `None`.
//! Decoders layer their own defaults on top.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::region::Region;

/// A single value stored in a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BundleValue {
    /// A signed 64-bit integer.
    Long(i64),
    /// A boolean flag.
    Bool(bool),
    /// A string.
    Str(String),
    /// An explicit "no value" marker.
    Null,
    /// A serialized region.
    Region(Region),
}

/// Ordered map of string keys to [`BundleValue`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: BTreeMap<String, BundleValue>,
}

impl Bundle {
    /// Create an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under `key`.
    pub fn put(&mut self, key: impl Into<String>, value: BundleValue) {
        self.entries.insert(key.into(), value);
    }

    /// Store a long.
    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put(key, BundleValue::Long(value));
    }

    /// Store a boolean.
    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.put(key, BundleValue::Bool(value));
    }

    /// Store a string, or a [`BundleValue::Null`] marker when `value` is `None`.
    pub fn put_string(&mut self, key: impl Into<String>, value: Option<&str>) {
        let value = value.map_or(BundleValue::Null, |s| BundleValue::Str(s.to_owned()));
        self.put(key, value);
    }

    /// Store a region.
    pub fn put_region(&mut self, key: impl Into<String>, region: Region) {
        self.put(key, BundleValue::Region(region));
    }

    /// Returns `true` if `key` is present, even if it holds `Null`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The raw value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.entries.get(key)
    }

    /// The long under `key`, if present and of the right type.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(BundleValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// The boolean under `key`, if present and of the right type.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(BundleValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// The string under `key`, if present and of the right type.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(BundleValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// The region under `key`, if present and of the right type.
    #[must_use]
    pub fn get_region(&self, key: &str) -> Option<&Region> {
        match self.entries.get(key) {
            Some(BundleValue::Region(v)) => Some(v),
            _ => None,
        }
    }

    /// Remove and return the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<BundleValue> {
        self.entries.remove(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bundle has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
