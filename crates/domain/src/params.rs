//! Flat parameter map and target-state addressing.
//!
//! Keys are dot-segmented paths (`pcsAPhase.vol`, `bp_addr.HJ32.bpSoc`).
//! Values are leaves: numbers, strings, booleans, nulls or lists. The only
//! string values that still encode structure are raw battery-module JSON
//! strings, kept next to their exploded fields.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TargetKeyError;

/// Mapping of flat key → leaf value, last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, Value>);

impl ParameterMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or overwrite a single key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Merge `delta` into the map; later writes overwrite earlier ones.
    pub fn merge<I>(&mut self, delta: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.0.extend(delta);
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Iterate over keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write `value` at every location `target` resolves to.
    ///
    /// Returns how many locations were written. Exact keys are upserted;
    /// wildcard and index targets only touch locations that already exist.
    pub fn apply(&mut self, target: &TargetKey, value: &Value) -> usize {
        match target {
            TargetKey::Exact(key) => {
                self.0.insert(key.clone(), value.clone());
                1
            }
            TargetKey::Prefix(prefix) => {
                let mut written = 0;
                for (key, slot) in &mut self.0 {
                    if is_under_prefix(key, prefix) {
                        *slot = value.clone();
                        written += 1;
                    }
                }
                written
            }
            TargetKey::Index { key, index } => {
                match self.0.get_mut(key).and_then(Value::as_array_mut) {
                    Some(list) if *index < list.len() => {
                        list[*index] = value.clone();
                        1
                    }
                    _ => 0,
                }
            }
        }
    }
}

impl FromIterator<(String, Value)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ParameterMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<serde_json::Map<String, Value>> for ParameterMap {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

fn is_under_prefix(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Location expression used by optimistic target-state updates.
///
/// Grammar (after an optional `$.` root marker):
/// - `a.b.c`: exactly that flat key
/// - `a.b.*`: every existing key under `a.b.`
/// - `a.b[2]`: element 2 of the list stored under `a.b`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKey {
    Exact(String),
    Prefix(String),
    Index { key: String, index: usize },
}

impl FromStr for TargetKey {
    type Err = TargetKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("$.").unwrap_or(s);
        if s.is_empty() {
            return Err(TargetKeyError::Empty);
        }

        if let Some(prefix) = s.strip_suffix(".*") {
            if prefix.is_empty() {
                return Err(TargetKeyError::Empty);
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }

        if let Some(body) = s.strip_suffix(']') {
            let (key, index) = body
                .rsplit_once('[')
                .ok_or_else(|| TargetKeyError::InvalidIndex(s.to_string()))?;
            let index = index
                .parse()
                .map_err(|_| TargetKeyError::InvalidIndex(s.to_string()))?;
            if key.is_empty() {
                return Err(TargetKeyError::Empty);
            }
            return Ok(Self::Index {
                key: key.to_string(),
                index,
            });
        }

        Ok(Self::Exact(s.to_string()))
    }
}
