//! Items and queue entries
//!
//! An `Item` is a schema-less, insertion-ordered key/value record. The
//! pipeline never looks inside one; only transforms give fields meaning.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Opaque ordered record flowing through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert, keeps insertion order
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// `Some` only for JSON objects
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }
}

impl Deref for Item {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Item {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Item> for Value {
    fn from(item: Item) -> Self {
        Value::Object(item.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Item {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Compact JSON, used when logging a dropped item
impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// What a `RecordQueue` delivers: a data item or the end-of-stream marker.
///
/// The marker is its own variant, so no payload can ever be mistaken for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Item(Item),
    EndOfStream,
}

impl Entry {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Entry::EndOfStream)
    }

    pub fn into_item(self) -> Option<Item> {
        match self {
            Entry::Item(item) => Some(item),
            Entry::EndOfStream => None,
        }
    }
}

impl From<Item> for Entry {
    fn from(item: Item) -> Self {
        Entry::Item(item)
    }
}
