use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blackboard type mismatch for key '{key}': {source}")]
    TypeMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value for key '{key}' is not representable: {source}")]
    Unrepresentable {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Typed handle onto a named blackboard entry.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbKey<T: 'static> {
    name: &'static str,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: 'static> Copy for BbKey<T> {}

impl<T: 'static> Clone for BbKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> BbKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn name(self) -> &'static str {
        self.name
    }
}

/// Keys touched since the last call to [`Blackboard::take_access`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessLog {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
    pub removals: BTreeSet<String>,
}

impl AccessLog {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty() && self.removals.is_empty()
    }
}

/// Shared key-value store every node in a tree can read and write.
///
/// Values are stored as JSON so the whole store can be copied into snapshots and shipped to
/// observers. Reads through `&self` are still tracked, which is why the read set sits behind a
/// `RefCell`.
#[derive(Debug, Default)]
pub struct Blackboard {
    values: BTreeMap<String, Value>,
    reads: RefCell<BTreeSet<String>>,
    writes: BTreeSet<String>,
    removals: BTreeSet<String>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        let keys: Vec<String> = self.values.keys().cloned().collect();
        for key in keys {
            self.remove_value(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.reads.borrow_mut().insert(key.to_string());
        self.values.get(key)
    }

    /// Read without recording an access. Used by observers (snapshots, watches) so that
    /// inspecting the store never shows up as node activity.
    pub fn peek(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.removals.remove(&key);
        self.writes.insert(key.clone());
        self.values.insert(key, value);
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key)?;
        self.writes.remove(key);
        self.removals.insert(key.to_string());
        Some(removed)
    }

    pub fn get<T: DeserializeOwned>(&self, key: BbKey<T>) -> Result<Option<T>, StoreError> {
        let Some(value) = self.get_value(key.name) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|source| StoreError::TypeMismatch {
                key: key.name.to_string(),
                source,
            })
    }

    pub fn set<T: Serialize>(&mut self, key: BbKey<T>, value: T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Unrepresentable {
            key: key.name.to_string(),
            source,
        })?;
        self.set_value(key.name, value);
        Ok(())
    }

    pub fn remove<T: DeserializeOwned>(&mut self, key: BbKey<T>) -> Result<Option<T>, StoreError> {
        let Some(value) = self.remove_value(key.name) else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::TypeMismatch {
                key: key.name.to_string(),
                source,
            })
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Drain the access log accumulated since the previous call.
    pub fn take_access(&mut self) -> AccessLog {
        AccessLog {
            reads: std::mem::take(self.reads.get_mut()),
            writes: std::mem::take(&mut self.writes),
            removals: std::mem::take(&mut self.removals),
        }
    }
}
