/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared key/value store that parts read inputs from and write outputs to.
//!
//! The store has no schema: a key exists once something has written it and
//! keeps its last value until overwritten.  [`Store`] is a cheap handle around
//! an `Arc<Mutex<..>>`; every `get` / `put` takes the lock for the duration of
//! that single call and never longer, so a slow part cannot hold the data
//! plane hostage across a tick.
//!
//! ```rust
//! use tiercar_core::store::{Store, Value};
//!
//! let store = Store::new();
//! store.put(&["throttle", "steering"], vec![Value::Int(455), Value::Int(410)]).unwrap();
//! let values = store.get(&["steering", "missing"]).unwrap();
//! assert_eq!(values, vec![Value::Int(410), Value::Null]);
//! ```

pub mod value;

pub use value::Value;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Strict mode only: a requested key has never been written.
    #[error("key '{0}' not found in store")]
    KeyNotFound(String),

    /// `put` was given a different number of keys and values.  Nothing is
    /// written in that case.
    #[error("cannot write {values} value(s) to {keys} key(s)")]
    LengthMismatch { keys: usize, values: usize },

    /// A thread panicked while holding the store lock.  The runtime treats
    /// this as unrecoverable.
    #[error("store lock poisoned")]
    Poisoned,
}

/// How reads of never-written keys behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Missing keys read as [`Value::Null`].
    #[default]
    Lenient,
    /// Missing keys fail with [`StoreError::KeyNotFound`].
    Strict,
}

/// Thread-safe, schema-less store handle.  Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<HashMap<String, Value>>>,
    mode: ReadMode,
}

impl Store {
    /// Creates an empty store in lenient mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that rejects reads of unknown keys.
    pub fn strict() -> Self {
        Self::with_mode(ReadMode::Strict)
    }

    pub fn with_mode(mode: ReadMode) -> Self {
        Self {
            inner: Arc::default(),
            mode,
        }
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Reads `keys` and returns their values in request order.
    pub fn get<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<Value>, StoreError> {
        let map = self.lock()?;
        keys.iter()
            .map(|k| {
                let key = k.as_ref();
                match (map.get(key), self.mode) {
                    (Some(v), _) => Ok(v.clone()),
                    (None, ReadMode::Lenient) => Ok(Value::Null),
                    (None, ReadMode::Strict) => Err(StoreError::KeyNotFound(key.to_string())),
                }
            })
            .collect()
    }

    /// Reads a single key.
    pub fn get_one(&self, key: &str) -> Result<Value, StoreError> {
        let mut values = self.get(&[key])?;
        Ok(values.pop().unwrap_or_default())
    }

    /// Writes `values` to `keys` pairwise, overwriting existing entries.
    pub fn put<K: AsRef<str>>(&self, keys: &[K], values: Vec<Value>) -> Result<(), StoreError> {
        if keys.len() != values.len() {
            return Err(StoreError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let mut map = self.lock()?;
        for (key, value) in keys.iter().zip(values) {
            map.insert(key.as_ref().to_string(), value);
        }
        Ok(())
    }

    /// Writes a single key.
    pub fn put_one(&self, key: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        self.put(&[key], vec![value.into()])
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(key))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    /// Sorted snapshot of every key currently present.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
