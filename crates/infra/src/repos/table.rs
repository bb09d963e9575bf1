use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RepoError, RepoResult};

/// Keyed rows behind one lock. A poisoned lock surfaces as `Storage`.
#[derive(Debug)]
pub(crate) struct Table<K, V> {
    rows: RwLock<HashMap<K, V>>,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn read(&self) -> RepoResult<RwLockReadGuard<'_, HashMap<K, V>>> {
        self.rows.read().map_err(|_| RepoError::poisoned())
    }

    pub(crate) fn write(&self) -> RepoResult<RwLockWriteGuard<'_, HashMap<K, V>>> {
        self.rows.write().map_err(|_| RepoError::poisoned())
    }
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn get(&self, key: &K) -> RepoResult<Option<V>> {
        Ok(self.read()?.get(key).cloned())
    }

    pub(crate) fn upsert(&self, key: K, value: V) -> RepoResult<()> {
        self.write()?.insert(key, value);
        Ok(())
    }

    pub(crate) fn filter<F>(&self, mut keep: F) -> RepoResult<Vec<V>>
    where
        F: FnMut(&V) -> bool,
    {
        Ok(self.read()?.values().filter(|v| keep(v)).cloned().collect())
    }
}

impl<K, V> Default for Table<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
