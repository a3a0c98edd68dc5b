// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    Backend, Config, Readable, SeqNo, Snapshot, SnapshotRegistry, UserKey, UserValue,
    WriteSet, WriteTransaction,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

#[derive(Default)]
struct StoreState {
    items: BTreeMap<UserKey, UserValue>,
    seqno: SeqNo,
}

pub(crate) struct StoreInner {
    state: RwLock<StoreState>,
    registry: SnapshotRegistry,
}

impl Readable for StoreInner {
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        let state = self.state.read().expect("lock is poisoned");
        Ok(state.items.get(key).cloned())
    }
}

impl Backend for StoreInner {
    fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    fn apply_write_set(&self, write_set: &WriteSet) -> crate::Result<()> {
        // NOTE: Fully (write) lock, so the write set is applied atomically
        let mut state = self.state.write().expect("lock is poisoned");

        for (key, value) in write_set.iter() {
            if let Some(value) = value {
                state.items.insert(key.clone(), value.clone());
            } else {
                state.items.remove(key);
            }
        }

        state.seqno += 1;

        log::trace!(
            "Applied {} write(s) with seqno={}",
            write_set.len(),
            state.seqno
        );

        Ok(())
    }
}

/// An in-memory, ordered key-value store
///
/// Every write goes through the store's [`SnapshotRegistry`], so open
/// snapshots keep their point-in-time view without copying the store.
///
/// The handle is cheap to clone; clones refer to the same store.
///
/// # Examples
///
/// ```
/// use tidemark::Store;
///
/// let store = Store::new();
/// store.insert("a", "1")?;
/// store.insert("b", "2")?;
///
/// let snapshot = store.snapshot();
///
/// let mut tx = store.write_tx();
/// tx.insert("a", "9")?;
/// tx.remove("b")?;
/// tx.commit()?;
///
/// assert_eq!(Some("9".as_bytes().into()), store.get("a")?);
/// assert_eq!(None, store.get("b")?);
///
/// assert_eq!(Some("1".as_bytes().into()), snapshot.get("a")?);
/// assert_eq!(Some("2".as_bytes().into()), snapshot.get("b")?);
///
/// snapshot.abort();
/// #
/// # Ok::<(), tidemark::Error>(())
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("len", &self.len())
            .field("seqno", &self.seqno())
            .field("snapshots", &self.inner.registry.len())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with the default config.
    #[must_use]
    pub fn new() -> Self {
        Config::default().open()
    }

    pub(crate) fn open(config: Config) -> Self {
        log::debug!("Opening store with {config:?}");

        Self {
            inner: Arc::new_cyclic(|weak| StoreInner {
                state: RwLock::default(),
                registry: SnapshotRegistry::new(weak, config),
            }),
        }
    }

    /// Retrieves an item from the store.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches other [`Readable`] backends.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        Readable::get(&*self.inner, key.as_ref())
    }

    /// Returns `true` if the store contains the specified key.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches other [`Readable`] backends.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        Readable::contains_key(&*self.inner, key.as_ref())
    }

    /// Returns the amount of items in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.read().expect("lock is poisoned").items.len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the amount of write sets applied so far.
    #[must_use]
    pub fn seqno(&self) -> SeqNo {
        self.inner.state.read().expect("lock is poisoned").seqno
    }

    /// Inserts a key-value pair, as a single-write transaction.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a snapshot fails to capture, in which case nothing is written.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes, or the value longer than 2^32 bytes.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> crate::Result<()> {
        let mut write_set = WriteSet::new();
        write_set.insert(key, value);
        self.inner.registry.commit_write_set(&write_set)
    }

    /// Removes an item, as a single-write transaction.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a snapshot fails to capture, in which case nothing is written.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<()> {
        let mut write_set = WriteSet::new();
        write_set.remove(key);
        self.inner.registry.commit_write_set(&write_set)
    }

    /// Takes a snapshot of the store.
    ///
    /// The snapshot is registered until [`Snapshot::abort`] is called.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .registry
            .create_snapshot_over(self.inner.clone())
    }

    /// Opens a write transaction.
    #[must_use]
    pub fn write_tx(&self) -> WriteTransaction {
        WriteTransaction::begin(&self.inner)
    }

    /// Returns the registry of snapshots taken against the store.
    #[must_use]
    pub fn registry(&self) -> &SnapshotRegistry {
        &self.inner.registry
    }
}

impl Readable for Store {
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        Readable::get(&*self.inner, key)
    }
}
