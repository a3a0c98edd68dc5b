// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::state::TxState;
use crate::{
    value::to_user_key, Backend, Readable, Snapshot, SnapshotRegistry, UserKey, UserValue,
    WriteSet,
};
use std::sync::Arc;

/// A write transaction on top of a store or another transaction
///
/// Use [`WriteTransaction::commit`] to commit changes to the parent.
///
/// Drop the transaction to rollback changes.
///
/// The transaction reads its parent through a snapshot taken when it was opened,
/// so commits landing on the parent in the meantime are not visible to it.
/// Write-write conflicts are not detected: the transaction committed last wins.
///
/// The tentative state can be snapshotted itself; those snapshots are handed
/// over to the parent when the transaction commits.
pub struct WriteTransaction {
    inner: Arc<TxState>,
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("writes", &self.len())
            .field("snapshots", &self.inner.registry.len())
            .field("committed", &self.is_committed())
            .finish()
    }
}

impl WriteTransaction {
    pub(crate) fn begin<B: Backend + 'static>(parent: &Arc<B>) -> Self {
        Self {
            inner: TxState::begin(parent),
        }
    }

    pub(crate) fn state(&self) -> &TxState {
        &self.inner
    }

    /// Opens a transaction on top of any snapshottable backend.
    ///
    /// [`crate::Store::write_tx`] is a shorthand for this.
    #[must_use]
    pub fn on<B: Backend + 'static>(parent: &Arc<B>) -> Self {
        Self::begin(parent)
    }

    /// Retrieves an item from the transaction's state.
    ///
    /// The transaction allows reading your own writes (RYOW).
    ///
    /// # Examples
    ///
    /// ```
    /// let store = tidemark::Store::new();
    /// store.insert("a", "previous_value")?;
    ///
    /// let mut tx = store.write_tx();
    /// tx.insert("a", "new_value")?;
    ///
    /// assert_eq!(Some("new_value".as_bytes().into()), tx.get("a")?);
    /// assert_eq!(Some("previous_value".as_bytes().into()), store.get("a")?);
    ///
    /// drop(tx);
    /// assert_eq!(Some("previous_value".as_bytes().into()), store.get("a")?);
    /// #
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the parent backend fails.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        Readable::get(&*self.inner, key.as_ref())
    }

    /// Returns `true` if the transaction's state contains the specified key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the parent backend fails.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        Readable::contains_key(&*self.inner, key.as_ref())
    }

    /// Returns the value the key currently holds in the parent backend.
    ///
    /// While the transaction commits, this is the pre-image snapshots of the
    /// parent capture for the key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the parent backend fails.
    pub fn original_value<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        self.inner.original_value(key.as_ref())
    }

    /// Inserts a key-value pair.
    ///
    /// Snapshots taken against the transaction keep seeing the previous value.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed, or if a
    /// snapshot of the transaction fails to capture.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes, or the value longer than 2^32 bytes.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        key: K,
        value: V,
    ) -> crate::Result<()> {
        let mut write_set = WriteSet::new();
        write_set.insert(key, value);
        self.write(&write_set)
    }

    /// Removes an item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed, or if a
    /// snapshot of the transaction fails to capture.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes.
    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) -> crate::Result<()> {
        let mut write_set = WriteSet::new();
        write_set.remove(key);
        self.write(&write_set)
    }

    /// Removes an item and returns its value if it existed.
    ///
    /// ```
    /// let store = tidemark::Store::new();
    /// store.insert("a", "abc")?;
    ///
    /// let mut tx = store.write_tx();
    ///
    /// let taken = tx.take("a")?.unwrap();
    /// assert_eq!(b"abc", &*taken);
    /// tx.commit()?;
    ///
    /// let item = store.get("a")?;
    /// assert!(item.is_none());
    /// #
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed, or if a
    /// backend or snapshot fails.
    pub fn take<K: AsRef<[u8]>>(&mut self, key: K) -> crate::Result<Option<UserValue>> {
        self.fetch_update(key, |_| None)
    }

    /// Atomically updates an item and returns the new value.
    ///
    /// Returning `None` removes the item if it existed before.
    ///
    /// # Examples
    ///
    /// ```
    /// let store = tidemark::Store::new();
    /// store.insert("a", "abc")?;
    ///
    /// let mut tx = store.write_tx();
    ///
    /// let updated = tx.update_fetch("a", |_| Some(b"def".as_slice().into()))?.unwrap();
    /// assert_eq!(b"def", &*updated);
    /// tx.commit()?;
    ///
    /// let item = store.get("a")?;
    /// assert_eq!(Some("def".as_bytes().into()), item);
    /// #
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed, or if a
    /// backend or snapshot fails.
    pub fn update_fetch<K: AsRef<[u8]>, F: FnMut(Option<&UserValue>) -> Option<UserValue>>(
        &mut self,
        key: K,
        f: F,
    ) -> crate::Result<Option<UserValue>> {
        let key = to_user_key(key);
        let (_, updated) = self.update(&key, f)?;
        Ok(updated)
    }

    /// Atomically updates an item and returns the previous value.
    ///
    /// Returning `None` removes the item if it existed before.
    ///
    /// # Examples
    ///
    /// ```
    /// let store = tidemark::Store::new();
    /// store.insert("a", "abc")?;
    ///
    /// let mut tx = store.write_tx();
    ///
    /// let prev = tx.fetch_update("a", |_| Some(b"def".as_slice().into()))?.unwrap();
    /// assert_eq!(b"abc", &*prev);
    /// tx.commit()?;
    ///
    /// let item = store.get("a")?;
    /// assert_eq!(Some("def".as_bytes().into()), item);
    /// #
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed, or if a
    /// backend or snapshot fails.
    pub fn fetch_update<K: AsRef<[u8]>, F: FnMut(Option<&UserValue>) -> Option<UserValue>>(
        &mut self,
        key: K,
        f: F,
    ) -> crate::Result<Option<UserValue>> {
        let key = to_user_key(key);
        let (prev, _) = self.update(&key, f)?;
        Ok(prev)
    }

    /// Returns the amount of keys written by the transaction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.write_set().len()
    }

    /// Returns `true` if the transaction has not written anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.write_set().is_empty()
    }

    /// Returns a copy of the pending writes.
    #[must_use]
    pub fn write_set(&self) -> WriteSet {
        self.inner.write_set().clone()
    }

    /// Returns `true` if the transaction has been committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.inner.is_committed()
    }

    /// Takes a snapshot of the transaction's tentative state.
    ///
    /// Once the transaction commits, the snapshot reads through the parent
    /// and keeps receiving pre-images from the parent's commits.
    ///
    /// # Examples
    ///
    /// ```
    /// let store = tidemark::Store::new();
    ///
    /// let mut tx = store.write_tx();
    /// tx.insert("a", "tentative")?;
    ///
    /// let snapshot = tx.snapshot()?;
    /// tx.insert("a", "final")?;
    /// tx.commit()?;
    ///
    /// assert_eq!(Some("tentative".as_bytes().into()), snapshot.get("a")?);
    /// assert!(store.registry().contains(&snapshot));
    /// #
    /// # snapshot.abort();
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed.
    pub fn snapshot(&self) -> crate::Result<Snapshot> {
        let _lock = self.inner.registry.lock_commits();
        self.inner.ensure_open()?;

        Ok(self.inner.registry.register(self.inner.clone()))
    }

    /// Opens a nested transaction on top of this one.
    ///
    /// Committing the nested transaction applies its writes to this transaction.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transaction was already committed.
    pub fn write_tx(&self) -> crate::Result<Self> {
        let base = {
            let _lock = self.inner.registry.lock_commits();
            self.inner.ensure_open()?;

            self.inner.registry.register(self.inner.clone())
        };

        Ok(Self {
            inner: TxState::with_base(&self.inner, base),
        })
    }

    /// Returns the registry of snapshots taken against the transaction.
    #[must_use]
    pub fn registry(&self) -> &SnapshotRegistry {
        &self.inner.registry
    }

    /// Commits the transaction into its parent.
    ///
    /// See [`SnapshotRegistry::apply_tx`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if a snapshot of the parent fails to capture, in
    /// which case nothing is written.
    pub fn commit(self) -> crate::Result<()> {
        self.inner.parent_registry.apply_tx(&self)
    }

    fn update<F: FnMut(Option<&UserValue>) -> Option<UserValue>>(
        &mut self,
        key: &UserKey,
        mut f: F,
    ) -> crate::Result<(Option<UserValue>, Option<UserValue>)> {
        let prev = self.get(key)?;
        let updated = f(prev.as_ref());

        if let Some(value) = &updated {
            // NOTE: Skip insert if the value hasn't changed
            if prev.as_ref() != Some(value) {
                self.insert(key, value)?;
            }
        } else if prev.is_some() {
            self.remove(key)?;
        }

        Ok((prev, updated))
    }

    fn write(&self, write_set: &WriteSet) -> crate::Result<()> {
        self.inner.ensure_open()?;
        self.inner.registry.commit_write_set(write_set)
    }
}

impl Readable for WriteTransaction {
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        Readable::get(&*self.inner, key)
    }
}
