// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{SnapshotRegistry, UserValue, WriteSet};

/// Read capability shared by stores, transactions and snapshots
///
/// A snapshot delegates every read it cannot answer from its own
/// diff to a `Readable` backend, so snapshots can be layered on top
/// of stores, transactions, or other snapshots alike.
pub trait Readable: Send + Sync {
    /// Retrieves the current value of a key.
    ///
    /// Returns `None` if the key does not exist (or has been removed).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the underlying backend fails.
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>>;

    /// Returns `true` if the key exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the underlying backend fails.
    fn contains_key(&self, key: &[u8]) -> crate::Result<bool> {
        self.get(key).map(|x| x.is_some())
    }
}

/// A snapshottable backend, owning a [`SnapshotRegistry`]
///
/// Implemented by [`crate::Store`] and by write transactions; may be
/// implemented by external stores to put snapshots on top of them.
///
/// The registry must be constructed with a weak reference to the
/// backend itself, see [`SnapshotRegistry::new`].
pub trait Backend: Readable {
    /// Returns the registry of snapshots taken against this backend.
    fn registry(&self) -> &SnapshotRegistry;

    /// Makes a write set visible, atomically.
    ///
    /// Only called by the registry, while it holds its commit lock and
    /// after every registered snapshot has captured its pre-images.
    /// Calling it directly bypasses snapshot isolation.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend cannot apply the writes; it must then
    /// not have applied any of them.
    fn apply_write_set(&self, write_set: &WriteSet) -> crate::Result<()>;
}
