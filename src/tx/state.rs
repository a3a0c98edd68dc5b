// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Backend, Error, Readable, Snapshot, SnapshotRegistry, UserValue, WriteSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, RwLockReadGuard,
};

/// Tentative state of a write transaction
///
/// Shared between the transaction handle and the snapshots taken against it,
/// so those keep working after the handle is gone.
pub(crate) struct TxState {
    /// Backend the transaction commits into
    parent: Arc<dyn Readable>,

    pub(crate) parent_registry: SnapshotRegistry,

    /// Snapshot of the parent, for repeatable reads
    pub(crate) base: Snapshot,

    /// Ephemeral transaction changes
    ///
    /// Used for RYOW (read-your-own-writes)
    write_set: RwLock<WriteSet>,

    /// Snapshots taken against the tentative state
    pub(crate) registry: SnapshotRegistry,

    committed: AtomicBool,
}

impl TxState {
    pub(crate) fn begin<B: Backend + 'static>(parent: &Arc<B>) -> Arc<Self> {
        let base = parent.registry().create_snapshot_over(parent.clone());
        Self::with_base(parent, base)
    }

    /// Opens a transaction reading through an already registered snapshot of `parent`.
    pub(crate) fn with_base<B: Backend + 'static>(parent: &Arc<B>, base: Snapshot) -> Arc<Self> {
        let parent_registry = parent.registry().clone();
        let config = parent_registry.config().clone();

        log::trace!("Opening transaction on top of snapshot {}", base.id());

        Arc::new_cyclic(|weak| Self {
            parent: parent.clone(),
            parent_registry,
            base,
            write_set: RwLock::default(),
            registry: SnapshotRegistry::new(weak, config),
            committed: AtomicBool::default(),
        })
    }

    /// Value the key holds in the parent right now, i.e. right before
    /// the transaction is applied if called while committing.
    pub(crate) fn original_value(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        self.parent.get(key)
    }

    pub(crate) fn write_set(&self) -> RwLockReadGuard<'_, WriteSet> {
        self.write_set.read().expect("lock is poisoned")
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_committed(&self) {
        self.committed.store(true, Ordering::Release);
    }

    /// Fails if the transaction was committed.
    pub(crate) fn ensure_open(&self) -> crate::Result<()> {
        if self.is_committed() {
            return Err(Error::InvalidArgument(
                "transaction has already been committed",
            ));
        }
        Ok(())
    }
}

impl Readable for TxState {
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        if let Some(value) = self.write_set().get(key) {
            return Ok(value.clone());
        }

        Readable::get(&self.base, key)
    }
}

impl Backend for TxState {
    fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    fn apply_write_set(&self, write_set: &WriteSet) -> crate::Result<()> {
        // NOTE: Only reached by nested transactions and tentative writes, the
        // latter are rejected earlier
        if self.is_committed() {
            return Err(Error::InvalidArgument(
                "parent transaction has already been committed",
            ));
        }

        self.write_set
            .write()
            .expect("lock is poisoned")
            .merge(write_set);

        Ok(())
    }
}

impl Drop for TxState {
    fn drop(&mut self) {
        if self.base.abort() {
            log::trace!("Rolled back transaction, released snapshot {}", self.base.id());
        }
    }
}
