// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    snapshot::OriginalValueFn, tx::state::TxState, Backend, CaptureError, CaptureFailure, Config,
    Error, Readable, Snapshot, SnapshotId, WriteSet, WriteTransaction,
};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub(crate) struct RegistryInner {
    /// Backend that applies write sets
    owner: Weak<dyn Backend>,

    /// Same backend, used as read-through target of new snapshots
    reader: Weak<dyn Readable>,

    snapshots: DashMap<SnapshotId, Snapshot, xxhash_rust::xxh3::Xxh3Builder>,

    /// Serializes commits and snapshot registration
    commit_lock: Mutex<()>,

    config: Config,
}

impl RegistryInner {
    pub(crate) fn remove(&self, id: SnapshotId) -> bool {
        let removed = self.snapshots.remove(&id).is_some();

        if removed {
            log::trace!("Unregistered snapshot {id}");
        }

        removed
    }
}

/// Keeps track of the open snapshots of a backend
///
/// Every write set applied to the backend goes through the registry,
/// which first lets each registered snapshot capture the pre-images it
/// is missing, and only then makes the writes visible.
///
/// Snapshots taken against a transaction are adopted by the registry of
/// the transaction's parent once the transaction commits.
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct SnapshotRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SnapshotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SnapshotRegistry {
    /// Creates a registry owned by the given backend.
    ///
    /// Meant to be called from inside [`Arc::new_cyclic`], while constructing the backend.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{Arc, RwLock};
    /// use tidemark::{Backend, Config, Readable, SnapshotRegistry, UserValue, WriteSet};
    ///
    /// struct Flat {
    ///     items: RwLock<WriteSet>,
    ///     registry: SnapshotRegistry,
    /// }
    ///
    /// impl Readable for Flat {
    ///     fn get(&self, key: &[u8]) -> tidemark::Result<Option<UserValue>> {
    ///         let items = self.items.read().expect("lock is poisoned");
    ///         Ok(items.get(key).cloned().flatten())
    ///     }
    /// }
    ///
    /// impl Backend for Flat {
    ///     fn registry(&self) -> &SnapshotRegistry {
    ///         &self.registry
    ///     }
    ///
    ///     fn apply_write_set(&self, write_set: &WriteSet) -> tidemark::Result<()> {
    ///         let mut items = self.items.write().expect("lock is poisoned");
    ///         for (key, value) in write_set.iter() {
    ///             match value {
    ///                 Some(value) => items.insert(key, value),
    ///                 None => items.remove(key),
    ///             }
    ///         }
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let flat = Arc::new_cyclic(|weak| Flat {
    ///     items: RwLock::default(),
    ///     registry: SnapshotRegistry::new(weak, Config::default()),
    /// });
    ///
    /// let snapshot = flat.registry().create_snapshot()?;
    ///
    /// let mut write_set = WriteSet::new();
    /// write_set.insert("a", "1");
    /// flat.registry().commit_write_set(&write_set)?;
    ///
    /// assert!(flat.contains_key(b"a")?);
    /// assert!(!snapshot.contains_key("a")?);
    /// #
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    pub fn new<B: Backend + 'static>(owner: &Weak<B>, config: Config) -> Self {
        let backend: Weak<dyn Backend> = owner.clone();
        let reader: Weak<dyn Readable> = owner.clone();

        Self {
            inner: Arc::new(RegistryInner {
                owner: backend,
                reader,
                snapshots: DashMap::default(),
                commit_lock: Mutex::default(),
                config,
            }),
        }
    }

    /// Returns the configuration of the registry.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Takes a snapshot of the owning backend.
    ///
    /// Nothing is copied; the snapshot starts with an empty diff.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the owning backend has been dropped.
    pub fn create_snapshot(&self) -> crate::Result<Snapshot> {
        let backend = self.reader()?;
        Ok(self.create_snapshot_over(backend))
    }

    /// Registers a new snapshot reading through the given backend.
    ///
    /// The backend must expose the same state as the registry's owner,
    /// otherwise captured pre-images do not match what the snapshot saw.
    ///
    /// Registration is serialized with commits: the snapshot either
    /// observes a commit's writes, or captures its pre-images.
    pub(crate) fn create_snapshot_over(&self, backend: Arc<dyn Readable>) -> Snapshot {
        let _lock = self.lock_commits();
        self.register(backend)
    }

    /// Same as [`SnapshotRegistry::create_snapshot_over`], but expects the
    /// caller to hold the commit lock.
    pub(crate) fn register(&self, backend: Arc<dyn Readable>) -> Snapshot {
        let snapshot = Snapshot::new(backend, Arc::downgrade(&self.inner));
        self.inner.snapshots.insert(snapshot.id(), snapshot.clone());

        log::trace!("Registered snapshot {}", snapshot.id());

        snapshot
    }

    /// Unregisters a snapshot.
    ///
    /// Returns `true` if the snapshot was registered in this registry.
    /// Aborting twice is safe and returns `false`.
    pub fn abort_snapshot(&self, snapshot: &Snapshot) -> bool {
        snapshot.release(Some(&*self.inner))
    }

    /// Returns `true` if the snapshot is registered in this registry.
    #[must_use]
    pub fn contains(&self, snapshot: &Snapshot) -> bool {
        self.inner.snapshots.contains_key(&snapshot.id())
    }

    /// Returns the amount of registered snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.snapshots.len()
    }

    /// Returns `true` if no snapshot is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.snapshots.is_empty()
    }

    /// Returns the currently registered snapshots.
    ///
    /// The snapshots are collected when this is called; later
    /// registrations and aborts are not reflected. Order is unspecified.
    #[must_use]
    pub fn iter(&self) -> std::vec::IntoIter<Snapshot> {
        self.list().into_iter()
    }

    /// Applies an auto-committed write set to the owning backend.
    ///
    /// The pre-image of each written key is read from the owner itself.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any snapshot fails to capture (nothing is
    /// written then), or if the backend fails.
    pub fn commit_write_set(&self, write_set: &WriteSet) -> crate::Result<()> {
        let _lock = self.lock_commits();

        let owner = self.owner()?;
        let reader = self.reader()?;

        self.capture_and_apply(&*owner, write_set, &|key: &[u8]| reader.get(key))
    }

    /// Commits a transaction into the owning backend.
    ///
    /// 1. Every registered snapshot captures the pre-images of the keys the transaction writes.
    /// 2. The write set becomes visible in the backend.
    /// 3. Snapshots taken against the transaction are re-pointed to the backend
    ///    and move into this registry.
    ///
    /// All steps run under the registry's commit lock, so commits are serialized
    /// and no snapshot can be registered in between.
    ///
    /// # Errors
    ///
    /// Will return [`Error::InvalidArgument`] if the transaction was not opened against
    /// this registry's backend, or was already committed.
    ///
    /// Will return [`Error::Capture`] if any snapshot failed to capture its pre-images;
    /// the backend is left unchanged then.
    pub fn apply_tx(&self, tx: &WriteTransaction) -> crate::Result<()> {
        let tx = tx.state();

        let _lock = self.lock_commits();

        if !Arc::ptr_eq(&tx.parent_registry.inner, &self.inner) {
            return Err(Error::InvalidArgument(
                "transaction belongs to another backend",
            ));
        }

        // NOTE: Freezes the transaction's tentative state and its registry
        let _tx_lock = tx.registry.lock_commits();

        tx.ensure_open()?;

        let owner = self.owner()?;
        let reader = self.reader()?;
        let write_set = tx.write_set().clone();

        log::debug!(
            "Applying transaction with {} write(s), {} snapshot(s) registered",
            write_set.len(),
            self.len(),
        );

        self.capture_and_apply(&*owner, &write_set, &|key: &[u8]| {
            tx.original_value(key)
        })?;

        tx.mark_committed();

        self.adopt(tx, &reader, &write_set);

        // NOTE: The transaction's view of the parent is not needed anymore
        tx.base.release(Some(&*self.inner));

        Ok(())
    }

    pub(crate) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.inner.commit_lock.lock().expect("lock is poisoned")
    }

    fn owner(&self) -> crate::Result<Arc<dyn Backend>> {
        self.inner.owner.upgrade().ok_or(Error::Detached)
    }

    fn reader(&self) -> crate::Result<Arc<dyn Readable>> {
        self.inner.reader.upgrade().ok_or(Error::Detached)
    }

    fn list(&self) -> Vec<Snapshot> {
        self.inner
            .snapshots
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Lets every registered snapshot capture, then applies the write set
    /// if all captures succeeded.
    ///
    /// Expects the caller to hold the commit lock.
    fn capture_and_apply(
        &self,
        owner: &dyn Backend,
        write_set: &WriteSet,
        original_value: &OriginalValueFn<'_>,
    ) -> crate::Result<()> {
        let snapshots = self.list();

        let failures = self.capture_all(&snapshots, write_set, original_value);

        if !failures.is_empty() {
            log::warn!(
                "Rejecting commit: {} of {} snapshot(s) failed to capture",
                failures.len(),
                snapshots.len(),
            );
            return Err(CaptureError::new(failures).into());
        }

        owner.apply_write_set(write_set)
    }

    /// Runs the capture of every snapshot and collects all failures.
    ///
    /// A failing snapshot does not stop the others.
    fn capture_all(
        &self,
        snapshots: &[Snapshot],
        write_set: &WriteSet,
        original_value: &OriginalValueFn<'_>,
    ) -> Vec<CaptureFailure> {
        let capture = |snapshot: &Snapshot| -> Option<CaptureFailure> {
            snapshot
                .capture(write_set, original_value)
                .err()
                .map(|error| CaptureFailure {
                    snapshot: snapshot.id(),
                    error: Box::new(error),
                })
        };

        #[cfg(feature = "parallel")]
        if self.inner.config.should_fan_out(snapshots.len()) {
            log::trace!("Fanning out capture to {} snapshots", snapshots.len());
            return snapshots.par_iter().filter_map(&capture).collect();
        }

        snapshots.iter().filter_map(&capture).collect()
    }

    /// Moves all snapshots of a committed transaction into this registry.
    ///
    /// Each adopted snapshot inherits the pre-images of the transaction's base
    /// snapshot for keys the transaction did not write, so commits that reached
    /// this backend while the transaction was open stay invisible to it.
    fn adopt(&self, tx: &TxState, backend: &Arc<dyn Readable>, write_set: &WriteSet) {
        let children = tx.registry.list();

        if children.is_empty() {
            return;
        }

        let inherited = tx.base.pre_images_except(write_set);
        let mut adopted = 0;

        for snapshot in children {
            let mut location = snapshot.location();

            if !std::ptr::eq(location.as_ptr(), Arc::as_ptr(&tx.registry.inner)) {
                continue;
            }

            // NOTE: Snapshot may have been aborted concurrently
            if !tx.registry.inner.remove(snapshot.id()) {
                continue;
            }

            snapshot.rebase(backend.clone(), &inherited);
            *location = Arc::downgrade(&self.inner);
            self.inner.snapshots.insert(snapshot.id(), snapshot.clone());

            adopted += 1;
        }

        log::debug!("Adopted {adopted} snapshot(s) from committed transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use test_log::test;

    #[test]
    fn registry_abort_twice() {
        let store = Store::new();
        let snapshot = store.snapshot();

        assert!(store.registry().contains(&snapshot));
        assert!(store.registry().abort_snapshot(&snapshot));
        assert!(!store.registry().abort_snapshot(&snapshot));
        assert!(!snapshot.abort());
        assert!(store.registry().is_empty());
    }

    #[test]
    fn registry_snapshot_clone_shares_view() -> crate::Result<()> {
        let store = Store::new();
        store.insert("a", "1")?;

        let snapshot = store.snapshot();
        let shared = snapshot.clone();
        assert_eq!(snapshot, shared);

        store.insert("a", "2")?;

        // NOTE: A clone is the same registration, not a snapshot of the snapshot
        assert_eq!(1, store.registry().len());
        assert_eq!(Some(b"1".as_slice().into()), shared.get("a")?);
        assert_eq!(1, shared.diff_len());

        assert!(shared.abort());
        assert!(snapshot.is_aborted());
        assert!(!snapshot.abort());
        assert!(store.registry().is_empty());

        Ok(())
    }

    #[test]
    fn registry_abort_foreign_snapshot() {
        let a = Store::new();
        let b = Store::new();

        let snapshot = a.snapshot();
        assert!(!b.registry().abort_snapshot(&snapshot));
        assert!(!snapshot.is_aborted());
        assert!(a.registry().contains(&snapshot));

        assert!(snapshot.abort());
    }

    #[test]
    fn registry_iter_point_in_time() {
        let store = Store::new();
        let s1 = store.snapshot();
        let s2 = store.snapshot();

        let iter = store.registry().iter();

        let s3 = store.snapshot();
        s1.abort();

        let mut ids = iter.map(|s| s.id()).collect::<Vec<_>>();
        ids.sort_unstable();

        let mut expected = vec![s1.id(), s2.id()];
        expected.sort_unstable();

        assert_eq!(expected, ids);
        assert_eq!(2, store.registry().len());

        s2.abort();
        s3.abort();
    }

    #[test]
    fn registry_detached() {
        let store = Store::new();
        let registry = store.registry().clone();
        drop(store);

        assert!(matches!(registry.create_snapshot(), Err(Error::Detached)));
        assert!(matches!(
            registry.commit_write_set(&WriteSet::new()),
            Err(Error::Detached)
        ));
    }

    #[test]
    fn registry_apply_foreign_tx() -> crate::Result<()> {
        let a = Store::new();
        let b = Store::new();

        let mut tx = a.write_tx();
        tx.insert("a", "1")?;

        assert!(matches!(
            b.registry().apply_tx(&tx),
            Err(Error::InvalidArgument(_))
        ));
        assert!(b.is_empty());
        assert!(a.is_empty());

        tx.commit()?;
        assert_eq!(1, a.len());

        Ok(())
    }

    #[test]
    fn registry_apply_tx_twice() -> crate::Result<()> {
        let store = Store::new();

        let mut tx = store.write_tx();
        tx.insert("a", "1")?;

        store.registry().apply_tx(&tx)?;
        assert_eq!(1, store.seqno());

        assert!(matches!(
            store.registry().apply_tx(&tx),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(1, store.seqno());

        assert!(matches!(tx.insert("b", "2"), Err(Error::InvalidArgument(_))));

        Ok(())
    }

    #[test]
    fn registry_sequential_and_parallel_capture_agree() -> crate::Result<()> {
        for config in [
            Config::new().parallel_capture(false),
            Config::new().parallel_capture_threshold(1),
        ] {
            let store = config.open();
            store.insert("a", "0")?;

            let snapshots = (0..16)
                .map(|i| -> crate::Result<Snapshot> {
                    store.insert("a", i.to_string())?;
                    Ok(store.snapshot())
                })
                .collect::<crate::Result<Vec<_>>>()?;

            store.insert("a", "final")?;

            for (i, snapshot) in snapshots.iter().enumerate() {
                assert_eq!(
                    Some(i.to_string().as_bytes().into()),
                    snapshot.get("a")?
                );
                assert_eq!(1, snapshot.diff_len());
                snapshot.abort();
            }
        }

        Ok(())
    }
}
