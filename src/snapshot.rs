// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    registry::RegistryInner, value::next_snapshot_id, Error, Readable, SnapshotId, UserKey,
    UserValue, WriteSet,
};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, RwLock, Weak,
};

/// Key -> pre-image, `None` meaning the key did not exist
type Diff = DashMap<UserKey, Option<UserValue>, xxhash_rust::xxh3::Xxh3Builder>;

/// Resolves the value a key holds right before a write set is applied
pub(crate) type OriginalValueFn<'a> =
    dyn Fn(&[u8]) -> crate::Result<Option<UserValue>> + Sync + 'a;

/// Read-through target of a snapshot
enum Target {
    /// Kept alive by the snapshot while it is registered
    Pinned(Arc<dyn Readable>),

    /// Not kept alive anymore, after the snapshot was aborted
    Released(Weak<dyn Readable>),
}

impl Target {
    fn upgrade(&self) -> crate::Result<Arc<dyn Readable>> {
        match self {
            Self::Pinned(backend) => Ok(backend.clone()),
            Self::Released(backend) => backend.upgrade().ok_or(Error::Detached),
        }
    }
}

pub(crate) struct SnapshotInner {
    id: SnapshotId,

    /// Pre-images of all keys written since the snapshot was taken
    diff: Diff,

    /// Answers all reads of keys that are not in the diff
    backend: RwLock<Target>,

    /// Registry the snapshot is currently registered in
    ///
    /// Also serializes aborting against adoption.
    location: Mutex<Weak<RegistryInner>>,

    aborted: AtomicBool,
}

/// A snapshot captures a read-only point-in-time view of a backend at the time the snapshot was created
///
/// Instead of copying data, a snapshot keeps a sparse diff: every commit applied
/// to its backend first records the previous value of each key it is about to change
/// (unless the snapshot already holds one for that key). All other reads fall through
/// to the backend. Memory usage is thus proportional to the amount of keys changed
/// since the snapshot was taken.
///
/// Snapshots stay registered until [`Snapshot::abort`] is called, and keep their backend
/// alive until then. Snapshots do not persist across restarts.
///
/// Snapshots are only taken through a registry ([`crate::Store::snapshot`],
/// [`crate::WriteTransaction::snapshot`], [`crate::SnapshotRegistry::create_snapshot`]).
/// A snapshot never changes, so a snapshot of a snapshot is the snapshot itself:
/// clone the handle to share it.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id())
            .field("diff_len", &self.diff_len())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Snapshot {}

impl Snapshot {
    pub(crate) fn new(backend: Arc<dyn Readable>, location: Weak<RegistryInner>) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                id: next_snapshot_id(),
                diff: Diff::default(),
                backend: RwLock::new(Target::Pinned(backend)),
                location: Mutex::new(location),
                aborted: AtomicBool::default(),
            }),
        }
    }

    /// Returns the process-unique ID of the snapshot.
    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.inner.id
    }

    /// Retrieves an item from the snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// let store = tidemark::Store::new();
    /// store.insert("a", "my_value")?;
    ///
    /// let snapshot = store.snapshot();
    /// store.insert("a", "my_updated_value")?;
    /// store.remove("a")?;
    ///
    /// // Repeatable read
    /// let item = snapshot.get("a")?;
    /// assert_eq!(Some("my_value".as_bytes().into()), item);
    /// #
    /// # snapshot.abort();
    /// # Ok::<(), tidemark::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend fails.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        Readable::get(self, key.as_ref())
    }

    /// Returns `true` if the snapshot contains the specified key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend fails.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        Readable::contains_key(self, key.as_ref())
    }

    /// Returns the amount of pre-images the snapshot holds.
    ///
    /// This is the amount of distinct keys changed since the snapshot was taken.
    #[must_use]
    pub fn diff_len(&self) -> usize {
        self.inner.diff.len()
    }

    /// Returns `true` if the snapshot was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Stops tracking the snapshot.
    ///
    /// Returns `true` if the snapshot was registered; aborting twice returns `false`.
    ///
    /// The snapshot does not receive pre-images anymore, so its reads are not
    /// guaranteed to be consistent after aborting. It also stops keeping its
    /// backend alive; reads fail with [`Error::Detached`] once the backend is gone.
    pub fn abort(&self) -> bool {
        self.release(None)
    }

    /// Unregisters the snapshot, optionally only if it is registered in `from`.
    pub(crate) fn release(&self, from: Option<&RegistryInner>) -> bool {
        let location = self.location();

        let registry = location.upgrade();

        if let (Some(registry), Some(expected)) = (&registry, from) {
            if !std::ptr::eq(Arc::as_ptr(registry), expected) {
                return false;
            }
        }

        self.inner.aborted.store(true, Ordering::Release);

        let removed = registry.is_some_and(|registry| registry.remove(self.id()));
        let unpinned = self.unpin();

        // NOTE: The backend may be a transaction whose last owner was this snapshot,
        // so drop it only after the location lock is released
        drop(location);
        drop(unpinned);

        removed
    }

    /// Downgrades the backend reference, returning the strong one.
    fn unpin(&self) -> Option<Arc<dyn Readable>> {
        let mut backend = self.inner.backend.write().expect("lock is poisoned");

        let pinned = match &*backend {
            Target::Pinned(pinned) => pinned.clone(),
            Target::Released(_) => return None,
        };

        *backend = Target::Released(Arc::downgrade(&pinned));
        Some(pinned)
    }

    pub(crate) fn location(&self) -> MutexGuard<'_, Weak<RegistryInner>> {
        self.inner.location.lock().expect("lock is poisoned")
    }

    /// Records the pre-image of every key of the write set the diff does not contain yet.
    ///
    /// Pre-images are staged and only inserted once all of them have been resolved,
    /// so a failed capture leaves the diff untouched.
    pub(crate) fn capture(
        &self,
        write_set: &WriteSet,
        original_value: &OriginalValueFn<'_>,
    ) -> crate::Result<usize> {
        let mut staged = Vec::new();

        for key in write_set.keys() {
            if self.inner.diff.contains_key(&**key) {
                continue;
            }
            staged.push((key.clone(), original_value(&**key)?));
        }

        let captured = staged.len();

        for (key, pre_image) in staged {
            // NOTE: First capture wins
            self.inner.diff.entry(key).or_insert(pre_image);
        }

        log::trace!("Snapshot {} captured {captured} pre-image(s)", self.id());

        Ok(captured)
    }

    /// Returns a copy of all pre-images of keys not contained in `exclude`.
    pub(crate) fn pre_images_except(&self, exclude: &WriteSet) -> Vec<(UserKey, Option<UserValue>)> {
        self.inner
            .diff
            .iter()
            .filter(|entry| !exclude.contains_key(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Re-points the snapshot to a new backend, adding inherited pre-images
    /// for keys the diff does not contain yet.
    ///
    /// Expects the caller to hold the snapshot's location lock.
    pub(crate) fn rebase(
        &self,
        backend: Arc<dyn Readable>,
        inherited: &[(UserKey, Option<UserValue>)],
    ) {
        for (key, pre_image) in inherited {
            self.inner
                .diff
                .entry(key.clone())
                .or_insert_with(|| pre_image.clone());
        }

        *self.inner.backend.write().expect("lock is poisoned") = Target::Pinned(backend);
    }
}

impl Readable for Snapshot {
    fn get(&self, key: &[u8]) -> crate::Result<Option<UserValue>> {
        if let Some(pre_image) = self.inner.diff.get(key) {
            return Ok(pre_image.value().clone());
        }

        let backend = self.inner.backend.read().expect("lock is poisoned").upgrade()?;
        let value = backend.get(key)?;

        // NOTE: A commit may have landed between the diff lookup and the backend read,
        // pre-images are always captured before the backend changes
        if let Some(pre_image) = self.inner.diff.get(key) {
            return Ok(pre_image.value().clone());
        }

        Ok(value)
    }
}
