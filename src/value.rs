// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// User defined key
pub type UserKey = Arc<[u8]>;

/// User defined data (blob of bytes)
pub type UserValue = Arc<[u8]>;

/// Commit sequence number of a store
///
/// Incremented once per applied write set, so all writes of
/// a transaction share the same sequence number.
pub type SeqNo = u64;

/// Process-unique snapshot identifier
pub type SnapshotId = u64;

static SNAPSHOT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_snapshot_id() -> SnapshotId {
    SNAPSHOT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn to_user_key<K: AsRef<[u8]>>(key: K) -> UserKey {
    let key = key.as_ref();

    assert!(
        u16::try_from(key.len()).is_ok(),
        "Keys can be up to 65535 bytes long"
    );

    Arc::from(key)
}

pub(crate) fn to_user_value<V: AsRef<[u8]>>(value: V) -> UserValue {
    let value = value.as_ref();

    assert!(
        u32::try_from(value.len()).is_ok(),
        "Values can be up to 2^32 bytes long"
    );

    Arc::from(value)
}
