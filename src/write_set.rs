// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    value::{to_user_key, to_user_value},
    UserKey, UserValue,
};
use std::collections::BTreeMap;

/// Pending mutations of a transaction
///
/// Holds at most one write per key; a later write to the same key replaces
/// the earlier one. A `None` value is a tombstone.
#[derive(Clone, Default, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct WriteSet {
    items: BTreeMap<UserKey, Option<UserValue>>,
}

impl std::fmt::Debug for WriteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.items.iter().map(|(k, v)| {
                (
                    String::from_utf8_lossy(k),
                    v.as_ref().map_or_else(
                        || "<tombstone>".into(),
                        |v| String::from_utf8_lossy(v).into_owned(),
                    ),
                )
            }))
            .finish()
    }
}

impl WriteSet {
    /// Creates an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a key-value pair.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes, or the value longer than 2^32 bytes.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.items
            .insert(to_user_key(key), Some(to_user_value(value)));
    }

    /// Adds a tombstone for a key.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes.
    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) {
        self.items.insert(to_user_key(key), None);
    }

    /// Returns the pending write of a key.
    ///
    /// `Some(None)` is a pending removal, `None` means the key is not written.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&Option<UserValue>> {
        self.items.get(key)
    }

    /// Returns `true` if the key is written.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.items.contains_key(key)
    }

    /// Iterates over all written keys, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &UserKey> {
        self.items.keys()
    }

    /// Iterates over all writes, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserKey, Option<&UserValue>)> {
        self.items.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Returns the amount of written keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Layers another write set on top of this one.
    pub(crate) fn merge(&mut self, other: &Self) {
        for (key, value) in &other.items {
            self.items.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn write_set_last_write_wins() {
        let mut set = WriteSet::new();
        set.insert("a", "1");
        set.insert("a", "2");
        set.remove("b");
        set.insert("b", "3");
        set.remove("c");

        assert_eq!(3, set.len());
        assert_eq!(Some(&Some(UserValue::from(b"2".as_slice()))), set.get(b"a"));
        assert_eq!(Some(&Some(UserValue::from(b"3".as_slice()))), set.get(b"b"));
        assert_eq!(Some(&None), set.get(b"c"));
        assert_eq!(None, set.get(b"d"));
    }

    #[test]
    fn write_set_merge() {
        let mut lower = WriteSet::new();
        lower.insert("a", "1");
        lower.insert("b", "1");

        let mut upper = WriteSet::new();
        upper.remove("a");
        upper.insert("c", "2");

        lower.merge(&upper);

        assert_eq!(
            vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()],
            lower.keys().map(|k| &**k).collect::<Vec<_>>()
        );
        assert_eq!(Some(&None), lower.get(b"a"));
        assert!(lower.contains_key(b"c"));
    }
}
