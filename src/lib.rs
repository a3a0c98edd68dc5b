// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tidemark provides lightweight point-in-time snapshots over a transactional, in-memory key-value store. It features:
//!
//! - Thread-safe BTreeMap-like store with atomic write transactions
//! - Snapshots that do not copy the store: each one keeps a sparse diff of
//!   the pre-images of keys changed after it was taken
//! - Snapshots of uncommitted transactions, handed over to the parent on commit
//! - Nested transactions
//! - Parallel capture of pre-images for many open snapshots (optional)
//! - 100% safe & stable Rust
//!
//! It is not:
//!
//! - a persistent database: neither the store nor snapshots survive a restart
//! - a conflict detector: concurrent transactions writing the same key are not rejected
//!
//! Snapshots are not released automatically. Every snapshot stays registered (and keeps
//! receiving pre-images) until it is aborted.
//!
//! ```
//! use tidemark::Store;
//!
//! let store = Store::new();
//! store.insert("a", "1")?;
//! store.insert("b", "2")?;
//!
//! // Pin the current state
//! let snapshot = store.snapshot();
//!
//! // Keep writing
//! store.insert("a", "9")?;
//! store.remove("b")?;
//!
//! // The snapshot is unaffected
//! assert_eq!(Some("1".as_bytes().into()), snapshot.get("a")?);
//! assert_eq!(Some("2".as_bytes().into()), snapshot.get("b")?);
//!
//! // ... and only holds the two changed keys
//! assert_eq!(2, snapshot.diff_len());
//!
//! // Release it again
//! assert!(snapshot.abort());
//! #
//! # Ok::<_, tidemark::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod readable;
mod registry;
mod snapshot;
mod store;
mod tx;
mod value;
mod write_set;

pub use {
    config::Config,
    error::{CaptureError, CaptureFailure, Error, Result},
    readable::{Backend, Readable},
    registry::SnapshotRegistry,
    snapshot::Snapshot,
    store::Store,
    tx::write_tx::WriteTransaction,
    value::{SeqNo, SnapshotId, UserKey, UserValue},
    write_set::WriteSet,
};
