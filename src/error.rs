// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SnapshotId;

/// Errors that may occur while reading or committing
#[derive(Debug)]
pub enum Error {
    /// The transaction cannot be applied to this registry's backend
    ///
    /// Returned if the transaction was opened against a different backend,
    /// or if it has already been committed.
    InvalidArgument(&'static str),

    /// One or more snapshots failed to capture their pre-images
    ///
    /// The commit was rejected as a whole; no write became visible.
    Capture(CaptureError),

    /// Error inside a backend implementation
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// The backend owning the registry has been dropped
    Detached,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TidemarkError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<CaptureError> for Error {
    fn from(value: CaptureError) -> Self {
        Self::Capture(value)
    }
}

/// A single snapshot's failed capture
#[derive(Debug)]
pub struct CaptureFailure {
    /// Snapshot that could not capture its pre-images
    pub snapshot: SnapshotId,

    /// Underlying cause
    pub error: Box<Error>,
}

/// Aggregated capture failures of one commit
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct CaptureError {
    failures: Vec<CaptureFailure>,
}

impl CaptureError {
    pub(crate) fn new(failures: Vec<CaptureFailure>) -> Self {
        Self { failures }
    }

    /// Returns every failed capture of the rejected commit.
    #[must_use]
    pub fn failures(&self) -> &[CaptureFailure] {
        &self.failures
    }

    /// Returns `true` if the given snapshot failed to capture.
    #[must_use]
    pub fn contains(&self, snapshot: SnapshotId) -> bool {
        self.failures.iter().any(|x| x.snapshot == snapshot)
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} snapshot(s) failed to capture pre-images",
            self.failures.len()
        )
    }
}

impl std::error::Error for CaptureError {}

/// Result helper type
pub type Result<T> = std::result::Result<T, Error>;
