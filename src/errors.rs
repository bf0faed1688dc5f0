//! Error taxonomy of the store.
//!
//! Fallible paths return `anyhow::Result`; the typed variants below travel
//! inside the `anyhow::Error` and are recovered with `downcast_ref` where a
//! caller needs to discriminate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Read-only open with no existing data file.
    #[error("database file not found at {path}")]
    NotFound { path: PathBuf },

    /// Requested or on-disk size is not a multiple of the size quantum.
    #[error("database size {size} must be a multiple of {quantum} bytes")]
    SizeInvalid { size: u64, quantum: u64 },

    /// Hugepages or locked residency requested where unsupported.
    #[error("{0}")]
    UnsupportedPlatform(String),

    /// A supplied hugepage path is not a hugetlbfs mount.
    #[error("{path} does not look like a hugetlbfs mount")]
    HugepageMount { path: PathBuf },

    /// Creation, growth, map, truncate or permission failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The advisory write lock was not obtained.
    #[error("could not gain write access to the shared memory file")]
    LockBusy,

    /// Dirty flag set and `allow_dirty` false.
    #[error("database dirty flag set")]
    DirtyDatabase,

    /// The dirty flag or environment record is absent when it must exist.
    #[error("could not find {name} in shared memory")]
    MissingSentinel { name: &'static str },

    /// Fingerprint of the segment differs from the host.
    #[error("database created by a different compiler, build or environment")]
    EnvironmentMismatch,

    /// A signal arrived while the image was being preloaded.
    #[error("database load aborted")]
    LoadAborted,

    /// Pinning the segment in physical memory failed.
    #[error("failed to lock database memory")]
    PinFailed,

    /// Lookup of an index type that was never registered.
    #[error("index type {0} is not registered")]
    NotRegistered(&'static str),

    /// Lock-usage assertion failed (feature `check-locking`).
    #[error("access requires a {0} lock")]
    LockDiscipline(&'static str),
}
