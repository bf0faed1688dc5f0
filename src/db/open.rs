//! db/open — opening a database (writer / read-only) with a config.

use std::mem;
use std::path::Path;
use std::ptr;

use anyhow::{Context, Result};

use crate::config::StoreConfig;
use crate::consts::ENVIRONMENT_NAME;
use crate::environment::{self, EnvironmentBlob};
use crate::errors::StoreError;
use crate::registry::IndexRegistry;
use crate::segment::Segment;

use super::core::Database;

impl Database {
    /// Open (or create) the database at `dir` for writing. The advisory
    /// write lock is held until the database is dropped.
    pub fn open(dir: &Path, cfg: StoreConfig) -> Result<Self> {
        Self::open_impl(dir, true, cfg)
    }

    /// Open an existing database at `dir` read-only. Multiple read-only
    /// openers of the same directory are permitted.
    pub fn open_read_only(dir: &Path, cfg: StoreConfig) -> Result<Self> {
        Self::open_impl(dir, false, cfg)
    }

    fn open_impl(dir: &Path, writable: bool, cfg: StoreConfig) -> Result<Self> {
        let segment = Segment::open(dir, writable, &cfg)
            .with_context(|| format!("could not open database at {}", dir.display()))?;

        check_environment(&segment, writable)?;

        Ok(Self {
            registry: IndexRegistry::default(),
            segment,
            read_only: !writable,
            #[cfg(feature = "check-locking")]
            locks: crate::db::locking::LockCounters::default(),
        })
    }
}

/// Validate the stored environment fingerprint against the host, creating
/// it when this open constructed the segment (or when a writable open finds
/// it missing). A mismatch is diagnosed field by field and never converted.
fn check_environment(segment: &Segment, writable: bool) -> Result<()> {
    let arena = segment.arena();
    let host = EnvironmentBlob::host();
    let size = mem::size_of::<EnvironmentBlob>() as u64;

    let existing = if segment.created() {
        None
    } else {
        arena.find(ENVIRONMENT_NAME)
    };

    match existing {
        Some((off, found_size)) => {
            if found_size != size {
                return Err(StoreError::EnvironmentMismatch.into());
            }
            let stored = arena.read_obj::<EnvironmentBlob>(off);
            if stored != host {
                environment::log_mismatch(&host, &stored);
                return Err(StoreError::EnvironmentMismatch.into());
            }
            Ok(())
        }
        None if segment.created() || writable => {
            arena
                .find_or_construct(ENVIRONMENT_NAME, size, |p| unsafe {
                    ptr::write(p as *mut EnvironmentBlob, host);
                })
                .context("could not record the environment fingerprint")?;
            Ok(())
        }
        None => Err(StoreError::MissingSentinel {
            name: "environment",
        }
        .into()),
    }
}
