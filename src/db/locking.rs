//! Lock-usage assertions, compiled in with the `check-locking` feature.
//!
//! The store takes no locks of its own; the host serializes mutations
//! against reads. These counters let a debug build assert that every index
//! access really happens under a declared guard.

use std::cell::Cell;

use anyhow::Result;
use log::error;

use crate::errors::StoreError;

#[derive(Default)]
pub(crate) struct LockCounters {
    enabled: Cell<bool>,
    read: Cell<u32>,
    write: Cell<u32>,
}

impl LockCounters {
    pub fn set_enabled(&self, on: bool) {
        self.enabled.set(on);
    }

    pub fn acquire_read(&self) {
        self.read.set(self.read.get() + 1);
    }

    pub fn release_read(&self) {
        self.read.set(self.read.get() - 1);
    }

    pub fn acquire_write(&self) {
        self.write.set(self.write.get() + 1);
    }

    pub fn release_write(&self) {
        self.write.set(self.write.get() - 1);
    }

    /// A read-side access: any guard satisfies it.
    pub fn require_read(&self, what: &str) -> Result<()> {
        if self.enabled.get() && self.read.get() == 0 && self.write.get() == 0 {
            error!("database::{} called without a read lock", what);
            return Err(StoreError::LockDiscipline("read").into());
        }
        Ok(())
    }

    /// A write-side access: only a write guard satisfies it.
    pub fn require_write(&self, what: &str) -> Result<()> {
        if self.enabled.get() && self.write.get() == 0 {
            error!("database::{} called without a write lock", what);
            return Err(StoreError::LockDiscipline("write").into());
        }
        Ok(())
    }
}

/// RAII read-guard declaration; see [`crate::Database::read_lock`].
pub struct ReadGuard<'db> {
    pub(crate) counters: &'db LockCounters,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.counters.release_read();
    }
}

/// RAII write-guard declaration; see [`crate::Database::write_lock`].
pub struct WriteGuard<'db> {
    pub(crate) counters: &'db LockCounters,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.counters.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertions_only_fire_when_enabled() {
        let c = LockCounters::default();
        assert!(c.require_read("get").is_ok());
        assert!(c.require_write("put").is_ok());

        c.set_enabled(true);
        assert!(c.require_read("get").is_err());
        assert!(c.require_write("put").is_err());
    }

    #[test]
    fn guards_satisfy_the_matching_assertion() {
        let c = LockCounters::default();
        c.set_enabled(true);

        c.acquire_read();
        assert!(c.require_read("get").is_ok());
        // A read guard is not enough for mutations.
        assert!(c.require_write("put").is_err());
        c.release_read();

        c.acquire_write();
        assert!(c.require_read("get").is_ok());
        assert!(c.require_write("put").is_ok());
        c.release_write();

        assert!(c.require_read("get").is_err());
    }
}
