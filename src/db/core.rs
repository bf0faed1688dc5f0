//! db/core — the `Database` facade: typed index registration and the
//! composite session/undo protocol.

use std::any::TypeId;

use anyhow::{Context, Result};

use crate::errors::StoreError;
use crate::index::SegmentObject;
use crate::mode::ResidencyMode;
use crate::registry::IndexRegistry;
use crate::segment::Segment;
use crate::session::Session;
use crate::table::{Table, TableIndex};

pub struct Database {
    // Field order is load-bearing: the registry (and its references into
    // the segment) is dropped before the segment tears the mapping down.
    pub(crate) registry: IndexRegistry,
    pub(crate) segment: Segment,
    pub(crate) read_only: bool,
    #[cfg(feature = "check-locking")]
    pub(crate) locks: crate::db::locking::LockCounters,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Register the index for `T`, allocating its header in the segment on
    /// first registration. Idempotent; re-registration returns silently.
    ///
    /// Read-only databases never construct: an absent index yields
    /// [`StoreError::NotRegistered`].
    pub fn register_index<T: SegmentObject>(&mut self) -> Result<()> {
        if self.registry.get(TypeId::of::<T>()).is_some() {
            return Ok(());
        }
        let arena = self.segment.arena().clone();
        let index = if self.read_only {
            TableIndex::<T>::open_existing(arena)?
                .ok_or(StoreError::NotRegistered(T::TYPE_NAME))?
        } else {
            TableIndex::<T>::open_or_create(arena)
                .with_context(|| format!("could not register index {}", T::TYPE_NAME))?
        };
        self.registry.insert(Box::new(index));
        Ok(())
    }

    /// Handle to the registered index for `T`.
    pub fn index<T: SegmentObject>(&self) -> Result<Table<'_, T>> {
        self.require_read_lock("index")?;
        let idx = self
            .registry
            .get(TypeId::of::<T>())
            .ok_or(StoreError::NotRegistered(T::TYPE_NAME))?;
        let inner = idx
            .as_any()
            .downcast_ref::<TableIndex<T>>()
            .ok_or(StoreError::NotRegistered(T::TYPE_NAME))?;
        Ok(Table { inner })
    }

    /// Open one sub-session per registered index, in registration order,
    /// bundled into a composite that owns them exclusively.
    pub fn start_undo_session(&self, enabled: bool) -> Result<Session<'_>> {
        self.require_write_lock("start_undo_session")?;
        if !enabled {
            return Ok(Session::inert());
        }
        self.ensure_writable("start_undo_session")?;
        let mut subs = Vec::with_capacity(self.registry.len());
        for idx in self.registry.iter() {
            match idx.start_undo_session(true) {
                Ok(sub) => subs.push(sub),
                Err(e) => {
                    // Unwind the frames already opened, newest first.
                    while let Some(sub) = subs.pop() {
                        drop(sub);
                    }
                    return Err(e).with_context(|| {
                        format!("could not open a sub-session for index {}", idx.type_name())
                    });
                }
            }
        }
        Ok(Session::new(subs))
    }

    /// Discard the newest undo frame of every registered index.
    pub fn undo(&self) -> Result<()> {
        self.require_write_lock("undo")?;
        self.ensure_writable("undo")?;
        for idx in self.registry.iter() {
            idx.undo()?;
        }
        Ok(())
    }

    /// Merge the two newest undo frames of every registered index.
    pub fn squash(&self) -> Result<()> {
        self.require_write_lock("squash")?;
        self.ensure_writable("squash")?;
        for idx in self.registry.iter() {
            idx.squash()?;
        }
        Ok(())
    }

    /// Make every frame with revision <= `revision` permanent. The revision
    /// is caller-supplied and passed through unvalidated.
    pub fn commit(&self, revision: i64) -> Result<()> {
        self.require_write_lock("commit")?;
        self.ensure_writable("commit")?;
        for idx in self.registry.iter() {
            idx.commit(revision)?;
        }
        Ok(())
    }

    /// Discard every undo frame of every registered index.
    pub fn undo_all(&self) -> Result<()> {
        self.require_write_lock("undo_all")?;
        self.ensure_writable("undo_all")?;
        for idx in self.registry.iter() {
            idx.undo_all()?;
        }
        Ok(())
    }

    /// Force a full segment sync without clearing the dirty flag.
    pub fn flush(&self) -> Result<()> {
        self.ensure_writable("flush")?;
        self.segment.flush()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Size of the shared segment in bytes.
    #[inline]
    pub fn segment_size(&self) -> u64 {
        self.segment.size()
    }

    #[inline]
    pub fn residency(&self) -> ResidencyMode {
        self.segment.residency()
    }

    fn ensure_writable(&self, what: &str) -> Result<()> {
        if self.read_only {
            return Err(anyhow::anyhow!("database::{}: database is read-only", what));
        }
        Ok(())
    }

    #[cfg_attr(not(feature = "check-locking"), allow(unused_variables))]
    fn require_read_lock(&self, what: &str) -> Result<()> {
        #[cfg(feature = "check-locking")]
        self.locks.require_read(what)?;
        Ok(())
    }

    #[cfg_attr(not(feature = "check-locking"), allow(unused_variables))]
    fn require_write_lock(&self, what: &str) -> Result<()> {
        #[cfg(feature = "check-locking")]
        self.locks.require_write(what)?;
        Ok(())
    }
}

#[cfg(feature = "check-locking")]
impl Database {
    /// Turn the lock-usage assertions on or off at runtime.
    pub fn set_require_locking(&self, on: bool) {
        self.locks.set_enabled(on);
    }

    /// Declare a read section; index accesses are legal while it lives.
    pub fn read_lock(&self) -> crate::db::locking::ReadGuard<'_> {
        self.locks.acquire_read();
        crate::db::locking::ReadGuard {
            counters: &self.locks,
        }
    }

    /// Declare a write section; mutations are legal while it lives.
    pub fn write_lock(&self) -> crate::db::locking::WriteGuard<'_> {
        self.locks.acquire_write();
        crate::db::locking::WriteGuard {
            counters: &self.locks,
        }
    }
}
