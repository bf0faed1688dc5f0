//! Contracts between the database and its typed indices.

use std::any::{Any, TypeId};

use anyhow::Result;

/// A plain-old-data value that can live inside the shared segment.
///
/// # Safety
///
/// Implementors must be fully inline data: no pointers, references, heap
/// handles or interior mutability, and an alignment of at most 16. The
/// bytes are persisted verbatim and revived by a later process, possibly at
/// a different base address.
pub unsafe trait SegmentObject: Copy + 'static {
    /// Stable name of the index holding this type; also names the index
    /// header inside the segment, so it must not change across builds.
    const TYPE_NAME: &'static str;

    /// Primary key, unique within the index.
    fn key(&self) -> u64;
}

/// Database-facing surface of one registered index.
///
/// Database-level operations fan out to these methods in registration
/// order; the order is part of the observable contract.
pub trait AbstractIndex {
    /// Discard the top undo frame, reverting to the snapshot it captured.
    fn undo(&self) -> Result<()>;

    /// Merge the top two undo frames into one.
    fn squash(&self) -> Result<()>;

    /// Drop all undo frames with revision <= `revision`.
    fn commit(&self, revision: i64) -> Result<()>;

    /// Discard every undo frame.
    fn undo_all(&self) -> Result<()>;

    /// Push a new undo frame (if `enabled`) and return its scoped handle.
    fn start_undo_session<'a>(&'a self, enabled: bool) -> Result<Box<dyn AbstractSession + 'a>>;

    fn value_type(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// One per-index undo frame. Scoped: dropping the handle without an
/// explicit `push` rolls the frame back.
pub trait AbstractSession {
    /// Keep the frame; it becomes the responsibility of the undo stack.
    fn push(&mut self);

    /// Merge the frame into its parent.
    fn squash(&mut self) -> Result<()>;

    /// Roll the frame back now instead of at drop.
    fn undo(&mut self) -> Result<()>;
}
