//! Reference typed index: a segment-resident ordered collection with a
//! multi-level undo stack.
//!
//! Rows live in a key-sorted singly linked list; undo frames form a doubly
//! linked stack. Each frame records, per key, at most one of:
//! - `OLD`     — the pre-modification value,
//! - `CREATED` — the key was inserted in this frame,
//! - `REMOVED` — the removed value.
//!
//! All links are segment offsets, so the whole structure survives both a
//! process restart and a relocation of the image into an anonymous region.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::warn;

use crate::arena::Arena;
use crate::index::{AbstractIndex, AbstractSession, SegmentObject};

const ENTRY_OLD: u32 = 1;
const ENTRY_CREATED: u32 = 2;
const ENTRY_REMOVED: u32 = 3;

#[repr(C)]
#[derive(Clone, Copy)]
struct TableHeader {
    row_head: u64,
    frame_head: u64, // oldest frame
    frame_tail: u64, // newest frame
    row_count: u64,
    revision: i64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RowNode<T> {
    key: u64,
    next: u64,
    value: T,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FrameHeader {
    revision: i64,
    prev: u64,
    next: u64,
    entry_head: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UndoEntry<T> {
    kind: u32,
    _pad: u32,
    key: u64,
    next: u64,
    value: T,
}

/// Segment-resident index of `T`, registered once per database.
pub struct TableIndex<T: SegmentObject> {
    arena: Arc<Arena>,
    header_off: u64,
    _marker: PhantomData<fn() -> T>,
}

/// Borrowed handle to a registered index; cheap to copy and bounded by the
/// database lifetime.
pub struct Table<'db, T: SegmentObject> {
    pub(crate) inner: &'db TableIndex<T>,
}

impl<T: SegmentObject> Clone for Table<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SegmentObject> Copy for Table<'_, T> {}

impl<T: SegmentObject> std::fmt::Debug for Table<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").finish_non_exhaustive()
    }
}

impl<'db, T: SegmentObject> Table<'db, T> {
    pub fn get(&self, key: u64) -> Option<T> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.inner.get(key).is_some()
    }

    pub fn len(&self) -> u64 {
        self.inner.hdr().row_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, ascending.
    pub fn keys(&self) -> Vec<u64> {
        self.inner.keys()
    }

    /// All values, ascending by key.
    pub fn values(&self) -> Vec<T> {
        self.inner.values()
    }

    pub fn revision(&self) -> i64 {
        self.inner.hdr().revision
    }

    /// Number of live undo frames.
    pub fn undo_depth(&self) -> u64 {
        self.inner.undo_depth()
    }

    pub fn insert(&self, value: T) -> Result<()> {
        self.inner.insert(value)
    }

    pub fn modify(&self, key: u64, f: impl FnOnce(&mut T)) -> Result<()> {
        self.inner.modify(key, f)
    }

    pub fn remove(&self, key: u64) -> Result<()> {
        self.inner.remove(key)
    }
}

impl<T: SegmentObject> TableIndex<T> {
    /// Locate the index header or construct a fresh, empty one.
    pub(crate) fn open_or_create(arena: Arc<Arena>) -> Result<Self> {
        let size = mem::size_of::<TableHeader>() as u64;
        let header_off = arena.find_or_construct(T::TYPE_NAME, size, |p| unsafe {
            std::ptr::write(
                p as *mut TableHeader,
                TableHeader {
                    row_head: 0,
                    frame_head: 0,
                    frame_tail: 0,
                    row_count: 0,
                    revision: 0,
                },
            );
        })?;
        Ok(Self {
            arena,
            header_off,
            _marker: PhantomData,
        })
    }

    /// Locate an existing index header; `None` when absent.
    pub(crate) fn open_existing(arena: Arc<Arena>) -> Result<Option<Self>> {
        match arena.find(T::TYPE_NAME) {
            None => Ok(None),
            Some((off, size)) => {
                if size != mem::size_of::<TableHeader>() as u64 {
                    return Err(anyhow!(
                        "index header '{}' has unexpected size {}",
                        T::TYPE_NAME,
                        size
                    ));
                }
                Ok(Some(Self {
                    arena,
                    header_off: off,
                    _marker: PhantomData,
                }))
            }
        }
    }

    // ---------------- raw helpers ----------------

    #[inline]
    fn hdr(&self) -> TableHeader {
        self.arena.read_obj(self.header_off)
    }

    #[inline]
    fn set_hdr(&self, h: TableHeader) {
        self.arena.write_obj(self.header_off, h);
    }

    #[inline]
    fn row(&self, off: u64) -> RowNode<T> {
        self.arena.read_obj(off)
    }

    #[inline]
    fn set_row(&self, off: u64, r: RowNode<T>) {
        self.arena.write_obj(off, r);
    }

    #[inline]
    fn frame(&self, off: u64) -> FrameHeader {
        self.arena.read_obj(off)
    }

    #[inline]
    fn set_frame(&self, off: u64, f: FrameHeader) {
        self.arena.write_obj(off, f);
    }

    #[inline]
    fn entry(&self, off: u64) -> UndoEntry<T> {
        self.arena.read_obj(off)
    }

    #[inline]
    fn set_entry(&self, off: u64, e: UndoEntry<T>) {
        self.arena.write_obj(off, e);
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.arena.writable() {
            return Err(anyhow!("index {}: database is read-only", T::TYPE_NAME));
        }
        Ok(())
    }

    // ---------------- rows ----------------

    /// Walk the sorted row list. Returns the last node with a smaller key
    /// and, when present, the node holding `key`.
    fn find_row(&self, key: u64) -> (u64, Option<u64>) {
        let mut prev = 0u64;
        let mut cur = self.hdr().row_head;
        while cur != 0 {
            let r = self.row(cur);
            if r.key == key {
                return (prev, Some(cur));
            }
            if r.key > key {
                return (prev, None);
            }
            prev = cur;
            cur = r.next;
        }
        (prev, None)
    }

    fn insert_row(&self, value: T) -> Result<u64> {
        let key = value.key();
        let (prev, found) = self.find_row(key);
        if found.is_some() {
            return Err(anyhow!("duplicate key {} in index {}", key, T::TYPE_NAME));
        }
        let off = self.arena.alloc(mem::size_of::<RowNode<T>>() as u64)?;
        let next = if prev == 0 {
            self.hdr().row_head
        } else {
            self.row(prev).next
        };
        self.set_row(off, RowNode { key, next, value });
        if prev == 0 {
            let mut h = self.hdr();
            h.row_head = off;
            h.row_count += 1;
            self.set_hdr(h);
        } else {
            let mut p = self.row(prev);
            p.next = off;
            self.set_row(prev, p);
            let mut h = self.hdr();
            h.row_count += 1;
            self.set_hdr(h);
        }
        Ok(off)
    }

    fn unlink_row(&self, prev: u64, off: u64) {
        let next = self.row(off).next;
        if prev == 0 {
            let mut h = self.hdr();
            h.row_head = next;
            h.row_count -= 1;
            self.set_hdr(h);
        } else {
            let mut p = self.row(prev);
            p.next = next;
            self.set_row(prev, p);
            let mut h = self.hdr();
            h.row_count -= 1;
            self.set_hdr(h);
        }
        self.arena.dealloc(off, mem::size_of::<RowNode<T>>() as u64);
    }

    fn get(&self, key: u64) -> Option<T> {
        let (_, found) = self.find_row(key);
        found.map(|off| self.row(off).value)
    }

    fn keys(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.hdr().row_count as usize);
        let mut cur = self.hdr().row_head;
        while cur != 0 {
            let r = self.row(cur);
            out.push(r.key);
            cur = r.next;
        }
        out
    }

    fn values(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.hdr().row_count as usize);
        let mut cur = self.hdr().row_head;
        while cur != 0 {
            let r = self.row(cur);
            out.push(r.value);
            cur = r.next;
        }
        out
    }

    // ---------------- undo bookkeeping ----------------

    fn find_entry_in(&self, entry_head: u64, key: u64, kind: u32) -> Option<(u64, u64)> {
        let mut prev = 0u64;
        let mut cur = entry_head;
        while cur != 0 {
            let e = self.entry(cur);
            if e.key == key && e.kind == kind {
                return Some((prev, cur));
            }
            prev = cur;
            cur = e.next;
        }
        None
    }

    fn push_entry(&self, frame_off: u64, kind: u32, key: u64, value: T) -> Result<()> {
        let off = self.arena.alloc(mem::size_of::<UndoEntry<T>>() as u64)?;
        let mut f = self.frame(frame_off);
        self.set_entry(
            off,
            UndoEntry {
                kind,
                _pad: 0,
                key,
                next: f.entry_head,
                value,
            },
        );
        f.entry_head = off;
        self.set_frame(frame_off, f);
        Ok(())
    }

    /// Unlink `off` from a frame entry list and free it.
    fn drop_entry(&self, frame_off: u64, prev: u64, off: u64) {
        let next = self.entry(off).next;
        if prev == 0 {
            let mut f = self.frame(frame_off);
            f.entry_head = next;
            self.set_frame(frame_off, f);
        } else {
            let mut p = self.entry(prev);
            p.next = next;
            self.set_entry(prev, p);
        }
        self.arena.dealloc(off, mem::size_of::<UndoEntry<T>>() as u64);
    }

    fn free_entries(&self, frame_off: u64) {
        let mut cur = self.frame(frame_off).entry_head;
        while cur != 0 {
            let next = self.entry(cur).next;
            self.arena.dealloc(cur, mem::size_of::<UndoEntry<T>>() as u64);
            cur = next;
        }
        let mut f = self.frame(frame_off);
        f.entry_head = 0;
        self.set_frame(frame_off, f);
    }

    fn record_on_create(&self, key: u64, value: T) -> Result<()> {
        let h = self.hdr();
        if h.frame_tail == 0 {
            return Ok(());
        }
        self.push_entry(h.frame_tail, ENTRY_CREATED, key, value)
    }

    fn record_on_modify(&self, key: u64, old: T) -> Result<()> {
        let h = self.hdr();
        if h.frame_tail == 0 {
            return Ok(());
        }
        let head = self.frame(h.frame_tail).entry_head;
        if self.find_entry_in(head, key, ENTRY_CREATED).is_some()
            || self.find_entry_in(head, key, ENTRY_OLD).is_some()
        {
            return Ok(());
        }
        self.push_entry(h.frame_tail, ENTRY_OLD, key, old)
    }

    fn record_on_remove(&self, key: u64, current: T) -> Result<()> {
        let h = self.hdr();
        if h.frame_tail == 0 {
            return Ok(());
        }
        let frame_off = h.frame_tail;
        let head = self.frame(frame_off).entry_head;
        // Created in this frame: the removal cancels the creation.
        if let Some((prev, off)) = self.find_entry_in(head, key, ENTRY_CREATED) {
            self.drop_entry(frame_off, prev, off);
            return Ok(());
        }
        // Modified in this frame: the recorded pre-image becomes the
        // removed value.
        if let Some((_, off)) = self.find_entry_in(head, key, ENTRY_OLD) {
            let mut e = self.entry(off);
            e.kind = ENTRY_REMOVED;
            self.set_entry(off, e);
            return Ok(());
        }
        self.push_entry(frame_off, ENTRY_REMOVED, key, current)
    }

    // ---------------- mutations ----------------

    fn insert(&self, value: T) -> Result<()> {
        self.ensure_writable()?;
        let key = value.key();
        self.insert_row(value)?;
        if let Err(e) = self.record_on_create(key, value) {
            let (prev, found) = self.find_row(key);
            if let Some(off) = found {
                self.unlink_row(prev, off);
            }
            return Err(e);
        }
        Ok(())
    }

    fn modify(&self, key: u64, f: impl FnOnce(&mut T)) -> Result<()> {
        self.ensure_writable()?;
        let (_, found) = self.find_row(key);
        let off = found.ok_or_else(|| anyhow!("no key {} in index {}", key, T::TYPE_NAME))?;
        let mut node = self.row(off);
        let old = node.value;
        let mut new_value = old;
        f(&mut new_value);
        if new_value.key() != key {
            return Err(anyhow!(
                "modify must not change the key ({} -> {}) in index {}",
                key,
                new_value.key(),
                T::TYPE_NAME
            ));
        }
        self.record_on_modify(key, old)?;
        node.value = new_value;
        self.set_row(off, node);
        Ok(())
    }

    fn remove(&self, key: u64) -> Result<()> {
        self.ensure_writable()?;
        let (prev, found) = self.find_row(key);
        let off = found.ok_or_else(|| anyhow!("no key {} in index {}", key, T::TYPE_NAME))?;
        let value = self.row(off).value;
        self.record_on_remove(key, value)?;
        self.unlink_row(prev, off);
        Ok(())
    }

    // ---------------- undo stack ----------------

    fn undo_depth(&self) -> u64 {
        let mut n = 0;
        let mut cur = self.hdr().frame_head;
        while cur != 0 {
            n += 1;
            cur = self.frame(cur).next;
        }
        n
    }

    fn begin_frame(&self) -> Result<()> {
        self.ensure_writable()?;
        let mut h = self.hdr();
        let off = self.arena.alloc(mem::size_of::<FrameHeader>() as u64)?;
        h.revision += 1;
        self.set_frame(
            off,
            FrameHeader {
                revision: h.revision,
                prev: h.frame_tail,
                next: 0,
                entry_head: 0,
            },
        );
        if h.frame_tail != 0 {
            let mut t = self.frame(h.frame_tail);
            t.next = off;
            self.set_frame(h.frame_tail, t);
        }
        if h.frame_head == 0 {
            h.frame_head = off;
        }
        h.frame_tail = off;
        self.set_hdr(h);
        Ok(())
    }

    fn undo_frame(&self) -> Result<()> {
        self.ensure_writable()?;
        let h = self.hdr();
        if h.frame_tail == 0 {
            return Ok(());
        }
        let frame_off = h.frame_tail;
        let f = self.frame(frame_off);

        // Restore pre-images, then drop creations, then revive removals.
        // The order matters once a squash has merged a removal and a
        // re-creation of the same key into one frame.
        for kind in [ENTRY_OLD, ENTRY_CREATED, ENTRY_REMOVED] {
            let mut cur = f.entry_head;
            while cur != 0 {
                let e = self.entry(cur);
                if e.kind == kind {
                    match kind {
                        ENTRY_OLD => {
                            let (_, found) = self.find_row(e.key);
                            match found {
                                Some(off) => {
                                    let mut node = self.row(off);
                                    node.value = e.value;
                                    self.set_row(off, node);
                                }
                                None => warn!(
                                    "undo of {}: key {} to restore is missing",
                                    T::TYPE_NAME,
                                    e.key
                                ),
                            }
                        }
                        ENTRY_CREATED => {
                            let (prev, found) = self.find_row(e.key);
                            match found {
                                Some(off) => self.unlink_row(prev, off),
                                None => warn!(
                                    "undo of {}: created key {} is missing",
                                    T::TYPE_NAME,
                                    e.key
                                ),
                            }
                        }
                        _ => {
                            if let Err(err) = self.insert_row(e.value) {
                                warn!("undo of {}: {:#}", T::TYPE_NAME, err);
                            }
                        }
                    }
                }
                cur = e.next;
            }
        }

        self.free_entries(frame_off);
        let mut h = self.hdr();
        h.frame_tail = f.prev;
        if f.prev != 0 {
            let mut p = self.frame(f.prev);
            p.next = 0;
            self.set_frame(f.prev, p);
        } else {
            h.frame_head = 0;
        }
        h.revision -= 1;
        self.set_hdr(h);
        self.arena.dealloc(frame_off, mem::size_of::<FrameHeader>() as u64);
        Ok(())
    }

    fn squash_frames(&self) -> Result<()> {
        self.ensure_writable()?;
        let h = self.hdr();
        if h.frame_tail == 0 {
            return Ok(());
        }
        let frame_off = h.frame_tail;
        let f = self.frame(frame_off);

        if f.prev == 0 {
            // Single frame: its changes become permanent.
            self.free_entries(frame_off);
            let mut h = self.hdr();
            h.frame_head = 0;
            h.frame_tail = 0;
            h.revision -= 1;
            self.set_hdr(h);
            self.arena.dealloc(frame_off, mem::size_of::<FrameHeader>() as u64);
            return Ok(());
        }

        let prev_off = f.prev;
        let mut offsets = Vec::new();
        let mut cur = f.entry_head;
        while cur != 0 {
            offsets.push(cur);
            cur = self.entry(cur).next;
        }
        // Merge oldest-first: a removal must pair against the parent's own
        // bookkeeping before a later re-creation of the same key is moved in.
        offsets.reverse();

        for off in offsets {
            let mut e = self.entry(off);
            let prev_head = self.frame(prev_off).entry_head;
            match e.kind {
                ENTRY_OLD => {
                    // The parent already knows this key's pre-image.
                    if self.find_entry_in(prev_head, e.key, ENTRY_CREATED).is_some()
                        || self.find_entry_in(prev_head, e.key, ENTRY_OLD).is_some()
                    {
                        self.arena.dealloc(off, mem::size_of::<UndoEntry<T>>() as u64);
                        continue;
                    }
                    e.next = prev_head;
                    self.set_entry(off, e);
                    let mut pf = self.frame(prev_off);
                    pf.entry_head = off;
                    self.set_frame(prev_off, pf);
                }
                ENTRY_CREATED => {
                    e.next = prev_head;
                    self.set_entry(off, e);
                    let mut pf = self.frame(prev_off);
                    pf.entry_head = off;
                    self.set_frame(prev_off, pf);
                }
                _ => {
                    // Removed here, created in the parent: both cancel.
                    if let Some((p, c)) =
                        self.find_entry_in(prev_head, e.key, ENTRY_CREATED)
                    {
                        self.drop_entry(prev_off, p, c);
                        self.arena.dealloc(off, mem::size_of::<UndoEntry<T>>() as u64);
                        continue;
                    }
                    // Modified in the parent: its pre-image is the value
                    // whose removal the merged frame must remember.
                    if let Some((_, c)) = self.find_entry_in(prev_head, e.key, ENTRY_OLD) {
                        let mut pe = self.entry(c);
                        pe.kind = ENTRY_REMOVED;
                        self.set_entry(c, pe);
                        self.arena.dealloc(off, mem::size_of::<UndoEntry<T>>() as u64);
                        continue;
                    }
                    e.next = prev_head;
                    self.set_entry(off, e);
                    let mut pf = self.frame(prev_off);
                    pf.entry_head = off;
                    self.set_frame(prev_off, pf);
                }
            }
        }

        let mut h = self.hdr();
        h.frame_tail = prev_off;
        let mut pf = self.frame(prev_off);
        pf.next = 0;
        self.set_frame(prev_off, pf);
        h.revision -= 1;
        self.set_hdr(h);
        self.arena.dealloc(frame_off, mem::size_of::<FrameHeader>() as u64);
        Ok(())
    }

    fn commit_through(&self, revision: i64) -> Result<()> {
        self.ensure_writable()?;
        loop {
            let h = self.hdr();
            let head = h.frame_head;
            if head == 0 {
                return Ok(());
            }
            let f = self.frame(head);
            if f.revision > revision {
                return Ok(());
            }
            self.free_entries(head);
            let mut h = self.hdr();
            h.frame_head = f.next;
            if f.next != 0 {
                let mut n = self.frame(f.next);
                n.prev = 0;
                self.set_frame(f.next, n);
            } else {
                h.frame_tail = 0;
            }
            self.set_hdr(h);
            self.arena.dealloc(head, mem::size_of::<FrameHeader>() as u64);
        }
    }
}

impl<T: SegmentObject> AbstractIndex for TableIndex<T> {
    fn undo(&self) -> Result<()> {
        self.undo_frame()
    }

    fn squash(&self) -> Result<()> {
        self.squash_frames()
    }

    fn commit(&self, revision: i64) -> Result<()> {
        self.commit_through(revision)
    }

    fn undo_all(&self) -> Result<()> {
        while self.hdr().frame_tail != 0 {
            self.undo_frame()?;
        }
        Ok(())
    }

    fn start_undo_session<'a>(&'a self, enabled: bool) -> Result<Box<dyn AbstractSession + 'a>> {
        if enabled {
            self.begin_frame()?;
        }
        Ok(Box::new(TableSession {
            index: self,
            applied: !enabled,
        }))
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TableSession<'a, T: SegmentObject> {
    index: &'a TableIndex<T>,
    applied: bool,
}

impl<T: SegmentObject> AbstractSession for TableSession<'_, T> {
    fn push(&mut self) {
        self.applied = true;
    }

    fn squash(&mut self) -> Result<()> {
        if self.applied {
            return Ok(());
        }
        self.applied = true;
        self.index.squash_frames()
    }

    fn undo(&mut self) -> Result<()> {
        if self.applied {
            return Ok(());
        }
        self.applied = true;
        self.index.undo_frame()
    }
}

impl<T: SegmentObject> Drop for TableSession<'_, T> {
    fn drop(&mut self) {
        if !self.applied {
            if let Err(e) = self.index.undo_frame() {
                warn!("session rollback failed for {}: {:#}", T::TYPE_NAME, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(C)]
    struct Account {
        id: u64,
        balance: i64,
    }

    unsafe impl SegmentObject for Account {
        const TYPE_NAME: &'static str = "accounts";

        fn key(&self) -> u64 {
            self.id
        }
    }

    const TEST_LEN: usize = 256 * 1024;

    fn test_arena(buf: &mut Vec<u128>) -> Arc<Arena> {
        buf.resize(TEST_LEN / 16, 0);
        let arena = unsafe { Arena::from_raw(buf.as_mut_ptr() as *mut u8, TEST_LEN, true) };
        arena.format(TEST_LEN as u64).unwrap();
        Arc::new(arena)
    }

    fn acct(id: u64, balance: i64) -> Account {
        Account { id, balance }
    }

    #[test]
    fn insert_get_remove_modify() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();

        t.insert(acct(2, 20)).unwrap();
        t.insert(acct(1, 10)).unwrap();
        t.insert(acct(3, 30)).unwrap();
        assert_eq!(t.keys(), vec![1, 2, 3]);
        assert!(t.insert(acct(2, 99)).is_err());

        t.modify(2, |a| a.balance = 25).unwrap();
        assert_eq!(t.get(2).unwrap().balance, 25);
        assert!(t.modify(2, |a| a.id = 7).is_err());
        assert!(t.modify(42, |_| ()).is_err());

        t.remove(2).unwrap();
        assert_eq!(t.keys(), vec![1, 3]);
        assert!(t.remove(2).is_err());
        assert_eq!(t.hdr().row_count, 2);
    }

    #[test]
    fn reopen_sees_the_same_rows() {
        let mut buf = Vec::new();
        let arena = test_arena(&mut buf);
        {
            let t = TableIndex::<Account>::open_or_create(arena.clone()).unwrap();
            t.insert(acct(7, 70)).unwrap();
        }
        let t = TableIndex::<Account>::open_existing(arena).unwrap().unwrap();
        assert_eq!(t.get(7).unwrap().balance, 70);
    }

    #[test]
    fn undo_reverts_create_modify_remove() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();
        t.insert(acct(1, 10)).unwrap();
        t.insert(acct(2, 20)).unwrap();

        t.begin_frame().unwrap();
        t.insert(acct(3, 30)).unwrap();
        t.modify(1, |a| a.balance = 11).unwrap();
        t.remove(2).unwrap();
        assert_eq!(t.keys(), vec![1, 3]);

        t.undo_frame().unwrap();
        assert_eq!(t.keys(), vec![1, 2]);
        assert_eq!(t.get(1).unwrap().balance, 10);
        assert_eq!(t.get(2).unwrap().balance, 20);
        assert_eq!(t.undo_depth(), 0);
    }

    #[test]
    fn remove_then_recreate_in_one_frame() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();
        t.insert(acct(1, 10)).unwrap();

        t.begin_frame().unwrap();
        t.remove(1).unwrap();
        t.insert(acct(1, 99)).unwrap();
        assert_eq!(t.get(1).unwrap().balance, 99);

        t.undo_frame().unwrap();
        assert_eq!(t.get(1).unwrap().balance, 10);
    }

    #[test]
    fn insert_then_remove_in_one_frame_leaves_nothing() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();

        t.begin_frame().unwrap();
        t.insert(acct(5, 50)).unwrap();
        t.remove(5).unwrap();
        t.undo_frame().unwrap();
        assert!(t.get(5).is_none());
        assert_eq!(t.hdr().row_count, 0);
    }

    #[test]
    fn squash_then_undo_reverts_both_levels() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();
        t.insert(acct(1, 10)).unwrap();

        t.begin_frame().unwrap();
        t.modify(1, |a| a.balance = 11).unwrap();
        t.insert(acct(2, 20)).unwrap();

        t.begin_frame().unwrap();
        t.modify(1, |a| a.balance = 12).unwrap();
        t.remove(2).unwrap();

        t.squash_frames().unwrap();
        assert_eq!(t.undo_depth(), 1);

        t.undo_frame().unwrap();
        assert_eq!(t.get(1).unwrap().balance, 10);
        assert!(t.get(2).is_none());
        assert_eq!(t.undo_depth(), 0);
    }

    #[test]
    fn squash_remove_then_recreate_keeps_the_original() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();
        t.insert(acct(1, 10)).unwrap();

        t.begin_frame().unwrap();
        t.begin_frame().unwrap();
        t.remove(1).unwrap();
        t.insert(acct(1, 99)).unwrap();
        t.squash_frames().unwrap();
        assert_eq!(t.get(1).unwrap().balance, 99);

        t.undo_frame().unwrap();
        assert_eq!(t.get(1).unwrap().balance, 10);
    }

    #[test]
    fn squash_single_frame_makes_changes_permanent() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();

        t.begin_frame().unwrap();
        t.insert(acct(1, 10)).unwrap();
        t.squash_frames().unwrap();
        assert_eq!(t.undo_depth(), 0);
        assert_eq!(t.get(1).unwrap().balance, 10);

        // Nothing left to undo.
        t.undo_frame().unwrap();
        assert_eq!(t.get(1).unwrap().balance, 10);
    }

    #[test]
    fn commit_drops_old_frames_only() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();

        for i in 1..=3u64 {
            t.begin_frame().unwrap();
            t.insert(acct(i, i as i64 * 10)).unwrap();
        }
        assert_eq!(t.undo_depth(), 3);
        assert_eq!(t.hdr().revision, 3);

        t.commit_through(2).unwrap();
        assert_eq!(t.undo_depth(), 1);
        // Committing an already-committed prefix is a no-op.
        t.commit_through(1).unwrap();
        assert_eq!(t.undo_depth(), 1);

        // The surviving frame still reverts its own changes.
        t.undo_frame().unwrap();
        assert_eq!(t.keys(), vec![1, 2]);
    }

    #[test]
    fn commit_r1_then_r2_equals_commit_r2() {
        let mut buf1 = Vec::new();
        let a = TableIndex::<Account>::open_or_create(test_arena(&mut buf1)).unwrap();
        let mut buf2 = Vec::new();
        let b = TableIndex::<Account>::open_or_create(test_arena(&mut buf2)).unwrap();

        for t in [&a, &b] {
            for i in 1..=4u64 {
                t.begin_frame().unwrap();
                t.insert(acct(i, 0)).unwrap();
            }
        }
        a.commit_through(1).unwrap();
        a.commit_through(3).unwrap();
        b.commit_through(3).unwrap();
        assert_eq!(a.undo_depth(), b.undo_depth());
        assert_eq!(a.keys(), b.keys());
    }

    #[test]
    fn undo_all_unwinds_every_frame() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();
        t.insert(acct(1, 10)).unwrap();

        for i in 2..=4u64 {
            t.begin_frame().unwrap();
            t.insert(acct(i, 0)).unwrap();
        }
        t.undo_all().unwrap();
        assert_eq!(t.keys(), vec![1]);
        assert_eq!(t.undo_depth(), 0);
    }

    #[test]
    fn session_drop_rolls_back_session_push_keeps() {
        let mut buf = Vec::new();
        let t = TableIndex::<Account>::open_or_create(test_arena(&mut buf)).unwrap();

        {
            let _s = t.start_undo_session(true).unwrap();
            t.insert(acct(1, 10)).unwrap();
        }
        assert!(t.get(1).is_none());

        {
            let mut s = t.start_undo_session(true).unwrap();
            t.insert(acct(1, 10)).unwrap();
            s.push();
        }
        assert!(t.get(1).is_some());
        assert_eq!(t.undo_depth(), 1);

        // Disabled sessions record nothing and never roll back.
        {
            let _s = t.start_undo_session(false).unwrap();
            t.insert(acct(2, 20)).unwrap();
        }
        assert!(t.get(2).is_some());
        assert_eq!(t.undo_depth(), 1);
    }
}
