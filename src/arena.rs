//! In-segment allocator with a persistent name table.
//!
//! Header layout at offset 0 (LE):
//! ```text
//! [magic 8 = "SBSEG001"]
//! [format_version u32]
//! [header_crc u32]      -- crc32 over (magic, format_version, seg_size)
//! [seg_size u64]        -- recorded logical size; equals the file size
//! [bump u64]            -- high-water mark of the bump region
//! [free_head u64]       -- head of the free list (0 = empty)
//! [name_count u32][pad u32]
//! [name table: 64 x { name[48], offset u64, size u64 }]
//! ```
//! Allocatable space starts at `ARENA_DATA_START`. Every internal address is
//! an offset from the segment base, so the image can be copied into an
//! anonymous region (`heap`/`locked` residency) and used unchanged.
//!
//! The arena performs raw in-place mutation behind `&self`: the store is
//! single-writer by contract and hands out no aliased references.

use std::mem;
use std::ptr;

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::consts::{
    ARENA_ALLOC_ALIGN, ARENA_DATA_START, ARENA_FORMAT_VERSION, ARENA_MAGIC, ARENA_NAME_LEN,
    ARENA_NAME_MAX,
};
use crate::util::align_up;

const NAME_TABLE_OFF: u64 = 48;
const NAME_ENTRY_SIZE: u64 = (ARENA_NAME_LEN + 16) as u64;

/// Smallest allocatable block; also the size of a free-list node.
const MIN_BLOCK: u64 = 16;

#[repr(C)]
#[derive(Clone, Copy)]
struct HeaderFixed {
    magic: [u8; 8],
    format_version: u32,
    header_crc: u32,
    seg_size: u64,
    bump: u64,
    free_head: u64,
    name_count: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct NameEntry {
    name: [u8; ARENA_NAME_LEN],
    offset: u64,
    size: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FreeBlock {
    size: u64,
    next: u64,
}

/// View over the raw segment range.
pub struct Arena {
    base: *mut u8,
    len: usize,
    writable: bool,
}

impl Arena {
    /// # Safety
    ///
    /// `base..base + len` must stay valid and exclusively owned by this
    /// store for the lifetime of the arena and every handle derived from it.
    pub(crate) unsafe fn from_raw(base: *mut u8, len: usize, writable: bool) -> Self {
        debug_assert!(len as u64 >= ARENA_DATA_START);
        Self { base, len, writable }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    // ---------------- raw access ----------------

    /// Raw pointer to `off`. The offset must lie inside the segment.
    #[inline]
    pub(crate) unsafe fn at<T>(&self, off: u64) -> *mut T {
        debug_assert!(off as usize + mem::size_of::<T>() <= self.len);
        self.base.add(off as usize) as *mut T
    }

    /// Copy a value out of the segment.
    #[inline]
    pub(crate) fn read_obj<T: Copy>(&self, off: u64) -> T {
        unsafe { ptr::read(self.at::<T>(off)) }
    }

    /// Copy a value into the segment.
    #[inline]
    pub(crate) fn write_obj<T: Copy>(&self, off: u64, v: T) {
        debug_assert!(self.writable);
        unsafe { ptr::write(self.at::<T>(off), v) }
    }

    #[inline]
    fn header(&self) -> HeaderFixed {
        self.read_obj::<HeaderFixed>(0)
    }

    #[inline]
    fn set_header(&self, h: HeaderFixed) {
        self.write_obj(0, h);
    }

    pub(crate) fn seg_size(&self) -> u64 {
        self.header().seg_size
    }

    // ---------------- format / validate / grow ----------------

    /// Write a fresh header over a zeroed segment.
    pub(crate) fn format(&self, seg_size: u64) -> Result<()> {
        if !self.writable {
            return Err(anyhow!("cannot format a read-only segment"));
        }
        unsafe {
            ptr::write_bytes(self.base, 0, ARENA_DATA_START as usize);
        }
        self.set_header(HeaderFixed {
            magic: *ARENA_MAGIC,
            format_version: ARENA_FORMAT_VERSION,
            header_crc: header_crc(ARENA_FORMAT_VERSION, seg_size),
            seg_size,
            bump: ARENA_DATA_START,
            free_head: 0,
            name_count: 0,
            _pad: 0,
        });
        Ok(())
    }

    /// Validate the mapped header against the mapped length.
    pub(crate) fn validate(&self) -> Result<()> {
        let h = self.header();
        if h.magic != *ARENA_MAGIC {
            return Err(anyhow!("not a statebase segment (bad magic)"));
        }
        if h.format_version != ARENA_FORMAT_VERSION {
            return Err(anyhow!(
                "unsupported segment format version {} (expected {})",
                h.format_version,
                ARENA_FORMAT_VERSION
            ));
        }
        if h.header_crc != header_crc(h.format_version, h.seg_size) {
            return Err(anyhow!("segment header checksum mismatch"));
        }
        if h.seg_size > self.len as u64 {
            return Err(anyhow!(
                "recorded segment size {} exceeds mapped size {}",
                h.seg_size,
                self.len
            ));
        }
        if h.bump < ARENA_DATA_START || h.bump > h.seg_size {
            return Err(anyhow!("segment allocator state is corrupt"));
        }
        Ok(())
    }

    /// Record an in-place growth of the underlying file.
    pub(crate) fn grow_to(&self, new_size: u64) {
        debug_assert!(self.writable);
        let mut h = self.header();
        debug_assert!(new_size >= h.seg_size);
        h.seg_size = new_size;
        h.header_crc = header_crc(h.format_version, new_size);
        self.set_header(h);
    }

    // ---------------- name table ----------------

    fn name_entry_off(i: usize) -> u64 {
        NAME_TABLE_OFF + i as u64 * NAME_ENTRY_SIZE
    }

    fn padded_name(name: &str) -> Result<[u8; ARENA_NAME_LEN]> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > ARENA_NAME_LEN {
            return Err(anyhow!(
                "object name '{}' must be 1..={} bytes",
                name,
                ARENA_NAME_LEN
            ));
        }
        let mut out = [0u8; ARENA_NAME_LEN];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(out)
    }

    /// Look up a named object; returns `(offset, size)`.
    pub fn find(&self, name: &str) -> Option<(u64, u64)> {
        let padded = Self::padded_name(name).ok()?;
        let count = self.header().name_count as usize;
        for i in 0..count.min(ARENA_NAME_MAX) {
            let e = self.read_obj::<NameEntry>(Self::name_entry_off(i));
            if e.name == padded {
                return Some((e.offset, e.size));
            }
        }
        None
    }

    /// Find a named object or allocate and initialize a new one.
    ///
    /// `init` receives a pointer to the freshly allocated (uninitialized)
    /// bytes and must fully initialize them.
    pub fn find_or_construct(
        &self,
        name: &str,
        size: u64,
        init: impl FnOnce(*mut u8),
    ) -> Result<u64> {
        if let Some((off, found_size)) = self.find(name) {
            if found_size != size {
                return Err(anyhow!(
                    "named object '{}' has size {} (expected {})",
                    name,
                    found_size,
                    size
                ));
            }
            return Ok(off);
        }
        if !self.writable {
            return Err(anyhow!(
                "cannot construct '{}' in a read-only segment",
                name
            ));
        }
        let padded = Self::padded_name(name)?;
        let mut h = self.header();
        if h.name_count as usize >= ARENA_NAME_MAX {
            return Err(anyhow!("segment name table is full"));
        }
        let off = self.alloc(size)?;
        init(unsafe { self.at::<u8>(off) });

        // alloc() rewrote the header; reload before appending the entry.
        h = self.header();
        self.write_obj(
            Self::name_entry_off(h.name_count as usize),
            NameEntry {
                name: padded,
                offset: off,
                size,
            },
        );
        h.name_count += 1;
        self.set_header(h);
        Ok(off)
    }

    // ---------------- alloc / dealloc ----------------

    /// Allocate `size` bytes; returns the offset. Blocks are aligned to
    /// `ARENA_ALLOC_ALIGN` and recycled through a first-fit free list.
    pub fn alloc(&self, size: u64) -> Result<u64> {
        if !self.writable {
            return Err(anyhow!("cannot allocate in a read-only segment"));
        }
        let need = align_up(size.max(MIN_BLOCK), ARENA_ALLOC_ALIGN);
        let mut h = self.header();

        // First fit over the free list.
        let mut prev = 0u64;
        let mut cur = h.free_head;
        while cur != 0 {
            let block = self.read_obj::<FreeBlock>(cur);
            if block.size >= need {
                let replacement = if block.size - need >= MIN_BLOCK {
                    // Split: the remainder stays on the list.
                    let rem = cur + need;
                    self.write_obj(
                        rem,
                        FreeBlock {
                            size: block.size - need,
                            next: block.next,
                        },
                    );
                    rem
                } else {
                    block.next
                };
                if prev == 0 {
                    h.free_head = replacement;
                    self.set_header(h);
                } else {
                    let mut p = self.read_obj::<FreeBlock>(prev);
                    p.next = replacement;
                    self.write_obj(prev, p);
                }
                return Ok(cur);
            }
            prev = cur;
            cur = block.next;
        }

        // Bump region.
        if h.bump + need > h.seg_size {
            return Err(anyhow!(
                "shared segment exhausted ({} bytes requested, {} free)",
                need,
                h.seg_size - h.bump
            ));
        }
        let off = h.bump;
        h.bump += need;
        self.set_header(h);
        Ok(off)
    }

    /// Return a block to the free list. `size` must match the `alloc` call.
    pub fn dealloc(&self, off: u64, size: u64) {
        debug_assert!(self.writable);
        debug_assert!(off >= ARENA_DATA_START);
        let need = align_up(size.max(MIN_BLOCK), ARENA_ALLOC_ALIGN);
        let mut h = self.header();
        self.write_obj(
            off,
            FreeBlock {
                size: need,
                next: h.free_head,
            },
        );
        h.free_head = off;
        self.set_header(h);
    }
}

/// Checksum over the static header prefix.
fn header_crc(format_version: u32, seg_size: u64) -> u32 {
    let mut buf = [0u8; 20];
    buf[..8].copy_from_slice(ARENA_MAGIC);
    LittleEndian::write_u32(&mut buf[8..12], format_version);
    LittleEndian::write_u64(&mut buf[12..20], seg_size);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    hasher.finalize()
}

/// Validate the fixed header prefix straight from the file, before mapping.
///
/// Returns the recorded logical size.
pub(crate) fn read_raw_header(mut f: &std::fs::File) -> Result<u64> {
    use std::io::{Seek, SeekFrom};

    f.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    std::io::Read::read_exact(&mut f, &mut magic)?;
    if magic != *ARENA_MAGIC {
        return Err(anyhow!("not a statebase segment (bad magic)"));
    }
    let format_version = f.read_u32::<LittleEndian>()?;
    let crc = f.read_u32::<LittleEndian>()?;
    let seg_size = f.read_u64::<LittleEndian>()?;
    if format_version != ARENA_FORMAT_VERSION {
        return Err(anyhow!(
            "unsupported segment format version {} (expected {})",
            format_version,
            ARENA_FORMAT_VERSION
        ));
    }
    if crc != header_crc(format_version, seg_size) {
        return Err(anyhow!("segment header checksum mismatch"));
    }
    Ok(seg_size)
}
