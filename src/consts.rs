//! Shared constants of the segment format and on-disk layout.

// -------- On-disk layout --------

/// Data file inside the database directory.
pub const SEGMENT_FILE: &str = "shared_memory.bin";

/// Legacy sibling file; removed on every writable open.
pub const LEGACY_META_FILE: &str = "shared_memory.meta";

/// Alignment quantum Q. The segment size must be a multiple of this, and
/// preload/write-back move the image in chunks of this size. Chosen to match
/// the largest hugepage size expected to back the segment.
pub const SIZE_QUANTUM: u64 = 2 * 1024 * 1024;

/// Unix permission bits for a freshly created data file.
pub const SEGMENT_FILE_MODE: u32 = 0o664;

// -------- Named objects inside the segment --------

/// Name of the dirty-flag byte. The literal is stable across builds; foreign
/// readers of the image depend on it.
pub const DIRTY_FLAG_NAME: &str = "chainbase::db_dirty_flag";

/// Name of the environment fingerprint record.
pub const ENVIRONMENT_NAME: &str = "environment";

// -------- Arena (in-segment allocator) --------

pub const ARENA_MAGIC: &[u8; 8] = b"SBSEG001";
pub const ARENA_FORMAT_VERSION: u32 = 1;

/// Offset where allocatable space begins; the header and name table live
/// below this line.
pub const ARENA_DATA_START: u64 = 8192;

/// Capacity of the name table.
pub const ARENA_NAME_MAX: usize = 64;
/// Maximum length of a persisted object name, zero-padded in its slot.
pub const ARENA_NAME_LEN: usize = 48;

/// Granularity of arena allocations. Also the strictest alignment a
/// segment-resident value may require.
pub const ARENA_ALLOC_ALIGN: u64 = 16;
