//! statebase — an embedded, process-local, multi-version object store.
//!
//! A single memory-mapped data file (`shared_memory.bin`) holds typed,
//! indexed collections plus a stack of reversible write sessions, so a host
//! (typically a blockchain-style state machine) can tentatively apply
//! transactions and later commit or roll back to any earlier revision.
//!
//! One writer at a time, enforced by a non-blocking advisory file lock;
//! unsynchronized read-only openers are allowed. A persistent dirty flag
//! marks images a writer did not close cleanly.

pub mod arena;
pub mod config;
pub mod consts;
pub mod db; // src/db/{mod,core,open,locking}.rs
pub mod environment;
pub mod errors;
pub mod index;
pub mod mode;
pub(crate) mod registry;
pub mod segment; // src/segment/{mod,core,io,hugepage,signal}.rs
pub mod session;
pub mod table;
pub mod util;

pub use config::{StoreConfig, DEFAULT_SEGMENT_SIZE};
pub use db::Database;
pub use environment::EnvironmentBlob;
pub use errors::StoreError;
pub use index::{AbstractIndex, AbstractSession, SegmentObject};
pub use mode::ResidencyMode;
pub use segment::{read_dirty_flag, set_dirty_flag, Segment};
pub use session::Session;
pub use table::Table;
