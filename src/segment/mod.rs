//! segment — the mapped-file manager.
//!
//! - core.rs — `Segment` lifecycle: open/create/grow, dirty-flag protocol,
//!   residency selection, advisory write lock, shutdown write-back
//! - io.rs — quantum-chunked image copy loops (preload / write-back)
//! - hugepage.rs — hugetlbfs candidate selection for `locked` residency
//! - signal.rs — scoped SIGINT/SIGTERM/SIGPIPE observation during preload

pub mod core;
#[cfg(target_os = "linux")]
mod hugepage;
mod io;
mod signal;

pub use self::core::Segment;

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::MmapOptions;

use crate::arena::{self, Arena};
use crate::consts::{DIRTY_FLAG_NAME, SEGMENT_FILE};
use crate::errors::StoreError;

/// Read the dirty flag of a closed database without opening it.
pub fn read_dirty_flag(dir: &Path) -> Result<bool> {
    let path = dir.join(SEGMENT_FILE);
    let file = OpenOptions::new()
        .read(true)
        .open(&path)
        .with_context(|| format!("could not open {}", path.display()))?;
    arena::read_raw_header(&file)?;
    let map = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("could not map {}", path.display()))?;
    let view = unsafe { Arena::from_raw(map.as_ptr() as *mut u8, map.len(), false) };
    view.validate()?;
    match view.find(DIRTY_FLAG_NAME) {
        Some((off, _)) => Ok(view.read_obj::<u8>(off) != 0),
        None => Err(StoreError::MissingSentinel { name: "dirty flag" }.into()),
    }
}

/// Overwrite the dirty flag of a closed database.
///
/// Maintenance and test tooling only: the byte is written without taking
/// the advisory lock, so never call this while a writer has the
/// directory open.
pub fn set_dirty_flag(dir: &Path, dirty: bool) -> Result<()> {
    let path = dir.join(SEGMENT_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("could not open {}", path.display()))?;
    arena::read_raw_header(&file)?;
    let mut map = unsafe { MmapOptions::new().map_mut(&file) }
        .with_context(|| format!("could not map {}", path.display()))?;
    let view = unsafe { Arena::from_raw(map.as_mut_ptr(), map.len(), true) };
    view.validate()?;
    match view.find(DIRTY_FLAG_NAME) {
        Some((off, _)) => {
            view.write_obj::<u8>(off, dirty as u8);
            map.flush()
                .with_context(|| format!("could not sync {}", path.display()))?;
            Ok(())
        }
        None => Err(StoreError::MissingSentinel { name: "dirty flag" }.into()),
    }
}
