//! Hugepage-backed regions for `locked` residency (Linux only).
//!
//! Candidate mounts are stat'ed, rejected unless they identify as
//! hugetlbfs, then tried in decreasing page-size order; the first whose
//! page size evenly divides the segment size wins. Among mounts exposing
//! the same page size, the last one listed wins. The backing file is
//! unlinked immediately after mapping; the mapping keeps it alive.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use memmap2::{MmapMut, MmapOptions};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::consts::SEGMENT_FILE_MODE;
use crate::errors::StoreError;

// linux/magic.h
const HUGETLBFS_MAGIC: i64 = 0x958458f6;

/// Map an anonymous-equivalent region of `size` bytes on one of the given
/// hugetlbfs mounts. Returns `None` when no candidate fits; the caller
/// falls back to ordinary anonymous pages.
pub(crate) fn map_huge_region(paths: &[PathBuf], size: u64) -> Result<Option<MmapMut>> {
    let mut by_page_size: BTreeMap<u64, &PathBuf> = BTreeMap::new();
    for p in paths {
        let page_size = hugetlbfs_page_size(p)?;
        by_page_size.insert(page_size, p);
    }

    for (page_size, path) in by_page_size.iter().rev() {
        if size % page_size != 0 {
            continue;
        }
        let backing = unique_backing_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&backing)
            .with_context(|| format!("could not open hugepage file in {}", path.display()))?;
        fs::set_permissions(&backing, fs::Permissions::from_mode(SEGMENT_FILE_MODE))?;
        file.set_len(size)
            .context("failed to grow hugepage file to the segment size")?;
        let map = unsafe { MmapOptions::new().map_mut(&file) }
            .with_context(|| format!("could not map hugepage file in {}", path.display()))?;
        // The mapping keeps the inode alive; drop the directory entry now.
        let _ = fs::remove_file(&backing);
        info!(
            "database using {}-byte pages from {}",
            page_size,
            path.display()
        );
        return Ok(Some(map));
    }

    warn!("no hugepage mount fits the segment size; not using hugepages");
    Ok(None)
}

/// Native page size of a hugetlbfs mount; errors for anything else.
fn hugetlbfs_page_size(path: &Path) -> Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("could not statfs() path {}", path.display()))?;
    let mut fs_info: libc::statfs = unsafe { mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut fs_info) };
    if rc != 0 {
        return Err(StoreError::Io(std::io::Error::last_os_error()))
            .with_context(|| format!("could not statfs() path {}", path.display()));
    }
    if fs_info.f_type as i64 != HUGETLBFS_MAGIC {
        return Err(StoreError::HugepageMount {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(fs_info.f_bsize as u64)
}

fn unique_backing_path(mount: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    mount.join(format!("statebase-{}-{}", std::process::id(), suffix))
}
