//! Bulk image copies between the data file and an anonymous region.

use std::time::{Duration, Instant};

use anyhow::Result;
use log::info;

use crate::consts::SIZE_QUANTUM;
use crate::errors::StoreError;
use crate::segment::signal::SignalGuard;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Copy the on-disk image into the freshly allocated region, one quantum at
/// a time, aborting promptly if SIGINT/SIGTERM/SIGPIPE arrives.
pub(crate) fn load_image(src: &[u8], dst: &mut [u8]) -> Result<()> {
    debug_assert_eq!(src.len(), dst.len());
    debug_assert_eq!(src.len() as u64 % SIZE_QUANTUM, 0);

    let guard = SignalGuard::install();
    info!(
        "preloading database image ({} MiB), this can take a moment",
        src.len() / (1024 * 1024)
    );

    let q = SIZE_QUANTUM as usize;
    let mut offset = 0usize;
    let mut last_report = Instant::now();
    while offset < src.len() {
        dst[offset..offset + q].copy_from_slice(&src[offset..offset + q]);
        offset += q;

        if guard.triggered() {
            return Err(StoreError::LoadAborted.into());
        }
        if last_report.elapsed() >= PROGRESS_INTERVAL {
            info!("  {}% complete", offset / (src.len() / 100).max(1));
            last_report = Instant::now();
        }
    }
    info!("preload complete");
    Ok(())
}

/// Write the in-memory image back over the data file.
///
/// Every chunk is written unconditionally: an in-place rewrite must
/// overwrite whatever the previous run left at that offset, so zeroed
/// regions cannot be skipped.
pub(crate) fn save_image(src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(src.len(), dst.len());

    info!(
        "writing database image ({} MiB), this can take a moment",
        src.len() / (1024 * 1024)
    );
    let q = SIZE_QUANTUM as usize;
    let mut offset = 0usize;
    let mut last_report = Instant::now();
    while offset < src.len() {
        dst[offset..offset + q].copy_from_slice(&src[offset..offset + q]);
        offset += q;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            info!("  {}% complete", offset / (src.len() / 100).max(1));
            last_report = Instant::now();
        }
    }
}
