// tests/environment.rs
//
// Fingerprint rejection: a segment produced under a different environment
// (any of the five fields) must be refused with EnvironmentMismatch, and a
// failed open must leave the file byte-identical.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use statebase::consts::{SEGMENT_FILE, SIZE_QUANTUM};
use statebase::{Database, EnvironmentBlob, StoreConfig, StoreError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("sbtest-env-{prefix}-{pid}-{t}-{id}"))
}

fn small_cfg() -> StoreConfig {
    StoreConfig::default().with_size(SIZE_QUANTUM)
}

/// Offset of the stored fingerprint inside the data file. The record sits
/// near the start of the allocation region; searching the first 64 KiB for
/// the host's 256-byte compiler identifier finds it without knowing the
/// allocator internals.
fn fingerprint_offset(bytes: &[u8]) -> usize {
    let needle = *EnvironmentBlob::host().compiler_version();
    let window = bytes.len().min(64 * 1024);
    bytes[..window]
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("stored fingerprint not found in the segment prefix")
}

// Byte offsets inside the fingerprint record.
const DEBUG_FLAG_OFF: usize = 256;
const APPLE_FLAG_OFF: usize = 257;
const WINDOWS_FLAG_OFF: usize = 258;
const AUX_VERSION_OFF: usize = 260;

fn tamper_and_expect_mismatch(field_off: usize) -> Result<()> {
    let root = unique_root("mismatch");
    {
        let _db = Database::open(&root, small_cfg())?;
    }
    let path = root.join(SEGMENT_FILE);
    let mut bytes = fs::read(&path)?;
    let pos = fingerprint_offset(&bytes);
    bytes[pos + field_off] ^= 0x5A;
    fs::write(&path, &bytes)?;
    let tampered = bytes;

    for writable in [true, false] {
        let err = if writable {
            Database::open(&root, small_cfg()).unwrap_err()
        } else {
            Database::open_read_only(&root, small_cfg()).unwrap_err()
        };
        assert!(
            matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::EnvironmentMismatch)
            ),
            "expected EnvironmentMismatch, got: {err:#}"
        );
    }

    // The rejected open must not have altered the image.
    assert_eq!(fs::read(&path)?, tampered);
    Ok(())
}

#[test]
fn foreign_aux_version_is_rejected() -> Result<()> {
    tamper_and_expect_mismatch(AUX_VERSION_OFF)
}

#[test]
fn foreign_debug_flag_is_rejected() -> Result<()> {
    tamper_and_expect_mismatch(DEBUG_FLAG_OFF)
}

#[test]
fn foreign_compiler_id_is_rejected() -> Result<()> {
    tamper_and_expect_mismatch(0)
}

#[test]
fn foreign_platform_flags_are_rejected() -> Result<()> {
    tamper_and_expect_mismatch(APPLE_FLAG_OFF)?;
    tamper_and_expect_mismatch(WINDOWS_FLAG_OFF)
}

#[test]
fn matching_fingerprint_reopens_cleanly() -> Result<()> {
    let root = unique_root("match");
    {
        let _db = Database::open(&root, small_cfg())?;
    }
    let _db = Database::open(&root, small_cfg())?;
    Ok(())
}
