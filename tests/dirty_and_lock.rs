// tests/dirty_and_lock.rs
//
// Dirty-flag protocol and writer exclusion:
// - a dirty image is rejected unless allow_dirty is passed;
// - a second writable open fails immediately with LockBusy;
// - size and existence preconditions map to the right errors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use statebase::consts::SIZE_QUANTUM;
use statebase::{
    read_dirty_flag, set_dirty_flag, Database, ResidencyMode, SegmentObject, StoreConfig,
    StoreError,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("sbtest-dirty-{prefix}-{pid}-{t}-{id}"))
}

#[derive(Clone, Copy)]
#[repr(C)]
struct Marker {
    id: u64,
}

unsafe impl SegmentObject for Marker {
    const TYPE_NAME: &'static str = "markers";

    fn key(&self) -> u64 {
        self.id
    }
}

fn small_cfg() -> StoreConfig {
    StoreConfig::default().with_size(SIZE_QUANTUM)
}

#[test]
fn size_must_be_a_quantum_multiple() {
    let root = unique_root("size");
    let err = Database::open(&root, StoreConfig::default().with_size(5_000_000)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::SizeInvalid { size: 5_000_000, .. })
    ));
}

#[test]
fn read_only_open_needs_an_existing_file() {
    let root = unique_root("missing");
    let err = Database::open_read_only(&root, small_cfg()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { .. })
    ));
}

#[test]
fn dirty_image_is_rejected_without_allow_dirty() -> Result<()> {
    let root = unique_root("flag");
    {
        let _db = Database::open(&root, small_cfg())?;
    }
    assert!(!read_dirty_flag(&root)?);

    // Simulate a writer that died mid-run.
    set_dirty_flag(&root, true)?;
    assert!(read_dirty_flag(&root)?);

    let err = Database::open(&root, small_cfg()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::DirtyDatabase)
    ));
    let err = Database::open_read_only(&root, small_cfg()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::DirtyDatabase)
    ));

    // allow_dirty opens it anyway, and the orderly close makes it clean.
    {
        let _db = Database::open(&root, small_cfg().with_allow_dirty(true))?;
    }
    assert!(!read_dirty_flag(&root)?);
    let _db = Database::open(&root, small_cfg())?;
    Ok(())
}

#[test]
fn dirty_flag_is_set_for_the_whole_writable_open() -> Result<()> {
    let root = unique_root("held");
    let db = Database::open(&root, small_cfg())?;

    // A concurrent reader refuses the image unless it allows dirty.
    let err = Database::open_read_only(&root, small_cfg()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::DirtyDatabase)
    ));
    let ro = Database::open_read_only(&root, small_cfg().with_allow_dirty(true))?;
    assert!(ro.is_read_only());
    drop(ro);
    drop(db);
    assert!(!read_dirty_flag(&root)?);
    Ok(())
}

#[test]
fn second_writer_is_rejected_immediately() -> Result<()> {
    let root = unique_root("excl");
    let db1 = Database::open(&root, small_cfg())?;

    let err = Database::open(&root, small_cfg().with_allow_dirty(true)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::LockBusy)
    ));

    drop(db1);
    let _db2 = Database::open(&root, small_cfg())?;
    Ok(())
}

#[test]
fn hugepage_paths_require_locked_residency() {
    let root = unique_root("huge");
    let cfg = small_cfg()
        .with_residency(ResidencyMode::Heap)
        .with_hugepage_paths(["/mnt/hugepages"]);
    let err = Database::open(&root, cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::UnsupportedPlatform(_))
    ));
}

#[test]
fn writer_ops_are_rejected_on_read_only_databases() -> Result<()> {
    let root = unique_root("ro");
    {
        let mut db = Database::open(&root, small_cfg())?;
        db.register_index::<Marker>()?;
    }
    let mut db = Database::open_read_only(&root, small_cfg())?;
    db.register_index::<Marker>()?;
    assert!(db.index::<Marker>()?.insert(Marker { id: 1 }).is_err());
    assert!(db.start_undo_session(true).is_err());
    assert!(db.flush().is_err());
    Ok(())
}
