// tests/open_close.rs
//
// Create / mutate / close / reopen round trip:
// - an orderly close clears the dirty flag;
// - the data file size is a quantum multiple and at least the request;
// - a read-only reopen sees the committed rows.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use statebase::consts::{SEGMENT_FILE, SIZE_QUANTUM};
use statebase::{read_dirty_flag, Database, SegmentObject, StoreConfig};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("sbtest-open-{prefix}-{pid}-{t}-{id}"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
struct Book {
    id: u64,
    pages: u64,
}

unsafe impl SegmentObject for Book {
    const TYPE_NAME: &'static str = "books";

    fn key(&self) -> u64 {
        self.id
    }
}

#[test]
fn create_mutate_close_reopen() -> Result<()> {
    let root = unique_root("roundtrip");
    let cfg = StoreConfig::default().with_size(64 * 1024 * 1024);

    {
        let mut db = Database::open(&root, cfg.clone())?;
        db.register_index::<Book>()?;

        // While the writer is open the image must be marked dirty.
        let session = db.start_undo_session(true)?;
        let books = db.index::<Book>()?;
        for id in 1..=3u64 {
            books.insert(Book {
                id,
                pages: id * 100,
            })?;
        }
        session.push();
        db.flush()?;
    }

    assert!(
        !read_dirty_flag(&root)?,
        "orderly close must clear the dirty flag"
    );

    let len = fs::metadata(root.join(SEGMENT_FILE))?.len();
    assert_eq!(len % SIZE_QUANTUM, 0);
    assert!(len >= 64 * 1024 * 1024);

    let mut db = Database::open_read_only(&root, cfg)?;
    db.register_index::<Book>()?;
    let books = db.index::<Book>()?;
    assert_eq!(books.keys(), vec![1, 2, 3]);
    assert_eq!(books.get(2).unwrap().pages, 200);
    assert_eq!(books.len(), 3);
    Ok(())
}

#[cfg(unix)]
#[test]
fn data_file_is_created_group_writable() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let root = unique_root("perms");
    {
        let _db = Database::open(&root, StoreConfig::default().with_size(SIZE_QUANTUM))?;
    }
    let mode = fs::metadata(root.join(SEGMENT_FILE))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o664);
    Ok(())
}

#[test]
fn grow_on_reopen_with_larger_request() -> Result<()> {
    let root = unique_root("grow");
    {
        let mut db = Database::open(&root, StoreConfig::default().with_size(SIZE_QUANTUM))?;
        db.register_index::<Book>()?;
        db.index::<Book>()?.insert(Book { id: 9, pages: 9 })?;
    }
    {
        let mut db =
            Database::open(&root, StoreConfig::default().with_size(4 * SIZE_QUANTUM))?;
        assert_eq!(db.segment_size(), 4 * SIZE_QUANTUM);
        db.register_index::<Book>()?;
        assert_eq!(db.index::<Book>()?.get(9).unwrap().pages, 9);
    }
    // A smaller request never shrinks the file.
    {
        let db = Database::open(&root, StoreConfig::default().with_size(SIZE_QUANTUM))?;
        assert_eq!(db.segment_size(), 4 * SIZE_QUANTUM);
    }
    Ok(())
}

#[test]
fn reregistration_is_idempotent() -> Result<()> {
    let root = unique_root("rereg");
    let mut db = Database::open(&root, StoreConfig::default().with_size(SIZE_QUANTUM))?;
    db.register_index::<Book>()?;
    db.index::<Book>()?.insert(Book { id: 1, pages: 1 })?;
    db.register_index::<Book>()?;
    assert_eq!(db.index::<Book>()?.len(), 1);
    Ok(())
}
