//! segment/core — lifecycle of the shared-memory data file.
//!
//! Owns `<dir>/shared_memory.bin`: creation, in-place growth, validation,
//! residency selection, the dirty-flag protocol, the advisory write lock,
//! and the shutdown write-back for private images.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use log::{error, info, warn};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::arena::{self, Arena};
use crate::config::StoreConfig;
use crate::consts::{DIRTY_FLAG_NAME, LEGACY_META_FILE, SEGMENT_FILE, SIZE_QUANTUM};
use crate::errors::StoreError;
use crate::mode::ResidencyMode;
use crate::segment::io::{load_image, save_image};
use crate::util::align_down;

#[cfg(unix)]
use crate::consts::SEGMENT_FILE_MODE;

/// Page granularity used when flushing just the dirty-flag byte.
const FLAG_FLUSH_ALIGN: u64 = 4096;

/// The address range exposing the database image.
pub(crate) enum Image {
    FileRw(MmapMut),
    FileRo(Mmap),
    Anon(MmapMut),
}

impl Image {
    fn as_slice(&self) -> &[u8] {
        match self {
            Image::FileRw(m) => &m[..],
            Image::FileRo(m) => &m[..],
            Image::Anon(m) => &m[..],
        }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.as_slice().as_ptr() as *mut u8
    }
}

/// The mapped-file manager. One per open database.
pub struct Segment {
    data_path: PathBuf,
    file: File,
    writable: bool,
    residency: ResidencyMode,
    size: u64,
    image: Image,
    arena: Arc<Arena>,
    dirty_off: u64,
    created: bool,
}

impl Segment {
    pub(crate) fn open(dir: &Path, writable: bool, cfg: &StoreConfig) -> Result<Self> {
        if cfg.size % SIZE_QUANTUM != 0 {
            return Err(StoreError::SizeInvalid {
                size: cfg.size,
                quantum: SIZE_QUANTUM,
            }
            .into());
        }
        if !cfg.hugepage_paths.is_empty() {
            if !cfg!(target_os = "linux") {
                return Err(StoreError::UnsupportedPlatform(
                    "hugepage support is a linux-only feature".into(),
                )
                .into());
            }
            if cfg.residency != ResidencyMode::Locked {
                return Err(StoreError::UnsupportedPlatform(
                    "locked residency is required for hugepage usage".into(),
                )
                .into());
            }
        }
        if cfg.residency == ResidencyMode::Locked && !cfg!(unix) {
            return Err(StoreError::UnsupportedPlatform(
                "locked residency is not supported on this platform".into(),
            )
            .into());
        }

        fs::create_dir_all(dir)
            .with_context(|| format!("could not create database directory {}", dir.display()))?;
        let data_path = dir.join(SEGMENT_FILE);

        let exists = data_path.exists();
        if !writable && !exists {
            return Err(StoreError::NotFound { path: data_path }.into());
        }

        let mut created = false;
        let file = if exists {
            let f = OpenOptions::new()
                .read(true)
                .write(writable)
                .open(&data_path)
                .with_context(|| format!("could not open {}", data_path.display()))?;
            arena::read_raw_header(&f)
                .with_context(|| format!("invalid segment header in {}", data_path.display()))?;
            if writable {
                let existing = f.metadata()?.len();
                if cfg.size > existing {
                    f.set_len(cfg.size)
                        .context("could not grow database file to requested size")?;
                }
            }
            f
        } else {
            created = true;
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&data_path)
                .with_context(|| format!("could not create {}", data_path.display()))?;
            f.set_len(cfg.size)
                .context("could not size the new database file")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&data_path, fs::Permissions::from_mode(SEGMENT_FILE_MODE))?;
            }
            f
        };

        let size = file.metadata()?.len();
        if size % SIZE_QUANTUM != 0 {
            return Err(StoreError::SizeInvalid {
                size,
                quantum: SIZE_QUANTUM,
            }
            .into());
        }

        let mut file_image = if writable {
            Image::FileRw(
                unsafe { MmapOptions::new().map_mut(&file) }
                    .context("could not map the database file")?,
            )
        } else {
            Image::FileRo(
                unsafe { MmapOptions::new().map(&file) }
                    .context("could not map the database file")?,
            )
        };

        // The arena view over the file mapping; residency may re-base it
        // onto a private image below.
        let fm_arena = unsafe { Arena::from_raw(file_image.base_ptr(), size as usize, writable) };
        if created {
            fm_arena.format(size)?;
        } else {
            fm_arena
                .validate()
                .with_context(|| format!("invalid segment in {}", data_path.display()))?;
            if fm_arena.seg_size() < size {
                if writable {
                    fm_arena.grow_to(size);
                } else {
                    return Err(anyhow!(
                        "segment size mismatch in {}: header records {}, file is {}",
                        data_path.display(),
                        fm_arena.seg_size(),
                        size
                    ));
                }
            }
        }

        let dirty_off = if writable {
            fm_arena
                .find_or_construct(DIRTY_FLAG_NAME, 1, |p| unsafe { *p = 0 })
                .context("could not find dirty flag in shared memory")?
        } else {
            match fm_arena.find(DIRTY_FLAG_NAME) {
                Some((off, _)) => off,
                None => return Err(StoreError::MissingSentinel { name: "dirty flag" }.into()),
            }
        };
        if !cfg.allow_dirty && fm_arena.read_obj::<u8>(dirty_off) != 0 {
            return Err(StoreError::DirtyDatabase.into());
        }

        if writable {
            // Stale artifact from older layouts; never read, always removed.
            let _ = fs::remove_file(dir.join(LEGACY_META_FILE));

            file.try_lock_exclusive().map_err(|_| StoreError::LockBusy)?;

            fm_arena.write_obj::<u8>(dirty_off, 1);
            if let Image::FileRw(m) = &file_image {
                if let Err(e) = m.flush() {
                    warn!("failed to sync the dirty flag: {}", e);
                }
            }
        }

        // From here on, any failure must clear the dirty flag again before
        // propagating so a retry does not see a spurious dirty state.
        let image = if cfg.residency == ResidencyMode::Mapped {
            file_image
        } else {
            let loaded = preload_into_anon(cfg, size, file_image.as_slice());
            match loaded {
                Ok(region) => {
                    // Release the file mapping; only the handle is kept, to
                    // rewrite the file at shutdown.
                    drop(file_image);
                    Image::Anon(region)
                }
                Err(e) => {
                    if writable {
                        clear_dirty_after_failure(&mut file_image, dirty_off);
                    }
                    return Err(e);
                }
            }
        };

        let arena =
            Arc::new(unsafe { Arena::from_raw(image.base_ptr(), size as usize, writable) });

        Ok(Self {
            data_path,
            file,
            writable,
            residency: cfg.residency,
            size,
            image,
            arena,
            dirty_off,
            created,
        })
    }

    #[inline]
    pub(crate) fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Whether this open created the data file.
    #[inline]
    pub fn created(&self) -> bool {
        self.created
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn residency(&self) -> ResidencyMode {
        self.residency
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Force a full sync of the live mapping. Does not clear the dirty flag.
    pub fn flush(&self) -> Result<()> {
        match &self.image {
            Image::FileRw(m) => m.flush().context("failed to sync the database file"),
            // Nothing live to sync: read-only mappings carry no writes and
            // private images reach the file only at shutdown.
            Image::FileRo(_) | Image::Anon(_) => Ok(()),
        }
    }

    /// Rewrite the data file from the private image (heap/locked residency).
    fn save_back(&self) -> Result<()> {
        let mut dst = unsafe { MmapOptions::new().map_mut(&self.file) }
            .context("could not map the data file for write-back")?;
        save_image(self.image.as_slice(), &mut dst);
        dst.flush_async()
            .context("could not schedule the write-back sync")?;
        Ok(())
    }

    /// Publish the single clean byte to the on-disk file and sync it.
    fn finalize_on_disk(&self) -> Result<()> {
        let mut f = &self.file;
        f.seek(SeekFrom::Start(self.dirty_off))?;
        f.write_all(&[0])?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.writable {
            return;
        }
        if let Image::Anon(_) = &self.image {
            if let Err(e) = self.save_back() {
                error!(
                    "write-back of {} failed: {:#}",
                    self.data_path.display(),
                    e
                );
            }
        }
        // Mark the image clean only after the bulk rewrite, then publish
        // exactly that byte; reversing the order loses the guarantee.
        self.arena.write_obj::<u8>(self.dirty_off, 0);
        match &self.image {
            Image::FileRw(m) => {
                let start = align_down(self.dirty_off, FLAG_FLUSH_ALIGN) as usize;
                if let Err(e) = m.flush_range(start, FLAG_FLUSH_ALIGN as usize) {
                    error!("failed to sync the clean-shutdown marker: {}", e);
                }
            }
            Image::Anon(_) => {
                if let Err(e) = self.finalize_on_disk() {
                    error!("failed to sync the clean-shutdown marker: {:#}", e);
                }
            }
            Image::FileRo(_) => {}
        }
        let _ = self.file.unlock();
    }
}

/// Allocate the private region (hugepage-backed when configured), preload
/// the file image into it and, for `locked` residency, pin it.
fn preload_into_anon(cfg: &StoreConfig, size: u64, src: &[u8]) -> Result<MmapMut> {
    #[cfg(target_os = "linux")]
    let mut region: MmapMut =
        if cfg.residency == ResidencyMode::Locked && !cfg.hugepage_paths.is_empty() {
            match crate::segment::hugepage::map_huge_region(&cfg.hugepage_paths, size)? {
                Some(m) => m,
                None => MmapOptions::new().len(size as usize).map_anon()?,
            }
        } else {
            MmapOptions::new().len(size as usize).map_anon()?
        };
    #[cfg(not(target_os = "linux"))]
    let mut region: MmapMut = MmapOptions::new().len(size as usize).map_anon()?;

    load_image(src, &mut region)?;

    if cfg.residency == ResidencyMode::Locked {
        #[cfg(unix)]
        {
            region.lock().map_err(|e| {
                warn!("mlock of the database segment failed: {}", e);
                StoreError::PinFailed
            })?;
            info!("database segment locked in memory");
        }
    }
    Ok(region)
}

/// Best-effort rollback of the dirty flag after a failed construction.
fn clear_dirty_after_failure(image: &mut Image, dirty_off: u64) {
    if let Image::FileRw(m) = image {
        m[dirty_off as usize] = 0;
        if let Err(e) = m.flush() {
            warn!("failed to sync the dirty flag rollback: {}", e);
        }
    }
}
