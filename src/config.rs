//! Centralized configuration for opening a store.
//!
//! Goals:
//! - Single place for the open-time tunables instead of scattering them
//!   across constructor arguments.
//! - `StoreConfig::from_env()` for operational overrides; builder-style
//!   setters for programmatic use.

use std::fmt;
use std::path::PathBuf;

use crate::mode::ResidencyMode;

/// Default requested segment size: 64 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Open-time configuration of a database.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Requested segment size in bytes; must be a multiple of the size
    /// quantum. An existing larger file wins over this value.
    /// Env: SB_SEGMENT_SIZE (bytes).
    pub size: u64,

    /// Open even if the dirty flag is set (previous writer died).
    /// Env: SB_ALLOW_DIRTY (1|true|on|yes).
    pub allow_dirty: bool,

    /// How the segment is held in memory.
    /// Env: SB_RESIDENCY (mapped|heap|locked).
    pub residency: ResidencyMode,

    /// Candidate hugetlbfs mounts for `locked` residency.
    /// Env: SB_HUGEPAGE_PATHS (colon-separated).
    pub hugepage_paths: Vec<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SEGMENT_SIZE,
            allow_dirty: false,
            residency: ResidencyMode::Mapped,
            hugepage_paths: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables; unset or unparsable
    /// variables keep their defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SB_SEGMENT_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.size = n;
            }
        }
        if let Ok(v) = std::env::var("SB_ALLOW_DIRTY") {
            let s = v.trim().to_ascii_lowercase();
            cfg.allow_dirty = s == "1" || s == "true" || s == "on" || s == "yes";
        }
        if let Ok(v) = std::env::var("SB_RESIDENCY") {
            if let Ok(m) = v.trim().parse::<ResidencyMode>() {
                cfg.residency = m;
            }
        }
        if let Ok(v) = std::env::var("SB_HUGEPAGE_PATHS") {
            cfg.hugepage_paths = v
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        cfg
    }

    // ----- builder-style setters -----

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_allow_dirty(mut self, on: bool) -> Self {
        self.allow_dirty = on;
        self
    }

    pub fn with_residency(mut self, mode: ResidencyMode) -> Self {
        self.residency = mode;
        self
    }

    pub fn with_hugepage_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.hugepage_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreConfig {{ size: {}, allow_dirty: {}, residency: {}, hugepage_paths: {} }}",
            self.size,
            self.allow_dirty,
            self.residency,
            if self.hugepage_paths.is_empty() {
                "none".to_string()
            } else {
                self.hugepage_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(":")
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIZE_QUANTUM;

    #[test]
    fn defaults_are_sane() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.size % SIZE_QUANTUM, 0);
        assert!(!cfg.allow_dirty);
        assert_eq!(cfg.residency, ResidencyMode::Mapped);
        assert!(cfg.hugepage_paths.is_empty());
    }

    #[test]
    fn builder_overrides() {
        let cfg = StoreConfig::default()
            .with_size(4 * SIZE_QUANTUM)
            .with_allow_dirty(true)
            .with_residency(ResidencyMode::Heap)
            .with_hugepage_paths(["/mnt/huge"]);
        assert_eq!(cfg.size, 4 * SIZE_QUANTUM);
        assert!(cfg.allow_dirty);
        assert_eq!(cfg.residency, ResidencyMode::Heap);
        assert_eq!(cfg.hugepage_paths, vec![PathBuf::from("/mnt/huge")]);
    }
}
