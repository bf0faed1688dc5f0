//! Residency mode of the shared segment.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

/// How the segment is held in memory while the database is open.
///
/// - `Mapped`: the exposed range is the file mapping itself. Minimum memory
///   footprint, pages demand-loaded, subject to OS paging.
/// - `Heap`: a private anonymous copy of the file. Eliminates file-backed
///   paging at the cost of RAM; written back on shutdown.
/// - `Locked`: as `Heap`, with the whole region pinned in physical memory
///   and optionally backed by hugepages. For latency-critical serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidencyMode {
    #[default]
    Mapped,
    Heap,
    Locked,
}

impl FromStr for ResidencyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mapped" => Ok(ResidencyMode::Mapped),
            "heap" => Ok(ResidencyMode::Heap),
            "locked" => Ok(ResidencyMode::Locked),
            other => Err(anyhow!(
                "unknown residency mode '{}' (expected mapped | heap | locked)",
                other
            )),
        }
    }
}

impl fmt::Display for ResidencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResidencyMode::Mapped => "mapped",
            ResidencyMode::Heap => "heap",
            ResidencyMode::Locked => "locked",
        };
        f.write_str(s)
    }
}
