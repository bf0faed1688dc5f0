//! Environment fingerprint embedded in the segment.
//!
//! The segment stores raw, relocatable binary data whose layout depends on
//! the producing toolchain. A fixed-layout record identifying that toolchain
//! is written under the name `"environment"` on creation and compared
//! bitwise against the host on every later open. A mismatch is never
//! converted; the open fails.

use log::error;

use crate::consts::ARENA_FORMAT_VERSION;

const COMPILER_VERSION_LEN: usize = 256;

/// Fixed-layout fingerprint of the producing build.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EnvironmentBlob {
    compiler_version: [u8; COMPILER_VERSION_LEN],
    debug: u8,
    apple: u8,
    windows: u8,
    _pad: u8,
    aux_format_version: u32,
}

impl EnvironmentBlob {
    /// Fingerprint of the running build.
    pub fn host() -> Self {
        let mut compiler_version = [0u8; COMPILER_VERSION_LEN];
        let v = env!("STATEBASE_RUSTC_VERSION").as_bytes();
        let n = v.len().min(COMPILER_VERSION_LEN);
        compiler_version[..n].copy_from_slice(&v[..n]);
        Self {
            compiler_version,
            debug: cfg!(debug_assertions) as u8,
            apple: cfg!(target_os = "macos") as u8,
            windows: cfg!(windows) as u8,
            _pad: 0,
            aux_format_version: ARENA_FORMAT_VERSION,
        }
    }

    /// The zero-padded compiler identifier, all 256 bytes.
    pub fn compiler_version(&self) -> &[u8; COMPILER_VERSION_LEN] {
        &self.compiler_version
    }

    fn compiler_version_str(&self) -> String {
        let end = self
            .compiler_version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMPILER_VERSION_LEN);
        String::from_utf8_lossy(&self.compiler_version[..end]).into_owned()
    }

    fn compiler_version_hex(&self) -> String {
        self.compiler_version
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl PartialEq for EnvironmentBlob {
    fn eq(&self, other: &Self) -> bool {
        self.compiler_version == other.compiler_version
            && self.debug == other.debug
            && self.apple == other.apple
            && self.windows == other.windows
            && self.aux_format_version == other.aux_format_version
    }
}

impl Eq for EnvironmentBlob {}

/// Field-by-field diagnostic emitted before an `EnvironmentMismatch` error.
pub(crate) fn log_mismatch(host: &EnvironmentBlob, stored: &EnvironmentBlob) {
    error!("database created by a different compiler, build or environment");
    error!("environment differences (host vs database):");
    error!(
        "  compiler: {} \"{}\"",
        host.compiler_version_hex(),
        host.compiler_version_str()
    );
    error!("       vs   {} \"{}\"", stored.compiler_version_hex(), stored.compiler_version_str());
    error!("  debug: {} vs {}", host.debug, stored.debug);
    error!("  apple: {} vs {}", host.apple, stored.apple);
    error!("  windows: {} vs {}", host.windows, stored.windows);
    error!(
        "  aux format version: {} vs {}",
        host.aux_format_version, stored.aux_format_version
    );
}
