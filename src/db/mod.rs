//! db — the database facade.
//!
//! - core.rs — `Database`: registry wiring, session and undo operations
//! - open.rs — open/open_read_only, environment fingerprint validation
//! - locking.rs — lock-usage assertions (feature `check-locking`)

pub mod core;
#[cfg(feature = "check-locking")]
pub mod locking;
pub mod open;

pub use self::core::Database;
