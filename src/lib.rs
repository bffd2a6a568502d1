//! Archive synchronization engine for an append-only telemetry archive.
//!
//! Maintains a monotonically growing, gap-free index of published batches
//! per content group and extracts each new batch into self-contained,
//! write-once sync units (full-resolution raw slices plus statistical
//! rollups) that a mirror can replay without re-copying the archive.

pub mod archive;
pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod index;
pub mod layout;
pub mod resolve;
pub mod store;
pub mod window;

pub use config::SyncConfig;
pub use driver::{RunStats, SyncDriver};
pub use error::SyncError;
pub use store::Interval;
