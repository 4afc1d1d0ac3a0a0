//! Core domain types for icebox.
//!
//! This crate defines what every other crate agrees on:
//! - Archive references (`id:`/`name:` tokens) and their rendering
//! - Archive description rules imposed by the remote store
//! - Timestamp parsing for remote-store dates
//! - The configuration schema and its provider

pub mod archive_ref;
pub mod config;
pub mod description;
pub mod error;
pub mod timestamp;

pub use archive_ref::ArchiveRef;
pub use config::{ConfigProvider, FileConfigProvider, IceboxConfig, MemoryConfigProvider};
pub use error::{Error, Result};

/// Tolerance for the remote store's inventory regeneration delay.
///
/// An inventory is not regenerated on every request, so an archive listed in
/// any inventory is known to exist at least as early as the inventory job's
/// creation minus this lag.
pub const INVENTORY_LAG: time::Duration = time::Duration::days(3);

/// Default chunk size for ranged retrieval downloads: 8 MiB.
pub const DEFAULT_MULTIPART_SIZE: u64 = 8 * 1024 * 1024;

/// Region used when neither the config nor the command line names one.
pub const DEFAULT_REGION: &str = "us-east-1";
