//! Repository traits for cache operations.

pub mod archives;
pub mod vaults;

pub use archives::ArchiveRepo;
pub use vaults::VaultRepo;
