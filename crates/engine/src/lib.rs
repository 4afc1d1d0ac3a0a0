//! Operations behind the icebox command line.
//!
//! This crate provides:
//! - The operation error taxonomy and its exit codes
//! - A per-command `Session` bundling remote store, cache and configuration
//! - The job coordinator: reuse, request and bounded waits on remote jobs
//! - The retrieval budget policy
//! - Vault, archive and job operations

pub mod context;
pub mod download;
pub mod error;
pub mod jobs;
pub mod ops;
pub mod policy;

pub use context::{Session, WaitSettings};
pub use download::Destination;
pub use error::{EXIT_CANCELLED, EXIT_FAILURE, EXIT_RETRY, ErrorKind, OpError, OpResult};
pub use jobs::{JobCoordinator, JobQuery};
pub use ops::archive::{
    ArchiveListing, CheckOptions, Presence, RetrieveOptions, check_present, delete_archive,
    list_archives, retrieve_archives, upload_archive,
};
pub use ops::jobs::list_jobs;
pub use ops::vault::{SyncOptions, create_vault, delete_vault, list_vaults, sync_vault};
pub use policy::RetrievalPolicy;
