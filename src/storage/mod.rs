//!
//! lendbook storage module
//! -----------------------
//! Persistence collaborators of the access-control core. The engine and the login
//! guard only see traits from this module:
//!
//! - `RbacRepository`: users, roles, permissions and the two join tables.
//! - `OwnershipResolver`: who owns a given resource instance.
//! - `TtlStore`: key-value store with per-key TTL used for attempt counters and locks.
//!
//! `MemoryRepository` and `MemoryKvStore` are the in-process implementations used by
//! the binary and by tests.

use thiserror::Error;

pub mod kv;
pub mod repository;
pub mod memory;

pub use kv::{KvValue, MemoryKvStore, TtlStore};
pub use memory::MemoryRepository;
pub use repository::{OwnershipResolver, RbacRepository};

/// Low-level storage failure. Converted into `AppError::Io` at the component boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("value at key '{key}' is not an integer")]
    NotAnInteger { key: String },
    #[error("ttl for key '{key}' must be positive and within the clock range")]
    InvalidTtl { key: String },
}
