//! Versioned object storage for Quire.
//!
//! Each root resource (an archival group, an atomic resource, or the
//! repository root) owns one store object in an external versioned,
//! content-addressable object store. This crate stages resource changes per
//! root, lays them out as files inside the object, and tracks which object
//! every resource lives in.
//!
//! # Layers
//!
//! - [`VersionedObjectStore`] -- contract of the external store, with the
//!   [`InMemoryVersionedStore`] backend for tests and embedding
//! - [`ObjectSession`] -- staged change set for one store object
//! - [`StorageSession`] -- all object sessions of one transaction, committed
//!   in sorted object-id order
//! - [`ReadOnlySession`] -- cached reader over committed state
//! - [`MappingIndex`] -- transaction-aware resource-to-object mapping
//!
//! # Rules
//!
//! 1. Staged writes are invisible outside their session until commit.
//! 2. Content is checked against its declared digest before it is buffered
//!    and again on prepare.
//! 3. A commit either lands every file change for an object or none.
//! 4. Memento ids resolve to the latest version sealed in the same second.

pub mod config;
pub mod error;
pub mod headers;
pub mod layout;
pub mod mapping;
pub mod memory;
pub mod readonly;
pub mod session;
pub mod storage;
pub mod traits;

pub use config::{StoreConfig, VersioningPolicy};
pub use error::{StoreError, StoreResult};
pub use headers::ResourceHeaders;
pub use mapping::{InMemoryMappingIndex, MappingIndex, StoreMapping};
pub use memory::InMemoryVersionedStore;
pub use readonly::ReadOnlySession;
pub use session::{ObjectSession, SessionState};
pub use storage::{CommitState, ResourceReader, StorageSession};
pub use traits::{ChangeSet, Checkpoint, CommitMode, VersionInfo, VersionNumber, VersionedObjectStore};
