//! Transaction kernel for Quire.
//!
//! Ties the object store and the shadow indexes together under one
//! transaction boundary. A resource operation stages store content and
//! index deltas in a [`Transaction`]; commit drives the store first, then
//! the indexes, then the external collaborators.
//!
//! # Key Types
//!
//! - [`Repository`] -- entry point owning the context, transactions and service
//! - [`Transaction`] -- one unit of work with its locks and staged changes
//! - [`TransactionManager`] -- registry of live transactions with expiry sweep
//! - [`ResourceService`] -- create, replace, update, delete, purge and reads
//! - [`MembershipService`] -- membership triples with temporal validity
//! - [`Rebuilder`] -- recomputes every index from the object store
//! - [`IntentLog`] -- write-ahead record of commits in flight
//! - [`Sweeper`] -- background expiry sweep and read-session eviction
//!
//! # Commit order
//!
//! 1. Prepare every touched store object.
//! 2. Record a commit intent for the touched roots.
//! 3. Commit the store objects in sorted order, then the mapping.
//! 4. Commit the containment, reference and membership indexes.
//! 5. Resolve the intent, then notify search and deliver events.
//!
//! A failure before step 4 rolls everything back. A failure in step 4
//! leaves a partial commit whose intent stays open until
//! [`Repository::recover`] rebuilds the affected roots.

pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod intent;
pub mod lock;
pub mod manager;
pub mod membership;
pub mod rebuild;
pub mod repository;
pub mod resource;
pub mod service;
pub mod sweeper;
pub mod transaction;

pub use collab::{
    AuthorizationCache, Collaborators, EventAccumulator, EventOperation, InMemoryEventAccumulator,
    NoOpAuthorizationCache, NoOpSearchIndex, ResourceEvent, SearchIndex,
};
pub use config::{QuireConfig, TransactionConfig};
pub use context::RepositoryContext;
pub use error::{ErrorClass, KernelError, KernelResult};
pub use intent::{CommitIntent, FileIntentLog, InMemoryIntentLog, IntentLog};
pub use lock::ResourceLockManager;
pub use manager::TransactionManager;
pub use membership::{MembershipConfig, MembershipService, TimelineEntry};
pub use rebuild::{RebuildReport, Rebuilder};
pub use repository::Repository;
pub use resource::{decode_graph, encode_graph, Resource};
pub use service::{Content, CreateRequest, ResourceService};
pub use sweeper::Sweeper;
pub use transaction::{Transaction, TxState};
