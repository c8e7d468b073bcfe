//! Transactional shadow indexes for Quire.
//!
//! The object store is the source of truth; these indexes answer the
//! questions asked far more often than the store is read: who contains
//! whom, who references whom, and which membership triples a resource had
//! at a given instant.
//!
//! # Key Types
//!
//! - [`ShadowIndex`] -- committed rows with validity windows plus
//!   per-transaction pending adds and deletes
//! - [`ContainmentIndex`] -- parent/child rows
//! - [`ReferenceIndex`] -- cross-resource references taken from graphs
//! - [`MembershipIndex`] -- LDP membership rows with temporal validity
//! - [`SqlDialect`] -- schema and commit statements per [`DbPlatform`]
//!
//! # Visibility
//!
//! Inside a long-running transaction a read sees committed rows not
//! cancelled by that transaction's pending deletes, plus its pending adds.
//! Outside a transaction only committed rows are visible. Short-lived
//! transactions write committed rows directly.
//!
//! # Relational schema
//!
//! The kernel runs on the in-memory tables above. [`SqlDialect`] renders
//! the equivalent relational tables and commit statements for the platform
//! named by [`IndexConfig::platform`]; nothing here executes that SQL. The
//! `quire schema` command prints it for provisioning a database.

pub mod config;
pub mod containment;
pub mod dialect;
pub mod error;
pub mod membership;
pub mod page;
pub mod reference;
pub mod row;
pub mod shadow;

pub use config::{DbPlatform, IndexConfig};
pub use containment::ContainmentIndex;
pub use dialect::{IndexTable, SqlDialect};
pub use error::{IndexError, IndexResult};
pub use membership::{MembershipEntry, MembershipIndex};
pub use page::Paged;
pub use reference::ReferenceIndex;
pub use row::{IndexRow, Link, PendingOp, PendingRow, RowKey};
pub use shadow::{ShadowIndex, Window};
