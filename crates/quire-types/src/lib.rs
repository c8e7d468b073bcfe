//! Foundation types for Quire.
//!
//! This crate provides the identity, temporal, and graph types shared by the
//! store, the indexes, and the transaction kernel. Every other Quire crate
//! depends on `quire-types`.
//!
//! # Key Types
//!
//! - [`ResourceId`] -- Hierarchical resource id with an optional qualifier
//! - [`TxId`] -- UUID v7 transaction identifier
//! - [`Validity`] -- Half-open validity window used by temporal index rows
//! - [`ContentDigest`] -- BLAKE3 digest of stored content
//! - [`InteractionModel`] -- LDP interaction model of a resource
//! - [`Graph`] -- The triples describing an RDF resource

pub mod digest;
pub mod error;
pub mod id;
pub mod model;
pub mod rdf;
pub mod time;
pub mod tx;

pub use digest::ContentDigest;
pub use error::{TypeError, TypeResult};
pub use id::{Qualifier, ResourceId, ROOT_ID};
pub use model::InteractionModel;
pub use rdf::{vocab, Graph, Term, Triple};
pub use time::{Clock, Instant, ManualClock, SystemClock, Validity};
pub use tx::{TxId, TxScope};
