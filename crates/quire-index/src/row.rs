use std::fmt;

use serde::{Deserialize, Serialize};

use quire_types::{Instant, ResourceId, Validity};

/// A `(predicate, object)` pair, the tuple of reference and membership rows.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub predicate: String,
    pub object: ResourceId,
}

impl Link {
    pub fn new(predicate: impl Into<String>, object: ResourceId) -> Self {
        Self {
            predicate: predicate.into(),
            object,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.predicate, self.object)
    }
}

/// Identity of a row: windows and timestamps are not part of it. Two
/// proxies producing the same membership triple are distinct rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey<T> {
    pub subject: ResourceId,
    pub tuple: T,
    pub source: ResourceId,
    pub proxy: Option<ResourceId>,
}

/// One fact in a shadow index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow<T> {
    pub subject: ResourceId,
    pub tuple: T,
    /// Resource whose state produced the row.
    pub source: ResourceId,
    /// Child through which an indirect container produced the row.
    pub proxy: Option<ResourceId>,
    pub validity: Validity,
    pub last_updated: Instant,
}

impl<T: Clone> IndexRow<T> {
    /// An open row starting at `from`.
    pub fn new(subject: ResourceId, tuple: T, source: ResourceId, from: Instant) -> Self {
        Self {
            subject,
            tuple,
            source,
            proxy: None,
            validity: Validity::open(from),
            last_updated: from,
        }
    }

    pub fn with_proxy(mut self, proxy: ResourceId) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn key(&self) -> RowKey<T> {
        RowKey {
            subject: self.subject.clone(),
            tuple: self.tuple.clone(),
            source: self.source.clone(),
            proxy: self.proxy.clone(),
        }
    }

    pub fn has_key(&self, key: &RowKey<T>) -> bool
    where
        T: PartialEq,
    {
        self.subject == key.subject && self.tuple == key.tuple && self.source == key.source && self.proxy == key.proxy
    }

    /// Whether both rows have the same identity.
    pub fn same_key(&self, other: &IndexRow<T>) -> bool
    where
        T: PartialEq,
    {
        self.subject == other.subject && self.tuple == other.tuple && self.source == other.source && self.proxy == other.proxy
    }

    /// Latest instant recorded by the row's window.
    pub fn touched_at(&self) -> Instant {
        self.validity.to.unwrap_or(self.validity.from).max(self.last_updated)
    }
}

/// A staged operation in a transaction's pending table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOp {
    Add,
    /// Close matching committed rows at the pending row's `validity.to`,
    /// or remove them outright when `force` is set.
    Delete { force: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRow<T> {
    pub row: IndexRow<T>,
    pub op: PendingOp,
}

impl<T> PendingRow<T> {
    pub fn is_add(&self) -> bool {
        self.op == PendingOp::Add
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.op, PendingOp::Delete { .. })
    }

    pub fn is_forced(&self) -> bool {
        self.op == PendingOp::Delete { force: true }
    }
}
