//! Inbound/outbound references between repository resources.
//!
//! Every triple of a resource's graph whose subject and object are both
//! repository ids becomes a row: subject = triple subject, tuple =
//! `(predicate, object)`, source = the resource whose graph holds the triple.

use std::collections::BTreeSet;

use tracing::debug;

use quire_types::{Graph, Instant, ResourceId, Term, Triple, TxScope, ROOT_ID};

use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::row::{IndexRow, Link};
use crate::shadow::{ShadowIndex, Window};

pub struct ReferenceIndex {
    rows: ShadowIndex<Link>,
}

fn internal_id(iri: &str) -> Option<ResourceId> {
    if iri.starts_with(ROOT_ID) {
        ResourceId::parse(iri).ok()
    } else {
        None
    }
}

/// `(subject, link)` pairs for every internal reference in `graph`.
fn references_in(graph: &Graph) -> BTreeSet<(ResourceId, Link)> {
    graph
        .iter()
        .filter_map(|t| {
            let subject = internal_id(&t.subject)?;
            let target = t.object.as_resource()?;
            Some((subject, Link::new(t.predicate.clone(), target)))
        })
        .collect()
}

fn as_triple(subject: &ResourceId, link: &Link) -> Triple {
    Triple::new(subject.full_id(), link.predicate.clone(), Term::iri(link.object.full_id()))
}

impl ReferenceIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            rows: ShadowIndex::new("reference", config.page_size),
        }
    }

    /// Sources whose rows count as `id`'s own. A description also owns the
    /// references recorded for the resource it describes.
    fn owners(id: &ResourceId) -> Vec<ResourceId> {
        if id.is_description() {
            vec![id.without_memento(), id.as_base()]
        } else {
            vec![id.without_memento()]
        }
    }

    fn outbound_rows(&self, tx: Option<&TxScope>, id: &ResourceId) -> IndexResult<Vec<IndexRow<Link>>> {
        let owners = Self::owners(id);
        self.rows.rows(tx, Window::Open, |r| owners.contains(&r.source))
    }

    /// References held in `id`'s graph.
    pub fn outbound(&self, tx: Option<&TxScope>, id: &ResourceId) -> IndexResult<Vec<Triple>> {
        let triples: BTreeSet<Triple> = self
            .outbound_rows(tx, id)?
            .iter()
            .map(|r| as_triple(&r.subject, &r.tuple))
            .collect();
        Ok(triples.into_iter().collect())
    }

    /// References pointing at `target`. A description also receives the
    /// references pointing at the resource it describes.
    pub fn inbound(&self, tx: Option<&TxScope>, target: &ResourceId) -> IndexResult<Vec<Triple>> {
        let targets = Self::owners(target);
        let triples: BTreeSet<Triple> = self
            .rows
            .rows(tx, Window::Open, |r| targets.contains(&r.tuple.object))?
            .iter()
            .map(|r| as_triple(&r.subject, &r.tuple))
            .collect();
        Ok(triples.into_iter().collect())
    }

    /// Bring `id`'s rows in line with `graph`: references no longer present
    /// are removed, new ones are added, unchanged ones are left alone.
    /// Returns the targets of newly added references.
    pub fn update_references(
        &self,
        tx: &TxScope,
        id: &ResourceId,
        graph: &Graph,
        at: Instant,
    ) -> IndexResult<Vec<ResourceId>> {
        let source = id.without_memento();
        let desired = references_in(graph);
        let existing: BTreeSet<(ResourceId, Link)> = self
            .outbound_rows(Some(tx), id)?
            .into_iter()
            .map(|r| (r.subject, r.tuple))
            .collect();

        let owners = Self::owners(id);
        let stale: Vec<&(ResourceId, Link)> = existing.difference(&desired).collect();
        for (subject, link) in &stale {
            self.rows.remove_matching(tx, at, false, |r| {
                r.subject == *subject && r.tuple == *link && owners.contains(&r.source)
            })?;
        }
        let mut added = Vec::new();
        for (subject, link) in desired.difference(&existing) {
            self.rows
                .add(tx, IndexRow::new(subject.clone(), link.clone(), source.clone(), at))?;
            added.push(link.object.clone());
        }
        debug!(id = %source, removed = stale.len(), added = added.len(), "references updated");
        Ok(added)
    }

    /// Remove every reference held by `id`.
    pub fn delete_all_references(&self, tx: &TxScope, id: &ResourceId, at: Instant) -> IndexResult<()> {
        let owners = Self::owners(id);
        self.rows
            .remove_matching(tx, at, false, |r| owners.contains(&r.source))
            .map(|_| ())
    }

    /// Physically remove every row held by `id`, history included. Rows of
    /// other resources pointing at `id` stay.
    pub fn purge_references(&self, tx: &TxScope, id: &ResourceId, at: Instant) -> IndexResult<()> {
        let base = id.as_base();
        self.rows
            .remove_matching(tx, at, true, |r| r.source.as_base() == base)
            .map(|_| ())
    }

    pub fn commit(&self, tx: &TxScope) -> IndexResult<()> {
        self.rows.commit(tx)
    }

    pub fn rollback(&self, tx: &TxScope) -> IndexResult<()> {
        self.rows.rollback(tx)
    }

    pub fn reset(&self) -> IndexResult<()> {
        self.rows.reset()
    }
}
