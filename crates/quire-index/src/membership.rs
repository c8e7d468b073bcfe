//! LDP membership rows produced by direct and indirect containers.
//!
//! Rows are `(membership subject, (relation, member))`. The producing
//! container is the source and the child that caused the row is the proxy.
//! Windows are meaningful here: a memento of the subject sees the rows that
//! covered the memento's instant.

use std::collections::BTreeSet;

use quire_types::{Instant, ResourceId, Term, Triple, TxScope, Validity};

use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::row::{IndexRow, Link};
use crate::shadow::{ShadowIndex, Window};

/// A membership triple ready to be indexed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MembershipEntry {
    pub subject: ResourceId,
    pub link: Link,
    /// Child that produced the entry.
    pub proxy: ResourceId,
    pub validity: Validity,
}

impl MembershipEntry {
    pub fn to_triple(&self) -> Triple {
        Triple::new(
            self.subject.full_id(),
            self.link.predicate.clone(),
            Term::iri(self.link.object.full_id()),
        )
    }
}

pub struct MembershipIndex {
    rows: ShadowIndex<Link>,
}

impl MembershipIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            rows: ShadowIndex::new("membership", config.page_size),
        }
    }

    /// Index `entry` as produced by container `source`.
    pub fn add_membership(&self, tx: &TxScope, source: &ResourceId, entry: MembershipEntry) -> IndexResult<()> {
        let row = IndexRow::new(entry.subject, entry.link, source.as_base(), entry.validity.from)
            .with_proxy(entry.proxy)
            .with_validity(entry.validity);
        self.rows.add(tx, row)
    }

    /// End every open row produced by `source`.
    pub fn end_membership_for_source(&self, tx: &TxScope, source: &ResourceId, at: Instant) -> IndexResult<()> {
        let source = source.as_base();
        self.rows
            .remove_matching(tx, at, false, |r| r.source == source)
            .map(|_| ())
    }

    /// End the open rows `source` produced because of child `proxy`.
    pub fn end_membership_from_child(
        &self,
        tx: &TxScope,
        source: &ResourceId,
        proxy: &ResourceId,
        at: Instant,
    ) -> IndexResult<()> {
        let (source, proxy) = (source.as_base(), proxy.as_base());
        self.rows
            .remove_matching(tx, at, false, |r| r.source == source && r.proxy.as_ref() == Some(&proxy))
            .map(|_| ())
    }

    /// Remove every row produced by `source`, history included.
    pub fn delete_membership_for_source(&self, tx: &TxScope, source: &ResourceId, at: Instant) -> IndexResult<()> {
        let source = source.as_base();
        self.rows
            .remove_matching(tx, at, true, |r| r.source == source)
            .map(|_| ())
    }

    /// Remove every row that mentions `id` in any position.
    pub fn delete_membership_references(&self, tx: &TxScope, id: &ResourceId, at: Instant) -> IndexResult<()> {
        let id = id.as_base();
        self.rows
            .remove_matching(tx, at, true, |r| {
                r.source == id || r.subject == id || r.tuple.object == id || r.proxy.as_ref() == Some(&id)
            })
            .map(|_| ())
    }

    /// Membership triples of `subject` at `as_of`, or currently open ones.
    /// A memento subject reads at its own instant.
    pub fn membership(
        &self,
        tx: Option<&TxScope>,
        subject: &ResourceId,
        as_of: Option<&Instant>,
    ) -> IndexResult<Vec<Triple>> {
        let instant = subject.memento_instant();
        let as_of = as_of.or(instant.as_ref());
        let base = subject.without_memento();
        self.rows
            .read(tx, &base, as_of)
            .map(|link| {
                link.map(|link| Triple::new(base.full_id(), link.predicate, Term::iri(link.object.full_id())))
            })
            .collect()
    }

    /// Every row produced by `source` visible to `tx`, history included.
    pub fn entries_for_source(&self, tx: Option<&TxScope>, source: &ResourceId) -> IndexResult<Vec<MembershipEntry>> {
        let source = source.as_base();
        let entries: BTreeSet<MembershipEntry> = self
            .rows
            .rows(tx, Window::Any, |r| r.source == source)?
            .into_iter()
            .map(|r| MembershipEntry {
                proxy: r.proxy.unwrap_or_else(|| r.source.clone()),
                subject: r.subject,
                link: r.tuple,
                validity: r.validity,
            })
            .collect();
        Ok(entries.into_iter().collect())
    }

    /// Latest membership change recorded for `subject`.
    pub fn last_updated(&self, tx: Option<&TxScope>, subject: &ResourceId) -> IndexResult<Option<Instant>> {
        self.rows.last_updated(tx, &subject.as_base())
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quire_types::{vocab, TxId};

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn entry(subject: &str, member: &str, from: i64) -> MembershipEntry {
        MembershipEntry {
            subject: id(subject),
            link: Link::new(vocab::MEMBER, id(member)),
            proxy: id(member),
            validity: Validity::open(at(from)),
        }
    }

    fn index() -> MembershipIndex {
        MembershipIndex::new(&IndexConfig::default())
    }

    fn members(index: &MembershipIndex, tx: Option<&TxScope>, subject: &ResourceId, as_of: Option<&Instant>) -> Vec<String> {
        index
            .membership(tx, subject, as_of)
            .unwrap()
            .into_iter()
            .filter_map(|t| t.object.as_iri().map(str::to_string))
            .collect()
    }

    #[test]
    fn ended_membership_stays_visible_to_earlier_mementos() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_membership(&short, &id("dc"), entry("r", "dc/m", 0)).unwrap();
        index.end_membership_for_source(&short, &id("dc"), at(10)).unwrap();

        assert!(members(&index, None, &id("r"), None).is_empty());
        assert_eq!(members(&index, None, &id("r"), Some(&at(5))), vec![id("dc/m").full_id()]);
        let memento = id("r").as_memento(at(5));
        assert_eq!(members(&index, None, &memento, None).len(), 1);
        assert_eq!(index.last_updated(None, &id("r")).unwrap(), Some(at(10)));
    }

    #[test]
    fn end_from_child_only_touches_that_child() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_membership(&short, &id("dc"), entry("r", "dc/a", 0)).unwrap();
        index.add_membership(&short, &id("dc"), entry("r", "dc/b", 0)).unwrap();
        let tx = TxScope::long_running(TxId::new());
        index.end_membership_from_child(&tx, &id("dc"), &id("dc/a"), at(4)).unwrap();
        assert_eq!(members(&index, Some(&tx), &id("r"), None), vec![id("dc/b").full_id()]);
        assert_eq!(members(&index, None, &id("r"), None).len(), 2);
    }

    #[test]
    fn rows_from_different_proxies_are_distinct() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        let via = |proxy: &str| MembershipEntry {
            proxy: id(proxy),
            ..entry("r", "t1", 0)
        };
        index.add_membership(&short, &id("ic"), via("ic/p1")).unwrap();
        index.add_membership(&short, &id("ic"), via("ic/p2")).unwrap();
        assert_eq!(index.entries_for_source(None, &id("ic")).unwrap().len(), 2);
        assert_eq!(members(&index, None, &id("r"), None), vec![id("t1").full_id()]);

        let tx = TxScope::long_running(TxId::new());
        index.end_membership_from_child(&tx, &id("ic"), &id("ic/p1"), at(5)).unwrap();
        assert_eq!(members(&index, Some(&tx), &id("r"), None), vec![id("t1").full_id()]);
        index.commit(&tx).unwrap();
        assert_eq!(members(&index, None, &id("r"), None), vec![id("t1").full_id()]);
        let ended: Vec<_> = index
            .entries_for_source(None, &id("ic"))
            .unwrap()
            .into_iter()
            .filter(|e| !e.validity.is_open())
            .map(|e| (e.proxy, e.validity.to))
            .collect();
        assert_eq!(ended, vec![(id("ic/p1"), Some(at(5)))]);
    }

    #[test]
    fn purge_removes_rows_mentioning_resource() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_membership(&short, &id("dc"), entry("r", "dc/a", 0)).unwrap();
        index.add_membership(&short, &id("dc"), entry("r", "dc/b", 0)).unwrap();
        let tx = TxScope::long_running(TxId::new());
        index.delete_membership_references(&tx, &id("dc/a"), at(1)).unwrap();
        index.commit(&tx).unwrap();
        assert_eq!(index.entries_for_source(None, &id("dc")).unwrap().len(), 1);
    }

    #[test]
    fn readd_in_same_tx_keeps_original_row() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_membership(&short, &id("dc"), entry("r", "dc/a", 0)).unwrap();
        let tx = TxScope::long_running(TxId::new());
        index.end_membership_for_source(&tx, &id("dc"), at(7)).unwrap();
        index.add_membership(&tx, &id("dc"), entry("r", "dc/a", 7)).unwrap();
        index.commit(&tx).unwrap();
        let rows = index.entries_for_source(None, &id("dc")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].validity, Validity::open(at(0)));
    }
}
