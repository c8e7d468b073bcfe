//! Parent/child containment.
//!
//! Rows are `(parent, child)` with the parent as both subject and source.
//! A deleted child keeps its row with a closed window until it is purged.

use std::collections::BTreeSet;

use quire_types::{Instant, ResourceId, TxScope, Validity};

use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::page::Paged;
use crate::row::IndexRow;
use crate::shadow::{ShadowIndex, Window};

pub struct ContainmentIndex {
    rows: ShadowIndex<ResourceId>,
}

impl ContainmentIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            rows: ShadowIndex::new("containment", config.page_size),
        }
    }

    fn row(parent: &ResourceId, child: &ResourceId, from: Instant) -> IndexRow<ResourceId> {
        let parent = parent.as_base();
        IndexRow::new(parent.clone(), child.as_base(), parent, from)
    }

    /// Record that `parent` contains `child` from `at` on.
    pub fn add_contained_by(&self, tx: &TxScope, parent: &ResourceId, child: &ResourceId, at: Instant) -> IndexResult<()> {
        self.rows.add(tx, Self::row(parent, child, at))
    }

    /// Record a containment fact with an explicit window.
    pub fn add_contained_by_window(
        &self,
        tx: &TxScope,
        parent: &ResourceId,
        child: &ResourceId,
        validity: Validity,
    ) -> IndexResult<()> {
        let row = Self::row(parent, child, validity.from).with_validity(validity);
        self.rows.add(tx, IndexRow {
            last_updated: validity.to.unwrap_or(validity.from),
            ..row
        })
    }

    /// End the `(parent, child)` relationship at `at`.
    pub fn remove_contained_by(&self, tx: &TxScope, parent: &ResourceId, child: &ResourceId, at: Instant) -> IndexResult<()> {
        let key = Self::row(parent, child, at).key();
        self.rows.remove(tx, &key, at, false).map(|_| ())
    }

    /// End `child`'s relationship to whichever parent holds it.
    pub fn remove_resource(&self, tx: &TxScope, child: &ResourceId, at: Instant) -> IndexResult<()> {
        let child = child.as_base();
        self.rows
            .remove_matching(tx, at, false, |r| r.tuple == child)
            .map(|_| ())
    }

    /// Drop every trace of `child`, closed history included.
    pub fn purge_resource(&self, tx: &TxScope, child: &ResourceId, at: Instant) -> IndexResult<()> {
        let child = child.as_base();
        self.rows
            .remove_matching(tx, at, true, |r| r.tuple == child)
            .map(|_| ())
    }

    /// Children of `parent` open at `as_of` (or now), ordered.
    pub fn contains(&self, tx: Option<&TxScope>, parent: &ResourceId, as_of: Option<&Instant>) -> Paged<'_, ResourceId> {
        self.rows.read(tx, &parent.as_base(), as_of)
    }

    /// Children of `parent` whose containment has ended and not restarted.
    pub fn contains_deleted(&self, tx: Option<&TxScope>, parent: &ResourceId) -> IndexResult<Vec<ResourceId>> {
        let parent = parent.as_base();
        let live: BTreeSet<ResourceId> = self.rows.read_window(tx, &parent, Window::Open).collect::<IndexResult<_>>()?;
        let closed: BTreeSet<ResourceId> = self.rows.read_window(tx, &parent, Window::Closed).collect::<IndexResult<_>>()?;
        Ok(closed.difference(&live).cloned().collect())
    }

    /// Current parent of `child`.
    pub fn contained_by(&self, tx: Option<&TxScope>, child: &ResourceId) -> IndexResult<Option<ResourceId>> {
        self.holder(tx, &child.as_base(), Window::Open)
    }

    /// Whether `id` is contained somewhere. The repository root always exists.
    pub fn exists(&self, tx: Option<&TxScope>, id: &ResourceId, include_deleted: bool) -> IndexResult<bool> {
        if id.is_root() {
            return Ok(true);
        }
        let window = if include_deleted { Window::Any } else { Window::Open };
        Ok(self.holder(tx, &id.as_base(), window)?.is_some())
    }

    /// A parent always lies on the child's path, so only the child's
    /// ancestors are looked up, nearest first.
    fn holder(&self, tx: Option<&TxScope>, child: &ResourceId, window: Window) -> IndexResult<Option<ResourceId>> {
        if child.is_root() {
            return Ok(None);
        }
        let mut candidates = child.ancestors();
        candidates.insert(0, ResourceId::root());
        for parent in candidates.into_iter().rev() {
            if self.rows.holds(tx, &parent, child, window)? {
                return Ok(Some(parent));
            }
        }
        Ok(None)
    }

    /// The closest existing container of `id`: its recorded parent, or else
    /// the nearest existing ancestor, or else the repository root.
    pub fn container_of_path(&self, tx: Option<&TxScope>, id: &ResourceId, include_deleted: bool) -> IndexResult<ResourceId> {
        if id.is_root() {
            return Ok(id.as_base());
        }
        if let Some(parent) = self.contained_by(tx, id)? {
            return Ok(parent);
        }
        for ancestor in id.ancestors().into_iter().rev() {
            if self.exists(tx, &ancestor, include_deleted)? {
                return Ok(ancestor);
            }
        }
        Ok(ResourceId::root())
    }

    /// Whether any live resource sits below `id`, which marks `id` as a
    /// placeholder path segment when `id` itself does not exist.
    ///
    /// The shallowest such resource is held by `id`, one of its ancestors or
    /// the root, and sorts among the tuples sharing `id` as a prefix.
    pub fn has_resources_starting_with(&self, tx: Option<&TxScope>, id: &ResourceId) -> IndexResult<bool> {
        let base = id.as_base();
        let mut holders = base.ancestors();
        holders.insert(0, ResourceId::root());
        holders.push(base.clone());
        for holder in holders {
            let after = self.rows.read_window(tx, &holder, Window::Open).starting_after(base.clone());
            for child in after {
                let child = child?;
                if !child.base_id().starts_with(base.base_id()) {
                    break;
                }
                if base.is_ancestor_of(&child) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Latest change to `parent`'s children.
    pub fn last_updated(&self, tx: Option<&TxScope>, parent: &ResourceId) -> IndexResult<Option<Instant>> {
        self.rows.last_updated(tx, &parent.as_base())
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
    use quire_types::TxId;

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn index() -> ContainmentIndex {
        ContainmentIndex::new(&IndexConfig::default())
    }

    fn children(index: &ContainmentIndex, tx: Option<&TxScope>, parent: &str) -> Vec<ResourceId> {
        index.contains(tx, &id(parent), None).collect::<IndexResult<_>>().unwrap()
    }

    #[test]
    fn children_visible_in_tx_before_commit() {
        let index = index();
        let tx = TxScope::long_running(TxId::new());
        index.add_contained_by(&tx, &ResourceId::root(), &id("a"), at(0)).unwrap();
        index.add_contained_by(&tx, &id("a"), &id("a/b"), at(0)).unwrap();

        assert_eq!(children(&index, Some(&tx), "a"), vec![id("a/b")]);
        assert!(index.exists(Some(&tx), &id("a/b"), false).unwrap());
        assert!(!index.exists(None, &id("a/b"), false).unwrap());

        index.commit(&tx).unwrap();
        assert_eq!(index.contained_by(None, &id("a/b")).unwrap(), Some(id("a")));
    }

    #[test]
    fn deleted_children_keep_history_until_purged() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_contained_by(&short, &id("a"), &id("a/b"), at(0)).unwrap();
        index.remove_resource(&short, &id("a/b"), at(10)).unwrap();

        assert!(children(&index, None, "a").is_empty());
        assert_eq!(index.contains_deleted(None, &id("a")).unwrap(), vec![id("a/b")]);
        assert!(index.exists(None, &id("a/b"), true).unwrap());
        assert!(!index.exists(None, &id("a/b"), false).unwrap());
        let past: Vec<_> = index.contains(None, &id("a"), Some(&at(5))).collect::<IndexResult<_>>().unwrap();
        assert_eq!(past, vec![id("a/b")]);

        index.purge_resource(&short, &id("a/b"), at(11)).unwrap();
        assert!(!index.exists(None, &id("a/b"), true).unwrap());
    }

    #[test]
    fn root_always_exists() {
        assert!(index().exists(None, &ResourceId::root(), false).unwrap());
    }

    #[test]
    fn placeholder_segments_are_detected() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_contained_by(&short, &ResourceId::root(), &id("x/y/z"), at(0)).unwrap();
        assert!(!index.exists(None, &id("x/y"), false).unwrap());
        assert!(index.has_resources_starting_with(None, &id("x/y")).unwrap());
        assert!(!index.has_resources_starting_with(None, &id("x/y/z")).unwrap());
    }

    #[test]
    fn placeholder_check_skips_siblings_sharing_a_prefix() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_contained_by(&short, &ResourceId::root(), &id("x"), at(0)).unwrap();
        index.add_contained_by(&short, &id("x"), &id("x/y-a"), at(0)).unwrap();
        index.add_contained_by(&short, &id("x"), &id("x/ya"), at(0)).unwrap();
        assert!(!index.has_resources_starting_with(None, &id("x/y")).unwrap());

        let tx = TxScope::long_running(TxId::new());
        index.add_contained_by(&tx, &id("x"), &id("x/y/z/w"), at(1)).unwrap();
        assert!(index.has_resources_starting_with(Some(&tx), &id("x/y")).unwrap());
        assert!(index.has_resources_starting_with(Some(&tx), &id("x/y/z")).unwrap());
        assert!(!index.has_resources_starting_with(None, &id("x/y")).unwrap());
    }

    #[test]
    fn container_of_path_walks_up_to_existing_ancestor() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_contained_by(&short, &ResourceId::root(), &id("a"), at(0)).unwrap();
        assert_eq!(index.container_of_path(None, &id("a/b/c"), false).unwrap(), id("a"));
        assert_eq!(index.container_of_path(None, &id("q/r"), false).unwrap(), ResourceId::root());
        assert_eq!(index.container_of_path(None, &id("a"), false).unwrap(), ResourceId::root());
    }

    #[test]
    fn last_updated_tracks_pending_changes() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index.add_contained_by(&short, &id("a"), &id("a/b"), at(0)).unwrap();
        let tx = TxScope::long_running(TxId::new());
        index.remove_contained_by(&tx, &id("a"), &id("a/b"), at(20)).unwrap();
        assert_eq!(index.last_updated(None, &id("a")).unwrap(), Some(at(0)));
        assert_eq!(index.last_updated(Some(&tx), &id("a")).unwrap(), Some(at(20)));
        index.rollback(&tx).unwrap();
        assert_eq!(index.last_updated(Some(&tx), &id("a")).unwrap(), Some(at(0)));
    }

    #[test]
    fn closed_window_rows_rebuild_tombstones() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        index
            .add_contained_by_window(&short, &id("a"), &id("a/gone"), Validity::closed(at(0), at(9)))
            .unwrap();
        assert_eq!(index.contains_deleted(None, &id("a")).unwrap(), vec![id("a/gone")]);
        assert_eq!(index.last_updated(None, &id("a")).unwrap(), Some(at(9)));
    }
}
