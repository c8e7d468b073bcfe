//! The transactional shadow index.
//!
//! Committed rows carry a validity window. A long-running transaction never
//! touches them directly: its adds and deletes go to a pending table keyed
//! by transaction id and are folded into the committed rows on commit.
//! Short-lived transactions skip the pending table entirely.
//!
//! Committed rows are grouped by subject, then by tuple, so a page of one
//! subject's tuples is a range scan.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use quire_types::{Instant, ResourceId, TxId, TxScope, Validity};

use crate::error::{IndexError, IndexResult};
use crate::page::Paged;
use crate::row::{IndexRow, PendingOp, PendingRow, RowKey};

/// Which validity windows a query admits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    /// Rows still open.
    Open,
    /// Rows covering an instant.
    At(Instant),
    /// Rows whose window has closed.
    Closed,
    /// Every row regardless of window.
    Any,
}

impl Window {
    pub fn admits(&self, validity: &Validity) -> bool {
        match self {
            Self::Open => validity.is_open(),
            Self::At(at) => validity.covers(at),
            Self::Closed => !validity.is_open(),
            Self::Any => true,
        }
    }
}

impl From<Option<&Instant>> for Window {
    fn from(as_of: Option<&Instant>) -> Self {
        match as_of {
            Some(at) => Self::At(*at),
            None => Self::Open,
        }
    }
}

/// Committed rows: subject, then tuple, then every row with that pair.
type Committed<T> = BTreeMap<ResourceId, BTreeMap<T, Vec<IndexRow<T>>>>;

struct State<T> {
    committed: Committed<T>,
    pending: HashMap<TxId, Vec<PendingRow<T>>>,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            committed: BTreeMap::new(),
            pending: HashMap::new(),
        }
    }
}

/// Committed rows plus per-transaction pending operations.
pub struct ShadowIndex<T> {
    name: &'static str,
    page_size: usize,
    state: RwLock<State<T>>,
}

impl<T> ShadowIndex<T>
where
    T: Clone + Ord + Debug + Send + Sync,
{
    pub fn new(name: &'static str, page_size: usize) -> Self {
        Self {
            name,
            page_size: page_size.max(1),
            state: RwLock::new(State::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_state(&self) -> IndexResult<RwLockReadGuard<'_, State<T>>> {
        self.state.read().map_err(|e| IndexError::LockPoisoned(format!("{}: {e}", self.name)))
    }

    fn write_state(&self) -> IndexResult<RwLockWriteGuard<'_, State<T>>> {
        self.state.write().map_err(|e| IndexError::LockPoisoned(format!("{}: {e}", self.name)))
    }

    // ---- Writes ----

    /// Stage a row.
    ///
    /// An open row first cancels a pending delete of the same key, which
    /// restores the committed row instead of adding a duplicate.
    pub fn add(&self, tx: &TxScope, row: IndexRow<T>) -> IndexResult<()> {
        let mut state = self.write_state()?;
        if tx.short_lived {
            apply_add(&mut state.committed, row);
            return Ok(());
        }
        let State { committed, pending } = &mut *state;
        let ops = pending.entry(tx.id).or_default();
        let key = row.key();

        if row.validity.is_open() {
            let before = ops.len();
            ops.retain(|p| !(p.op == PendingOp::Delete { force: false } && p.row.has_key(&key)));
            if ops.len() != before {
                debug!(index = self.name, tx = %tx.id, subject = %key.subject, "add cancelled pending delete");
                return Ok(());
            }
        }
        let duplicate_pending = ops
            .iter()
            .any(|p| p.is_add() && p.row.has_key(&key) && same_window(&p.row.validity, &row.validity));
        let forced = ops.iter().any(|p| p.is_forced() && p.row.has_key(&key));
        let duplicate_committed = !forced
            && rows_of(committed, &key.subject, &key.tuple)
                .any(|r| r.has_key(&key) && same_window(&r.validity, &row.validity));
        if duplicate_pending || duplicate_committed {
            return Ok(());
        }
        debug!(index = self.name, tx = %tx.id, subject = %key.subject, tuple = ?key.tuple, "pending add");
        ops.push(PendingRow {
            row,
            op: PendingOp::Add,
        });
        Ok(())
    }

    /// Remove every row with `key`: see [`remove_matching`](Self::remove_matching).
    pub fn remove(&self, tx: &TxScope, key: &RowKey<T>, at: Instant, force: bool) -> IndexResult<usize> {
        self.remove_matching(tx, at, force, |row| row.has_key(key))
    }

    /// Remove rows selected by `matches`.
    ///
    /// Pending adds of this transaction that match are cancelled. Matching
    /// open committed rows get a pending delete that closes them at `at`.
    /// With `force`, every matching committed row, closed ones included, is
    /// tombstoned for physical removal. Returns the number of rows affected.
    pub fn remove_matching(
        &self,
        tx: &TxScope,
        at: Instant,
        force: bool,
        matches: impl Fn(&IndexRow<T>) -> bool,
    ) -> IndexResult<usize> {
        let mut state = self.write_state()?;
        let State { committed, pending } = &mut *state;

        if tx.short_lived {
            let mut affected = 0;
            for rows in committed.values_mut().flat_map(BTreeMap::values_mut) {
                let before = rows.len();
                if force {
                    rows.retain(|r| !matches(r));
                    affected += before - rows.len();
                } else {
                    for row in rows.iter_mut().filter(|r| r.validity.is_open() && matches(r)) {
                        row.validity.close_at(at);
                        row.last_updated = at;
                        affected += 1;
                    }
                }
            }
            prune(committed);
            return Ok(affected);
        }

        let ops = pending.entry(tx.id).or_default();
        let before = ops.len();
        ops.retain(|p| !(p.is_add() && matches(&p.row)));
        let mut affected = before - ops.len();

        for row in all_rows(committed).filter(|r| matches(r)) {
            if force {
                let already = ops
                    .iter()
                    .any(|p| p.is_forced() && p.row.same_key(row) && p.row.validity.from == row.validity.from);
                if !already {
                    ops.push(PendingRow {
                        row: row.clone(),
                        op: PendingOp::Delete { force: true },
                    });
                    affected += 1;
                }
            } else if row.validity.is_open() {
                let already = ops.iter().any(|p| p.is_delete() && p.row.same_key(row));
                if !already {
                    let mut closing = row.clone();
                    closing.validity.close_at(at);
                    closing.last_updated = at;
                    ops.push(PendingRow {
                        row: closing,
                        op: PendingOp::Delete { force: false },
                    });
                    affected += 1;
                }
            }
        }
        if affected > 0 {
            debug!(index = self.name, tx = %tx.id, affected, force, "pending removal");
        }
        Ok(affected)
    }

    // ---- Reads ----

    /// Rows visible to `tx` (committed state when `None`) in `window`.
    pub fn rows(
        &self,
        tx: Option<&TxScope>,
        window: Window,
        matches: impl Fn(&IndexRow<T>) -> bool,
    ) -> IndexResult<Vec<IndexRow<T>>> {
        let state = self.read_state()?;
        Ok(visible_rows(&state, tx, window, None, &matches))
    }

    /// Rows of one subject visible to `tx` in `window`.
    pub fn subject_rows(
        &self,
        tx: Option<&TxScope>,
        subject: &ResourceId,
        window: Window,
    ) -> IndexResult<Vec<IndexRow<T>>> {
        let state = self.read_state()?;
        Ok(visible_rows(&state, tx, window, Some(subject), &|_| true))
    }

    /// Whether `subject` has a row with `tuple` visible to `tx` in `window`.
    pub fn holds(&self, tx: Option<&TxScope>, subject: &ResourceId, tuple: &T, window: Window) -> IndexResult<bool> {
        let state = self.read_state()?;
        let ops = pending_for(&state, tx);
        let committed = rows_of(&state.committed, subject, tuple)
            .any(|r| effective_validity(ops, r).is_some_and(|v| window.admits(&v)));
        Ok(committed
            || ops.iter().any(|p| {
                p.is_add() && p.row.subject == *subject && p.row.tuple == *tuple && window.admits(&p.row.validity)
            }))
    }

    /// One page of distinct tuples of `subject`, ordered, strictly after `after`.
    ///
    /// Committed tuples are scanned in order from `after` and the scan stops
    /// once `limit` visible tuples are found; pending adds are merged in.
    pub fn page(
        &self,
        tx: Option<&TxScope>,
        subject: &ResourceId,
        window: Window,
        after: Option<&T>,
        limit: usize,
    ) -> IndexResult<Vec<T>> {
        let state = self.read_state()?;
        let ops = pending_for(&state, tx);
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut tuples: BTreeSet<&T> = state
            .committed
            .get(subject)
            .into_iter()
            .flat_map(|by_tuple| by_tuple.range::<T, _>((lower, Bound::Unbounded)))
            .filter(|(_, rows)| {
                rows.iter()
                    .any(|r| effective_validity(ops, r).is_some_and(|v| window.admits(&v)))
            })
            .map(|(tuple, _)| tuple)
            .take(limit)
            .collect();
        tuples.extend(
            ops.iter()
                .filter(|p| p.is_add() && p.row.subject == *subject && window.admits(&p.row.validity))
                .map(|p| &p.row.tuple)
                .filter(|t| after.map_or(true, |a| *t > a)),
        );
        Ok(tuples.into_iter().take(limit).cloned().collect())
    }

    /// Distinct tuples of `subject` visible to `tx`, read lazily page by page.
    pub fn read(&self, tx: Option<&TxScope>, subject: &ResourceId, as_of: Option<&Instant>) -> Paged<'_, T> {
        self.read_window(tx, subject, Window::from(as_of))
    }

    pub fn read_window(&self, tx: Option<&TxScope>, subject: &ResourceId, window: Window) -> Paged<'_, T> {
        Paged::new(self, tx.copied(), subject.clone(), window, self.page_size)
    }

    /// Latest instant recorded for `subject`, pending operations of `tx` included.
    pub fn last_updated(&self, tx: Option<&TxScope>, subject: &ResourceId) -> IndexResult<Option<Instant>> {
        let state = self.read_state()?;
        let committed = state
            .committed
            .get(subject)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flatten()
            .map(|r| r.touched_at());
        let pending = pending_for(&state, tx)
            .iter()
            .filter(|p| p.row.subject == *subject)
            .map(|p| p.row.touched_at());
        Ok(committed.chain(pending).max())
    }

    /// Number of pending operations staged by `tx`.
    pub fn pending_len(&self, tx: &TxScope) -> IndexResult<usize> {
        Ok(pending_for(&*self.read_state()?, Some(tx)).len())
    }

    /// Number of committed rows.
    pub fn committed_len(&self) -> IndexResult<usize> {
        Ok(all_rows(&self.read_state()?.committed).count())
    }

    // ---- Transaction boundary ----

    /// Fold `tx`'s pending operations into the committed rows.
    ///
    /// Forced deletes remove rows, other deletes close windows, and adds
    /// land unless an identical row is already committed.
    pub fn commit(&self, tx: &TxScope) -> IndexResult<()> {
        let mut state = self.write_state()?;
        let Some(ops) = state.pending.remove(&tx.id) else {
            return Ok(());
        };
        let (mut forced, mut closed, mut added) = (0usize, 0usize, 0usize);
        let committed = &mut state.committed;

        for p in ops.iter().filter(|p| p.is_forced()) {
            if let Some(rows) = rows_of_mut(committed, &p.row) {
                let before = rows.len();
                rows.retain(|r| !(r.same_key(&p.row) && r.validity.from == p.row.validity.from));
                forced += before - rows.len();
            }
        }
        for p in ops.iter().filter(|p| p.op == PendingOp::Delete { force: false }) {
            let Some(to) = p.row.validity.to else { continue };
            if let Some(rows) = rows_of_mut(committed, &p.row) {
                for row in rows.iter_mut().filter(|r| r.validity.is_open() && r.same_key(&p.row)) {
                    row.validity.close_at(to);
                    row.last_updated = p.row.last_updated;
                    closed += 1;
                }
            }
        }
        for p in ops.into_iter().filter(|p| p.is_add()) {
            if apply_add(committed, p.row) {
                added += 1;
            }
        }
        prune(committed);
        debug!(index = self.name, tx = %tx.id, forced, closed, added, "pending operations committed");
        Ok(())
    }

    /// Drop `tx`'s pending operations.
    pub fn rollback(&self, tx: &TxScope) -> IndexResult<()> {
        let mut state = self.write_state()?;
        if let Some(ops) = state.pending.remove(&tx.id) {
            debug!(index = self.name, tx = %tx.id, dropped = ops.len(), "pending operations rolled back");
        }
        Ok(())
    }

    /// Remove every committed and pending row.
    pub fn reset(&self) -> IndexResult<()> {
        let mut state = self.write_state()?;
        state.committed.clear();
        state.pending.clear();
        Ok(())
    }
}

fn same_window(a: &Validity, b: &Validity) -> bool {
    a == b || (a.is_open() && b.is_open())
}

fn all_rows<T>(committed: &Committed<T>) -> impl Iterator<Item = &IndexRow<T>> {
    committed.values().flat_map(BTreeMap::values).flatten()
}

fn rows_of<'a, T: Ord>(committed: &'a Committed<T>, subject: &ResourceId, tuple: &T) -> impl Iterator<Item = &'a IndexRow<T>> {
    committed
        .get(subject)
        .and_then(|by_tuple| by_tuple.get(tuple))
        .into_iter()
        .flatten()
}

fn rows_of_mut<'a, T: Ord>(committed: &'a mut Committed<T>, row: &IndexRow<T>) -> Option<&'a mut Vec<IndexRow<T>>> {
    committed
        .get_mut(&row.subject)
        .and_then(|by_tuple| by_tuple.get_mut(&row.tuple))
}

fn prune<T: Ord>(committed: &mut Committed<T>) {
    for by_tuple in committed.values_mut() {
        by_tuple.retain(|_, rows| !rows.is_empty());
    }
    committed.retain(|_, by_tuple| !by_tuple.is_empty());
}

/// Insert unless an identical row exists. Returns whether a row was inserted.
fn apply_add<T: Clone + Ord>(committed: &mut Committed<T>, row: IndexRow<T>) -> bool {
    let rows = committed
        .entry(row.subject.clone())
        .or_default()
        .entry(row.tuple.clone())
        .or_default();
    if rows.iter().any(|r| r.same_key(&row) && same_window(&r.validity, &row.validity)) {
        return false;
    }
    rows.push(row);
    true
}

fn pending_for<'a, T>(state: &'a State<T>, tx: Option<&TxScope>) -> &'a [PendingRow<T>] {
    tx.filter(|tx| !tx.short_lived)
        .and_then(|tx| state.pending.get(&tx.id))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// The window `row` has once `ops` are applied, or `None` when a forced
/// delete purges it.
fn effective_validity<T: Clone + PartialEq>(ops: &[PendingRow<T>], row: &IndexRow<T>) -> Option<Validity> {
    let mut validity = row.validity;
    for p in ops.iter().filter(|p| p.row.same_key(row)) {
        match p.op {
            PendingOp::Delete { force: true } if p.row.validity.from == row.validity.from => return None,
            PendingOp::Delete { force: false } if row.validity.is_open() => {
                if let Some(to) = p.row.validity.to {
                    validity.close_at(to);
                }
            }
            _ => {}
        }
    }
    Some(validity)
}

fn visible_rows<T: Clone + PartialEq>(
    state: &State<T>,
    tx: Option<&TxScope>,
    window: Window,
    subject: Option<&ResourceId>,
    matches: &dyn Fn(&IndexRow<T>) -> bool,
) -> Vec<IndexRow<T>> {
    let ops = pending_for(state, tx);
    let committed: Box<dyn Iterator<Item = &IndexRow<T>>> = match subject {
        Some(subject) => Box::new(state.committed.get(subject).into_iter().flat_map(BTreeMap::values).flatten()),
        None => Box::new(all_rows(&state.committed)),
    };

    let mut out = Vec::new();
    for row in committed.filter(|r| matches(r)) {
        if let Some(validity) = effective_validity(ops, row).filter(|v| window.admits(v)) {
            out.push(IndexRow {
                validity,
                ..row.clone()
            });
        }
    }
    out.extend(
        ops.iter()
            .filter(|p| p.is_add())
            .filter(|p| subject.map_or(true, |s| p.row.subject == *s))
            .filter(|p| matches(&p.row) && window.admits(&p.row.validity))
            .map(|p| p.row.clone()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn long() -> TxScope {
        TxScope::long_running(TxId::new())
    }

    fn child_row(parent: &str, child: &str, secs: i64) -> IndexRow<ResourceId> {
        IndexRow::new(id(parent), id(child), id(parent), at(secs))
    }

    fn index() -> ShadowIndex<ResourceId> {
        ShadowIndex::new("test", 2)
    }

    fn tuples(index: &ShadowIndex<ResourceId>, tx: Option<&TxScope>, subject: &str, as_of: Option<&Instant>) -> Vec<ResourceId> {
        index.read(tx, &id(subject), as_of).collect::<IndexResult<_>>().unwrap()
    }

    // -----------------------------------------------------------------------
    // Isolation
    // -----------------------------------------------------------------------

    #[test]
    fn pending_rows_are_private_to_their_tx() {
        let index = index();
        let tx = long();
        index.add(&tx, child_row("p", "p/a", 0)).unwrap();
        assert_eq!(tuples(&index, Some(&tx), "p", None), vec![id("p/a")]);
        assert!(tuples(&index, None, "p", None).is_empty());
        assert!(tuples(&index, Some(&long()), "p", None).is_empty());

        index.commit(&tx).unwrap();
        assert_eq!(tuples(&index, None, "p", None), vec![id("p/a")]);
        assert_eq!(index.pending_len(&tx).unwrap(), 0);
    }

    #[test]
    fn short_lived_writes_go_straight_to_committed() {
        let index = index();
        let tx = TxScope::short_lived(TxId::new());
        index.add(&tx, child_row("p", "p/a", 0)).unwrap();
        assert_eq!(index.pending_len(&tx).unwrap(), 0);
        assert_eq!(tuples(&index, None, "p", None), vec![id("p/a")]);
        index.remove(&tx, &child_row("p", "p/a", 0).key(), at(5), false).unwrap();
        assert!(tuples(&index, None, "p", None).is_empty());
        assert_eq!(tuples(&index, None, "p", Some(&at(3))), vec![id("p/a")]);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn remove_cancels_pending_add() {
        let index = index();
        let tx = long();
        let row = child_row("p", "p/a", 0);
        index.add(&tx, row.clone()).unwrap();
        index.remove(&tx, &row.key(), at(1), false).unwrap();
        assert_eq!(index.pending_len(&tx).unwrap(), 0);
        index.commit(&tx).unwrap();
        assert_eq!(index.committed_len().unwrap(), 0);
    }

    #[test]
    fn add_cancels_pending_delete() {
        let index = index();
        let row = child_row("p", "p/a", 0);
        index.add(&TxScope::short_lived(TxId::new()), row.clone()).unwrap();

        let tx = long();
        index.remove(&tx, &row.key(), at(5), false).unwrap();
        assert!(tuples(&index, Some(&tx), "p", None).is_empty());
        index.add(&tx, child_row("p", "p/a", 6)).unwrap();
        assert_eq!(index.pending_len(&tx).unwrap(), 0);
        index.commit(&tx).unwrap();

        let rows = index.subject_rows(None, &id("p"), Window::Any).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].validity.is_open());
        assert_eq!(rows[0].validity.from, at(0));
    }

    #[test]
    fn duplicate_adds_collapse() {
        let index = index();
        let tx = long();
        index.add(&tx, child_row("p", "p/a", 0)).unwrap();
        index.add(&tx, child_row("p", "p/a", 1)).unwrap();
        assert_eq!(index.pending_len(&tx).unwrap(), 1);
        index.commit(&tx).unwrap();

        let again = long();
        index.add(&again, child_row("p", "p/a", 2)).unwrap();
        assert_eq!(index.pending_len(&again).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Commit semantics
    // -----------------------------------------------------------------------

    #[test]
    fn delete_closes_window_at_delete_instant() {
        let index = index();
        let row = child_row("p", "p/a", 0);
        index.add(&TxScope::short_lived(TxId::new()), row.clone()).unwrap();
        let tx = long();
        index.remove(&tx, &row.key(), at(10), false).unwrap();
        // Still open for everyone else until commit.
        assert_eq!(tuples(&index, None, "p", None), vec![id("p/a")]);
        index.commit(&tx).unwrap();

        assert!(tuples(&index, None, "p", None).is_empty());
        assert_eq!(tuples(&index, None, "p", Some(&at(9))), vec![id("p/a")]);
        assert!(tuples(&index, None, "p", Some(&at(10))).is_empty());
        assert_eq!(index.last_updated(None, &id("p")).unwrap(), Some(at(10)));
    }

    #[test]
    fn forced_delete_removes_closed_history() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        let row = child_row("p", "p/a", 0);
        index.add(&short, row.clone()).unwrap();
        index.remove(&short, &row.key(), at(5), false).unwrap();
        assert_eq!(index.committed_len().unwrap(), 1);

        let tx = long();
        index.remove(&tx, &row.key(), at(6), true).unwrap();
        assert!(index.subject_rows(Some(&tx), &id("p"), Window::Any).unwrap().is_empty());
        index.commit(&tx).unwrap();
        assert_eq!(index.committed_len().unwrap(), 0);
    }

    #[test]
    fn rollback_drops_pending_only() {
        let index = index();
        index.add(&TxScope::short_lived(TxId::new()), child_row("p", "p/a", 0)).unwrap();
        let tx = long();
        index.add(&tx, child_row("p", "p/b", 1)).unwrap();
        index.remove_matching(&tx, at(1), false, |_| true).unwrap();
        index.rollback(&tx).unwrap();
        assert_eq!(tuples(&index, Some(&tx), "p", None), vec![id("p/a")]);
        index.rollback(&tx).unwrap();
    }

    #[test]
    fn reset_clears_all_tables() {
        let index = index();
        let tx = long();
        index.add(&TxScope::short_lived(TxId::new()), child_row("p", "p/a", 0)).unwrap();
        index.add(&tx, child_row("p", "p/b", 0)).unwrap();
        index.reset().unwrap();
        assert_eq!(index.committed_len().unwrap(), 0);
        assert_eq!(index.pending_len(&tx).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Pagination
    // -----------------------------------------------------------------------

    #[test]
    fn read_is_ordered_deduplicated_and_paged() {
        let index = index();
        let short = TxScope::short_lived(TxId::new());
        for name in ["p/e", "p/c", "p/a", "p/d", "p/b"] {
            index.add(&short, child_row("p", name, 0)).unwrap();
        }
        // Same tuple from a second source.
        index
            .add(&short, IndexRow::new(id("p"), id("p/a"), id("other"), at(0)))
            .unwrap();
        let all = tuples(&index, None, "p", None);
        assert_eq!(all, ["p/a", "p/b", "p/c", "p/d", "p/e"].map(id).to_vec());

        let mut pages = index.read(None, &id("p"), None);
        assert_eq!(pages.by_ref().take(3).count(), 3);
        pages.restart();
        assert_eq!(pages.count(), 5);
    }

    proptest! {
        #[test]
        fn add_then_remove_in_one_tx_leaves_no_trace(names in proptest::collection::btree_set("[a-z]{1,6}", 1..8)) {
            let index = index();
            let tx = long();
            for name in &names {
                index.add(&tx, child_row("p", &format!("p/{name}"), 0)).unwrap();
            }
            for name in &names {
                index.remove(&tx, &child_row("p", &format!("p/{name}"), 0).key(), at(1), false).unwrap();
            }
            prop_assert_eq!(index.pending_len(&tx).unwrap(), 0);
            index.commit(&tx).unwrap();
            prop_assert_eq!(index.committed_len().unwrap(), 0);
        }

        #[test]
        fn remove_then_add_restores_committed_rows(names in proptest::collection::btree_set("[a-z]{1,6}", 1..8)) {
            let index = index();
            let short = TxScope::short_lived(TxId::new());
            for name in &names {
                index.add(&short, child_row("p", &format!("p/{name}"), 0)).unwrap();
            }
            let tx = long();
            index.remove_matching(&tx, at(3), false, |_| true).unwrap();
            for name in &names {
                index.add(&tx, child_row("p", &format!("p/{name}"), 4)).unwrap();
            }
            prop_assert_eq!(index.pending_len(&tx).unwrap(), 0);
            prop_assert_eq!(tuples(&index, Some(&tx), "p", None).len(), names.len());
        }
    }
}
