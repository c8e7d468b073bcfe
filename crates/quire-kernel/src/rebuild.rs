//! Recompute the derived indexes from the object store.
//!
//! The store is the source of truth. A full rebuild resets every index and
//! the mapping, then walks the head state of every store object. A scoped
//! rebuild does the same for a set of roots, which is how unresolved commit
//! intents are repaired.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use quire_index::IndexResult;
use quire_store::{ObjectSession, ResourceHeaders, ResourceReader, StorageSession, StoreMapping};
use quire_types::{ResourceId, TxId, TxScope, Validity};

use crate::context::RepositoryContext;
use crate::error::KernelResult;
use crate::membership::MembershipService;
use crate::resource::decode_graph;

/// What a rebuild pass touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub roots: usize,
    pub resources: usize,
    pub tombstones: usize,
    pub membership_containers: usize,
    pub membership_rows: usize,
}

pub struct Rebuilder {
    ctx: Arc<RepositoryContext>,
}

impl Rebuilder {
    pub fn new(ctx: Arc<RepositoryContext>) -> Self {
        Self { ctx }
    }

    /// Reset every index and recompute it from every store object.
    pub fn rebuild_all(&self) -> KernelResult<RebuildReport> {
        let ctx = &self.ctx;
        ctx.containment.reset()?;
        ctx.references.reset()?;
        ctx.membership.reset()?;
        ctx.mapping.reset()?;

        let object_ids = ctx.backend.object_ids()?;
        let roots = object_ids
            .iter()
            .map(|object_id| ResourceId::parse(object_id))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = TxScope::short_lived(TxId::new());
        let mut report = RebuildReport::default();
        let containers = self.index_roots(&scope, &roots, &mut report)?;
        self.replay_membership(&scope, containers, &mut report)?;
        ctx.reader.invalidate(&object_ids)?;
        info!(
            roots = report.roots,
            resources = report.resources,
            membership_rows = report.membership_rows,
            "indexes rebuilt"
        );
        Ok(report)
    }

    /// Replace the index entries of resources stored under `roots` with
    /// what the store currently holds.
    pub fn rebuild_roots(&self, roots: &[ResourceId]) -> KernelResult<RebuildReport> {
        let ctx = &self.ctx;
        let scope = TxScope::short_lived(TxId::new());
        let now = ctx.now();
        let roots: BTreeSet<ResourceId> = roots.iter().map(ResourceId::as_base).collect();
        let roots: Vec<ResourceId> = roots.into_iter().collect();

        let mut stale = BTreeSet::new();
        let mut parents = BTreeSet::new();
        for root in &roots {
            self.collect_indexed(&scope, root, root, &mut stale)?;
            for headers in self.head_of(root)? {
                stale.insert(headers.id.as_base());
                parents.extend(headers.parent.as_ref().map(ResourceId::as_base));
            }
        }
        for id in &stale {
            if let Some(parent) = ctx.containment.contained_by(Some(&scope), id)? {
                parents.insert(parent);
            }
            ctx.containment.purge_resource(&scope, id, now)?;
            ctx.references.purge_references(&scope, id, now)?;
            ctx.membership.delete_membership_for_source(&scope, id, now)?;
            ctx.mapping.remove(&scope, id)?;
        }

        let mut report = RebuildReport::default();
        let mut containers = self.index_roots(&scope, &roots, &mut report)?;
        let reader = self.reader(&scope);
        for parent in parents.difference(&stale) {
            if parent.is_root() {
                continue;
            }
            if let Ok(headers) = reader.read_headers(parent) {
                if headers.interaction_model.is_membership_container() {
                    ctx.membership.delete_membership_for_source(&scope, parent, now)?;
                    containers.insert(parent.clone(), headers);
                }
            }
        }
        self.replay_membership(&scope, containers, &mut report)?;
        let object_ids: Vec<String> = roots.iter().map(ResourceId::full_id).collect();
        ctx.reader.invalidate(&object_ids)?;
        info!(roots = roots.len(), resources = report.resources, "roots rebuilt");
        Ok(report)
    }

    /// Ids the containment index still records under `id` that belong to
    /// `root` or to no store object at all.
    fn collect_indexed(
        &self,
        scope: &TxScope,
        root: &ResourceId,
        id: &ResourceId,
        out: &mut BTreeSet<ResourceId>,
    ) -> KernelResult<()> {
        let containment = &self.ctx.containment;
        let mut children: Vec<ResourceId> = containment
            .contains(Some(scope), id, None)
            .collect::<IndexResult<_>>()?;
        children.extend(containment.contains_deleted(Some(scope), id)?);
        for child in children {
            let owned = match self.ctx.mapping.get(Some(scope), &child)? {
                Some(mapping) => mapping.root_id == *root,
                None => true,
            };
            if owned && out.insert(child.clone()) {
                self.collect_indexed(scope, root, &child, out)?;
            }
        }
        if !id.is_root() {
            out.insert(id.clone());
        }
        Ok(())
    }

    fn head_of(&self, root: &ResourceId) -> KernelResult<Vec<ResourceHeaders>> {
        let session = ObjectSession::new(root, self.ctx.backend.clone(), self.ctx.config.store.versioning);
        Ok(session.all_headers(None)?)
    }

    fn reader(&self, scope: &TxScope) -> StorageSession {
        StorageSession::new(
            *scope,
            self.ctx.backend.clone(),
            self.ctx.mapping.clone(),
            self.ctx.config.store.versioning,
        )
    }

    /// Index mappings, containment and references for every resource in
    /// `roots`. Returns the membership containers found.
    fn index_roots(
        &self,
        scope: &TxScope,
        roots: &[ResourceId],
        report: &mut RebuildReport,
    ) -> KernelResult<BTreeMap<ResourceId, ResourceHeaders>> {
        let ctx = &self.ctx;
        let mut containers = BTreeMap::new();
        for root in roots {
            let session = ObjectSession::new(root, ctx.backend.clone(), ctx.config.store.versioning);
            let all = session.all_headers(None)?;
            report.roots += 1;
            for headers in &all {
                ctx.mapping.add(scope, StoreMapping::new(&headers.id, &headers.root))?;
            }
            for headers in all {
                report.resources += 1;
                let id = headers.id.clone();
                if headers.is_tombstone() {
                    report.tombstones += 1;
                }
                if id.qualifier().is_none() {
                    if let Some(parent) = &headers.parent {
                        if headers.is_tombstone() {
                            let window = Validity::closed(headers.created, headers.last_modified);
                            ctx.containment.add_contained_by_window(scope, parent, &id, window)?;
                        } else {
                            ctx.containment.add_contained_by(scope, parent, &id, headers.created)?;
                        }
                    }
                }
                if !headers.is_tombstone() && headers.interaction_model.is_rdf() {
                    let graph = decode_graph(&session.read_content(&id, None)?.unwrap_or_default())?;
                    ctx.references
                        .update_references(scope, &id, &graph, headers.last_modified)?;
                }
                if id.qualifier().is_none() && headers.interaction_model.is_membership_container() {
                    containers.insert(id, headers);
                }
            }
            debug!(%root, "root indexed");
        }
        Ok(containers)
    }

    fn replay_membership(
        &self,
        scope: &TxScope,
        containers: BTreeMap<ResourceId, ResourceHeaders>,
        report: &mut RebuildReport,
    ) -> KernelResult<()> {
        let reader = self.reader(scope);
        let membership = MembershipService::new(&self.ctx, *scope, &reader);
        for headers in containers.values() {
            report.membership_rows += membership.populate_history(headers)?;
            report.membership_containers += 1;
        }
        Ok(())
    }
}
