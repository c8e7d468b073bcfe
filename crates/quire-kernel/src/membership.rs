//! Membership computation for direct and indirect containers.
//!
//! A membership container turns each child into one triple on its
//! membership resource. The rows carry validity windows so that mementos of
//! the membership resource see the members they had at that instant.

use tracing::debug;

use quire_index::{Link, MembershipEntry, IndexResult};
use quire_store::{ResourceHeaders, ResourceReader, StoreError, VersioningPolicy};
use quire_types::{vocab, Graph, Instant, InteractionModel, ResourceId, TxScope, Validity};

use crate::context::RepositoryContext;
use crate::error::KernelResult;
use crate::resource::decode_graph;

/// Membership settings of a container at some point in its history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipConfig {
    pub membership_resource: ResourceId,
    pub has_member: Option<String>,
    pub is_member_of: Option<String>,
    pub inserted_content_relation: Option<String>,
    pub indirect: bool,
}

impl MembershipConfig {
    /// Read the settings from a container's graph. The membership resource
    /// defaults to the container itself.
    pub fn from_graph(container: &ResourceId, model: InteractionModel, graph: &Graph) -> Self {
        let iri = |predicate: &str| graph.first_object(predicate).and_then(|t| t.as_iri()).map(str::to_string);
        Self {
            membership_resource: graph
                .first_object(vocab::MEMBERSHIP_RESOURCE)
                .and_then(|t| t.as_resource())
                .unwrap_or_else(|| container.as_base()),
            has_member: iri(vocab::HAS_MEMBER_RELATION),
            is_member_of: iri(vocab::IS_MEMBER_OF_RELATION),
            inserted_content_relation: iri(vocab::INSERTED_CONTENT_RELATION),
            indirect: model == InteractionModel::IndirectContainer,
        }
    }

    /// Whether members come from a property of the child rather than the
    /// child itself.
    fn reads_child_graph(&self) -> bool {
        self.indirect
            && self
                .inserted_content_relation
                .as_deref()
                .is_some_and(|relation| relation != vocab::MEMBER_SUBJECT)
    }

    /// The triple `child` contributes, if any, as `(subject, link)`.
    fn triple_for(&self, child: &ResourceId, child_graph: Option<&Graph>) -> Option<(ResourceId, Link)> {
        let member = match &self.inserted_content_relation {
            Some(relation) if self.reads_child_graph() => child_graph?.first_object(relation)?.as_resource()?,
            _ => child.as_base(),
        };
        match &self.is_member_of {
            Some(relation) => Some((member, Link::new(relation.clone(), self.membership_resource.clone()))),
            None => {
                let relation = self.has_member.clone().unwrap_or_else(|| vocab::MEMBER.to_string());
                Some((self.membership_resource.clone(), Link::new(relation, member)))
            }
        }
    }
}

/// One stretch of a container's history with unchanged settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub config: MembershipConfig,
    pub validity: Validity,
}

/// Computes and stages membership rows for one transaction.
pub struct MembershipService<'a> {
    ctx: &'a RepositoryContext,
    scope: TxScope,
    reader: &'a dyn ResourceReader,
}

impl<'a> MembershipService<'a> {
    pub fn new(ctx: &'a RepositoryContext, scope: TxScope, reader: &'a dyn ResourceReader) -> Self {
        Self { ctx, scope, reader }
    }

    fn headers(&self, id: &ResourceId) -> KernelResult<Option<ResourceHeaders>> {
        if id.is_root() {
            return Ok(None);
        }
        match self.reader.read_headers(id) {
            Ok(headers) => Ok(Some(headers)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn membership_container(&self, id: &ResourceId) -> KernelResult<Option<ResourceHeaders>> {
        Ok(self
            .headers(id)?
            .filter(|h| h.interaction_model.is_membership_container()))
    }

    fn graph_at(&self, id: &ResourceId) -> KernelResult<Graph> {
        decode_graph(&self.reader.read_content(id)?.unwrap_or_default())
    }

    /// The graph describing `child`: its own, or its description's for a
    /// binary. Deleted children use their last live version.
    fn child_graph(&self, child: &ResourceHeaders) -> KernelResult<Option<Graph>> {
        let id = if child.interaction_model.is_binary() {
            child.id.as_description()
        } else {
            child.id.clone()
        };
        if !child.is_tombstone() {
            return match self.reader.read_content(&id) {
                Ok(content) => decode_graph(&content.unwrap_or_default()).map(Some),
                Err(StoreError::NotFound(_)) => Ok(None),
                Err(e) => Err(e.into()),
            };
        }
        let versions = match self.reader.list_versions(&id) {
            Ok(versions) => versions,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match versions.last() {
            Some(last) => self.graph_at(&id.as_memento(last.created)).map(Some),
            None => Ok(None),
        }
    }

    fn child_lifetime(child: &ResourceHeaders) -> Validity {
        if child.is_tombstone() {
            Validity::closed(child.created, child.last_modified)
        } else {
            Validity::open(child.created)
        }
    }

    fn add_rows(
        &self,
        source: &ResourceId,
        config: &MembershipConfig,
        child: &ResourceHeaders,
        window: &Validity,
    ) -> KernelResult<usize> {
        let Some(validity) = Self::child_lifetime(child).intersect(window) else {
            return Ok(0);
        };
        let graph = if config.reads_child_graph() {
            self.child_graph(child)?
        } else {
            None
        };
        let Some((subject, link)) = config.triple_for(&child.id, graph.as_ref()) else {
            return Ok(0);
        };
        self.ctx.membership.add_membership(
            &self.scope,
            source,
            MembershipEntry {
                subject,
                link,
                proxy: child.id.as_base(),
                validity,
            },
        )?;
        Ok(1)
    }

    /// Current settings of `container`.
    fn current_config(&self, container: &ResourceHeaders) -> KernelResult<MembershipConfig> {
        let graph = self.graph_at(&container.id)?;
        Ok(MembershipConfig::from_graph(&container.id, container.interaction_model, &graph))
    }

    /// Settings history of `container` built from its mementos and its
    /// current state, collapsed to the instants where a setting changed.
    pub fn timeline(&self, container: &ResourceHeaders) -> KernelResult<Vec<TimelineEntry>> {
        let mut points: Vec<(Instant, MembershipConfig)> = Vec::new();
        for version in self.reader.list_versions(&container.id)? {
            let memento = container.id.as_memento(version.created);
            let headers = self.reader.read_headers(&memento)?;
            let graph = self.graph_at(&memento)?;
            points.push((
                headers.last_modified,
                MembershipConfig::from_graph(&container.id, headers.interaction_model, &graph),
            ));
        }
        if !container.is_tombstone() {
            points.push((container.last_modified, self.current_config(container)?));
        }
        points.sort_by_key(|(at, _)| *at);
        if let Some(first) = points.first_mut() {
            first.0 = container.created;
        }
        points.dedup_by(|later, earlier| later.1 == earlier.1);

        let end = container.is_tombstone().then_some(container.last_modified);
        let mut entries = Vec::with_capacity(points.len());
        for (i, (from, config)) in points.iter().enumerate() {
            let to = points.get(i + 1).map(|(next, _)| *next).or(end);
            let validity = Validity { from: *from, to };
            if !validity.is_empty() {
                entries.push(TimelineEntry {
                    config: config.clone(),
                    validity,
                });
            }
        }
        Ok(entries)
    }

    /// Children ever contained by `container` that still have headers.
    fn children(&self, container: &ResourceId) -> KernelResult<Vec<ResourceHeaders>> {
        let containment = &self.ctx.containment;
        let mut ids: Vec<ResourceId> = containment
            .contains(Some(&self.scope), container, None)
            .collect::<IndexResult<_>>()?;
        ids.extend(containment.contains_deleted(Some(&self.scope), container)?);
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(headers) = self.headers(&id)? {
                children.push(headers);
            }
        }
        Ok(children)
    }

    /// Replay `container`'s whole history into rows.
    pub fn populate_history(&self, container: &ResourceHeaders) -> KernelResult<usize> {
        let timeline = self.timeline(container)?;
        let children = self.children(&container.id)?;
        let mut added = 0;
        for entry in &timeline {
            for child in &children {
                added += self.add_rows(&container.id, &entry.config, child, &entry.validity)?;
            }
        }
        debug!(container = %container.id, entries = timeline.len(), children = children.len(), added, "membership history populated");
        Ok(added)
    }

    /// Recompute every row `container` produced.
    pub fn recompute(&self, container: &ResourceHeaders, at: Instant) -> KernelResult<usize> {
        self.ctx
            .membership
            .delete_membership_for_source(&self.scope, &container.id, at)?;
        self.populate_history(container)
    }

    /// React to the container's own settings or state changing.
    fn container_changed(&self, container: &ResourceHeaders) -> KernelResult<()> {
        let at = container.last_modified;
        match self.ctx.config.store.versioning {
            VersioningPolicy::AutoVersion => {
                self.ctx
                    .membership
                    .end_membership_for_source(&self.scope, &container.id, at)?;
                let config = self.current_config(container)?;
                let window = Validity::open(at);
                for child in self.children(&container.id)? {
                    if !child.is_tombstone() {
                        self.add_rows(&container.id, &config, &child, &window)?;
                    }
                }
                Ok(())
            }
            VersioningPolicy::OnDemand => self.recompute(container, at).map(|_| ()),
        }
    }

    /// React to `child` of membership container `parent` being created or
    /// changed.
    fn child_changed(&self, parent: &ResourceHeaders, child: &ResourceHeaders) -> KernelResult<()> {
        let at = child.last_modified;
        self.ctx
            .membership
            .end_membership_from_child(&self.scope, &parent.id, &child.id, at)?;
        let config = self.current_config(parent)?;
        self.add_rows(&parent.id, &config, child, &Validity::open(at))?;
        Ok(())
    }

    /// Called after `id` (a resource or its description) was created or
    /// modified.
    pub fn resource_modified(&self, id: &ResourceId) -> KernelResult<()> {
        if id.is_acl() {
            return Ok(());
        }
        let base = id.as_base();
        let Some(headers) = self.headers(&base)? else {
            return Ok(());
        };
        if headers.interaction_model.is_membership_container() && !id.is_description() {
            self.container_changed(&headers)?;
        }
        if let Some(parent) = headers.parent.as_ref() {
            if let Some(parent) = self.membership_container(parent)? {
                self.child_changed(&parent, &headers)?;
            }
        }
        Ok(())
    }

    /// Called after `id` was deleted at `at`.
    pub fn resource_deleted(&self, headers: &ResourceHeaders, at: Instant) -> KernelResult<()> {
        let membership = &self.ctx.membership;
        if headers.interaction_model.is_membership_container() {
            membership.end_membership_for_source(&self.scope, &headers.id, at)?;
        }
        if let Some(parent) = headers.parent.as_ref() {
            if self.membership_container(parent)?.is_some() {
                membership.end_membership_from_child(&self.scope, parent, &headers.id, at)?;
            }
        }
        Ok(())
    }

    /// Called after `id` was purged: no trace of it may remain.
    pub fn resource_purged(&self, id: &ResourceId, at: Instant) -> KernelResult<()> {
        self.ctx.membership.delete_membership_references(&self.scope, id, at)?;
        Ok(())
    }
}
