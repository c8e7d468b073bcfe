//! Resource operations performed inside a transaction.
//!
//! Every mutating call stages store content and index deltas in the given
//! transaction, recomputes membership where relevant, and records an event.
//! Short-lived transactions commit at the end of the call.

use std::sync::Arc;

use tracing::{debug, warn};

use quire_index::{IndexResult, MembershipEntry};
use quire_store::{ResourceHeaders, ResourceReader, StorageSession, StoreError, VersionInfo};
use quire_types::{ContentDigest, Graph, Instant, InteractionModel, ResourceId, Triple, TxScope};

use crate::collab::{EventOperation, ResourceEvent};
use crate::context::RepositoryContext;
use crate::error::{KernelError, KernelResult};
use crate::membership::MembershipService;
use crate::resource::{decode_graph, encode_graph, Resource};
use crate::transaction::Transaction;

/// New content for a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Rdf(Graph),
    Binary {
        data: Vec<u8>,
        mime_type: Option<String>,
        filename: Option<String>,
        /// Digest the caller expects `data` to have.
        expected_digest: Option<ContentDigest>,
    },
}

impl Content {
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary {
            data: data.into(),
            mime_type: None,
            filename: None,
            expected_digest: None,
        }
    }

    fn fits(&self, model: InteractionModel) -> bool {
        match self {
            Self::Rdf(_) => model.is_rdf(),
            Self::Binary { .. } => model.is_binary(),
        }
    }
}

/// Arguments of [`ResourceService::create`].
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub model: InteractionModel,
    pub content: Content,
    pub archival_group: bool,
}

impl CreateRequest {
    pub fn container(model: InteractionModel, graph: Graph) -> Self {
        Self {
            model,
            content: Content::Rdf(graph),
            archival_group: false,
        }
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            model: InteractionModel::NonRdfSource,
            content: Content::binary(data),
            archival_group: false,
        }
    }

    pub fn archival_group(mut self) -> Self {
        self.archival_group = true;
        self
    }
}

fn read_optional(reader: &dyn ResourceReader, id: &ResourceId) -> KernelResult<Option<ResourceHeaders>> {
    match reader.read_headers(id) {
        Ok(headers) => Ok(Some(headers)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_live(reader: &dyn ResourceReader, id: &ResourceId) -> KernelResult<ResourceHeaders> {
    match read_optional(reader, id)? {
        Some(headers) if headers.is_tombstone() => Err(KernelError::NotFound(format!("{id} has been deleted"))),
        Some(headers) => Ok(headers),
        None => Err(KernelError::NotFound(id.to_string())),
    }
}

/// Per-call state shared by the staging helpers.
struct Work<'a> {
    tx: &'a Transaction,
    scope: TxScope,
    storage: Arc<StorageSession>,
    principal: &'a str,
    now: Instant,
}

impl Work<'_> {
    fn reader(&self) -> &dyn ResourceReader {
        self.storage.as_ref()
    }
}

/// Create, change, delete and read resources.
pub struct ResourceService {
    ctx: Arc<RepositoryContext>,
}

impl ResourceService {
    pub fn new(ctx: Arc<RepositoryContext>) -> Self {
        Self { ctx }
    }

    fn begin_work<'a>(&self, tx: &'a Transaction, principal: &'a str) -> KernelResult<Work<'a>> {
        Ok(Work {
            tx,
            scope: tx.ensure_usable("write")?,
            storage: tx.storage()?,
            principal,
            now: self.ctx.now(),
        })
    }

    fn membership<'a>(&'a self, work: &'a Work<'_>) -> MembershipService<'a> {
        MembershipService::new(&self.ctx, work.scope, work.reader())
    }

    /// Report a change to search and the event accumulator. Neither can
    /// fail the operation.
    fn notify(&self, work: &Work<'_>, headers: &ResourceHeaders, operation: EventOperation) {
        let collaborators = &self.ctx.collaborators;
        let search = match operation {
            EventOperation::Delete | EventOperation::Purge => collaborators.search.remove(&work.scope, &headers.id),
            EventOperation::Create | EventOperation::Update => collaborators.search.add_update(&work.scope, headers),
        };
        if let Err(e) = search {
            warn!(tx = %work.scope.id, id = %headers.id, error = %e, "search index update failed");
        }
        let event = ResourceEvent::new(work.scope.id, headers.id.clone(), operation, work.principal, work.now);
        if let Err(e) = collaborators.events.record(event) {
            warn!(tx = %work.scope.id, id = %headers.id, error = %e, "failed to record event");
        }
    }

    // ---- Create ----

    /// Create `id` under its closest existing container.
    pub fn create(
        &self,
        tx: &Transaction,
        principal: &str,
        id: &ResourceId,
        request: CreateRequest,
    ) -> KernelResult<ResourceHeaders> {
        tx.do_in_tx(|tx| self.perform_create(tx, principal, id, request))
    }

    fn perform_create(
        &self,
        tx: &Transaction,
        principal: &str,
        id: &ResourceId,
        request: CreateRequest,
    ) -> KernelResult<ResourceHeaders> {
        if id.is_root() || id.qualifier().is_some() {
            return Err(KernelError::Conflict(format!("{id} cannot be created directly")));
        }
        if !(request.model.is_container() || request.model.is_binary()) || !request.content.fits(request.model) {
            return Err(KernelError::Conflict(format!(
                "content does not fit interaction model {}",
                request.model
            )));
        }
        tx.lock_resource_and_placeholders(id)?;
        let work = self.begin_work(tx, principal)?;
        match read_optional(work.reader(), id)? {
            Some(existing) if existing.is_tombstone() => {
                return Err(KernelError::Conflict(format!("{id} has a tombstone; purge it first")));
            }
            Some(_) => return Err(KernelError::Conflict(format!("{id} already exists"))),
            None => {}
        }

        let containment = &self.ctx.containment;
        if !request.model.is_container() && containment.has_resources_starting_with(Some(&work.scope), id)? {
            return Err(KernelError::Conflict(format!("{id} has resources below it and must be a container")));
        }
        let parent = containment.container_of_path(Some(&work.scope), id, false)?;
        let nearest = containment.container_of_path(Some(&work.scope), id, true)?;
        if nearest != parent {
            return Err(KernelError::Conflict(format!("{id} would be created under deleted {nearest}")));
        }
        let parent_headers = read_optional(work.reader(), &parent)?;
        let root = match &parent_headers {
            Some(p) if !p.interaction_model.is_container() => {
                return Err(KernelError::Conflict(format!("{parent} is not a container")));
            }
            Some(p) if p.archival_group && p.is_object_root() => Some(p.id.as_base()),
            Some(p) if !p.is_object_root() => Some(p.root.clone()),
            _ => None,
        };
        if request.archival_group && root.is_some() {
            return Err(KernelError::Conflict(format!("archival group {id} cannot be nested")));
        }

        let mut headers = ResourceHeaders::new(id.clone(), request.model, work.now)
            .with_parent(parent.clone())
            .created_by(principal);
        if let Some(root) = &root {
            headers = headers.within(root);
        }
        if request.archival_group {
            headers = headers.archival_group();
        }
        let headers = self.stage_content(&work, headers, &request.content)?;
        if request.model.is_binary() {
            let description = ResourceHeaders::new(id.as_description(), InteractionModel::NonRdfSourceDescription, work.now)
                .with_parent(id.clone())
                .within(&headers.root)
                .created_by(principal);
            work.storage.stage_resource(&description, Some(&encode_graph(&Graph::new())?))?;
        }

        containment.add_contained_by(&work.scope, &parent, id, work.now)?;
        self.membership(&work).resource_modified(id)?;
        self.notify(&work, &headers, EventOperation::Create);
        debug!(tx = %work.scope.id, %id, %parent, root = %headers.root, "resource created");
        Ok(headers)
    }

    /// Stage `content` for `headers` and index its references.
    fn stage_content(
        &self,
        work: &Work<'_>,
        mut headers: ResourceHeaders,
        content: &Content,
    ) -> KernelResult<ResourceHeaders> {
        match content {
            Content::Rdf(graph) => {
                work.storage.stage_resource(&headers, Some(&encode_graph(graph)?))?;
                self.ctx
                    .references
                    .update_references(&work.scope, &headers.id, graph, work.now)?;
            }
            Content::Binary {
                data,
                mime_type,
                filename,
                expected_digest,
            } => {
                headers = headers.describe_content(data);
                if let Some(expected) = expected_digest {
                    headers.content_digest = Some(*expected);
                }
                headers.mime_type = mime_type.clone();
                headers.filename = filename.clone();
                work.storage.stage_resource(&headers, Some(data))?;
            }
        }
        Ok(headers)
    }

    // ---- Replace / update ----

    /// Replace the content of `id`. Replacing a missing ACL creates it.
    pub fn replace(
        &self,
        tx: &Transaction,
        principal: &str,
        id: &ResourceId,
        content: Content,
    ) -> KernelResult<ResourceHeaders> {
        tx.do_in_tx(|tx| self.perform_replace(tx, principal, id, content))
    }

    /// Apply `patch` to the graph of `id`.
    pub fn update(
        &self,
        tx: &Transaction,
        principal: &str,
        id: &ResourceId,
        patch: impl FnOnce(&mut Graph),
    ) -> KernelResult<ResourceHeaders> {
        tx.do_in_tx(|tx| {
            tx.lock_resource(id)?;
            let storage = tx.storage()?;
            let headers = read_live(storage.as_ref(), id)?;
            if !headers.interaction_model.is_rdf() {
                return Err(KernelError::Conflict(format!("{id} is not an RDF source")));
            }
            let mut graph = decode_graph(&storage.read_content(id)?.unwrap_or_default())?;
            patch(&mut graph);
            self.perform_replace(tx, principal, id, Content::Rdf(graph))
        })
    }

    fn perform_replace(
        &self,
        tx: &Transaction,
        principal: &str,
        id: &ResourceId,
        content: Content,
    ) -> KernelResult<ResourceHeaders> {
        if id.is_memento() {
            return Err(KernelError::Conflict(format!("memento {id} is immutable")));
        }
        tx.lock_resource(id)?;
        let work = self.begin_work(tx, principal)?;
        let (mut headers, operation) = match read_optional(work.reader(), id)? {
            Some(headers) if headers.is_tombstone() => {
                return Err(KernelError::NotFound(format!("{id} has been deleted")));
            }
            Some(headers) => (headers, EventOperation::Update),
            None if id.is_acl() => (self.new_acl_headers(&work, id)?, EventOperation::Create),
            None => return Err(KernelError::NotFound(id.to_string())),
        };
        if !content.fits(headers.interaction_model) {
            return Err(KernelError::Conflict(format!(
                "content does not fit interaction model {} of {id}",
                headers.interaction_model
            )));
        }
        headers.touch(work.now, Some(principal));
        let headers = self.stage_content(&work, headers, &content)?;
        if id.is_description() {
            let mut described = read_live(work.reader(), &id.as_base())?;
            described.touch(work.now, Some(principal));
            work.storage.stage_resource(&described, None)?;
        }

        self.membership(&work).resource_modified(id)?;
        if id.is_acl() {
            self.ctx.collaborators.authorization.invalidate(&id.as_base());
        }
        self.notify(&work, &headers, operation);
        debug!(tx = %work.scope.id, %id, "resource replaced");
        Ok(headers)
    }

    fn new_acl_headers(&self, work: &Work<'_>, id: &ResourceId) -> KernelResult<ResourceHeaders> {
        let base = id.as_base();
        let root = if base.is_root() && read_optional(work.reader(), &base)?.is_none() {
            base.clone()
        } else {
            read_live(work.reader(), &base)?.root
        };
        Ok(ResourceHeaders::new(id.clone(), InteractionModel::Acl, work.now)
            .with_parent(base)
            .within(&root)
            .created_by(work.principal))
    }

    // ---- Delete ----

    /// Delete `id` and everything it contains, leaving tombstones. ACLs are
    /// removed outright. Deleting a description deletes its binary.
    pub fn delete(&self, tx: &Transaction, principal: &str, id: &ResourceId) -> KernelResult<()> {
        tx.do_in_tx(|tx| self.perform_delete(tx, principal, id))
    }

    fn perform_delete(&self, tx: &Transaction, principal: &str, id: &ResourceId) -> KernelResult<()> {
        if id.is_root() || id.is_memento() {
            return Err(KernelError::Conflict(format!("{id} cannot be deleted")));
        }
        tx.lock_resource(id)?;
        let work = self.begin_work(tx, principal)?;
        if id.is_acl() {
            let headers = read_live(work.reader(), id)?;
            self.remove_acl(&work, &headers)?;
            self.notify(&work, &headers, EventOperation::Delete);
            return Ok(());
        }
        let headers = read_live(work.reader(), &id.as_base())?;
        self.delete_tree(&work, headers)
    }

    fn remove_acl(&self, work: &Work<'_>, acl: &ResourceHeaders) -> KernelResult<()> {
        work.storage.stage_purge(acl)?;
        self.ctx
            .references
            .delete_all_references(&work.scope, &acl.id, work.now)?;
        self.ctx.collaborators.authorization.invalidate(&acl.id.as_base());
        Ok(())
    }

    fn delete_tree(&self, work: &Work<'_>, headers: ResourceHeaders) -> KernelResult<()> {
        let id = headers.id.clone();
        let children: Vec<ResourceId> = self
            .ctx
            .containment
            .contains(Some(&work.scope), &id, None)
            .collect::<IndexResult<_>>()?;
        for child in children {
            work.tx.lock_resource(&child)?;
            if let Some(child_headers) = read_optional(work.reader(), &child)? {
                if !child_headers.is_tombstone() {
                    self.delete_tree(work, child_headers)?;
                }
            }
        }

        if let Some(acl) = read_optional(work.reader(), &id.as_acl())? {
            self.remove_acl(work, &acl)?;
        }
        if headers.interaction_model.is_binary() {
            if let Some(description) = read_optional(work.reader(), &id.as_description())? {
                work.storage.stage_delete(&description.clone().into_tombstone(work.now))?;
                self.ctx
                    .references
                    .delete_all_references(&work.scope, &description.id, work.now)?;
            }
        }

        let mut tombstone = headers;
        tombstone.touch(work.now, Some(work.principal));
        let tombstone = tombstone.into_tombstone(work.now);
        work.storage.stage_delete(&tombstone)?;
        self.ctx.containment.remove_resource(&work.scope, &id, work.now)?;
        self.ctx.references.delete_all_references(&work.scope, &id, work.now)?;
        self.membership(work).resource_deleted(&tombstone, work.now)?;
        self.notify(work, &tombstone, EventOperation::Delete);
        debug!(tx = %work.scope.id, %id, "resource deleted");
        Ok(())
    }

    // ---- Purge ----

    /// Remove every trace of deleted resource `id` and its contents.
    pub fn purge(&self, tx: &Transaction, principal: &str, id: &ResourceId) -> KernelResult<()> {
        tx.do_in_tx(|tx| self.perform_purge(tx, principal, id))
    }

    fn perform_purge(&self, tx: &Transaction, principal: &str, id: &ResourceId) -> KernelResult<()> {
        if id.is_root() || id.qualifier().is_some() {
            return Err(KernelError::Conflict(format!("{id} cannot be purged")));
        }
        tx.lock_resource(id)?;
        let work = self.begin_work(tx, principal)?;
        let headers = read_optional(work.reader(), id)?.ok_or_else(|| KernelError::NotFound(id.to_string()))?;
        if !headers.is_tombstone() {
            return Err(KernelError::Conflict(format!("{id} must be deleted before it is purged")));
        }
        self.purge_tree(&work, headers)
    }

    fn purge_tree(&self, work: &Work<'_>, headers: ResourceHeaders) -> KernelResult<()> {
        let id = headers.id.clone();
        for child in self.ctx.containment.contains_deleted(Some(&work.scope), &id)? {
            work.tx.lock_resource(&child)?;
            if let Some(child_headers) = read_optional(work.reader(), &child)? {
                self.purge_tree(work, child_headers)?;
            }
        }
        if headers.interaction_model.is_binary() {
            let description = id.as_description();
            if let Some(description_headers) = read_optional(work.reader(), &description)? {
                work.storage.stage_purge(&description_headers)?;
                self.ctx
                    .references
                    .purge_references(&work.scope, &description, work.now)?;
            }
        }

        work.storage.stage_purge(&headers)?;
        self.ctx.containment.purge_resource(&work.scope, &id, work.now)?;
        self.ctx.references.purge_references(&work.scope, &id, work.now)?;
        self.membership(work).resource_purged(&id, work.now)?;
        self.notify(work, &headers, EventOperation::Purge);
        debug!(tx = %work.scope.id, %id, "resource purged");
        Ok(())
    }

    // ---- Versions ----

    /// Seal a memento of `id`'s store object when the transaction commits.
    pub fn create_version(&self, tx: &Transaction, principal: &str, id: &ResourceId) -> KernelResult<()> {
        tx.do_in_tx(|tx| {
            tx.lock_resource(id)?;
            let work = self.begin_work(tx, principal)?;
            read_live(work.reader(), &id.as_base())?;
            work.storage.create_version(id)?;
            debug!(tx = %work.scope.id, %id, "version requested");
            Ok(())
        })
    }

    // ---- Reads ----

    fn with_reader<T>(
        &self,
        tx: Option<&Transaction>,
        read: impl FnOnce(&dyn ResourceReader, Option<&TxScope>) -> KernelResult<T>,
    ) -> KernelResult<T> {
        match tx {
            Some(tx) => {
                let scope = tx.ensure_usable("read")?;
                let storage = tx.storage()?;
                read(storage.as_ref(), Some(&scope))
            }
            None => read(&self.ctx.reader, None),
        }
    }

    /// Load `id` as `tx` sees it, or as committed when `tx` is `None`.
    pub fn get(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Resource> {
        self.with_reader(tx, |reader, _| Resource::load(reader, id))
    }

    /// Children of container `id`. A memento id lists the children it had
    /// at its instant.
    pub fn children(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<ResourceId>> {
        let as_of = id.memento_instant();
        self.with_reader(tx, |_, scope| {
            Ok(self
                .ctx
                .containment
                .contains(scope, &id.as_base(), as_of.as_ref())
                .collect::<IndexResult<_>>()?)
        })
    }

    /// Membership triples whose subject is `id`.
    pub fn membership_of(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<Triple>> {
        self.with_reader(tx, |_, scope| Ok(self.ctx.membership.membership(scope, id, None)?))
    }

    /// Every membership row container `id` has produced, closed windows
    /// included.
    pub fn membership_history(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<MembershipEntry>> {
        self.with_reader(tx, |_, scope| Ok(self.ctx.membership.entries_for_source(scope, id)?))
    }

    /// Latest change to the children of `id` or to the membership it is
    /// the subject of. Neither shows up in `id`'s own headers.
    pub fn derived_last_modified(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Option<Instant>> {
        self.with_reader(tx, |_, scope| {
            let children = self.ctx.containment.last_updated(scope, id)?;
            let membership = self.ctx.membership.last_updated(scope, id)?;
            Ok(children.max(membership))
        })
    }

    /// References `id`'s graph holds to other resources.
    pub fn outbound_references(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<Triple>> {
        self.with_reader(tx, |_, scope| Ok(self.ctx.references.outbound(scope, id)?))
    }

    /// References other resources hold to `id`.
    pub fn inbound_references(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<Triple>> {
        self.with_reader(tx, |_, scope| Ok(self.ctx.references.inbound(scope, id)?))
    }

    /// Mementos of `id`, oldest first.
    pub fn versions(&self, tx: Option<&Transaction>, id: &ResourceId) -> KernelResult<Vec<VersionInfo>> {
        self.with_reader(tx, |reader, _| Ok(reader.list_versions(id)?))
    }
}
