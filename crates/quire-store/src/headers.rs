use serde::{Deserialize, Serialize};

use quire_types::{ContentDigest, Instant, InteractionModel, ResourceId};

use crate::error::StoreResult;

/// Machine-readable headers stored next to every resource's content.
///
/// Headers are the source of truth for rebuilding the derived indexes, so
/// they carry the parent link and the store-object root as well as the
/// usual timestamps and binary metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeaders {
    pub id: ResourceId,
    pub parent: Option<ResourceId>,
    /// Topmost ancestor owning the store object this resource lives in.
    pub root: ResourceId,
    pub interaction_model: InteractionModel,
    #[serde(default)]
    pub archival_group: bool,
    pub created: Instant,
    pub last_modified: Instant,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
    #[serde(default)]
    pub content_digest: Option<ContentDigest>,
    #[serde(default)]
    pub content_size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    /// Set once the resource has been deleted and only its tombstone remains.
    #[serde(default)]
    pub deleted: bool,
}

impl ResourceHeaders {
    /// Headers for a resource that is its own store-object root.
    pub fn new(id: ResourceId, model: InteractionModel, at: Instant) -> Self {
        let parent = id.parent();
        Self {
            root: id.as_base(),
            id,
            parent,
            interaction_model: model,
            archival_group: false,
            created: at,
            last_modified: at,
            created_by: None,
            last_modified_by: None,
            content_digest: None,
            content_size: None,
            mime_type: None,
            filename: None,
            deleted: false,
        }
    }

    /// Place the resource inside another store object.
    pub fn within(mut self, root: &ResourceId) -> Self {
        self.root = root.as_base();
        self
    }

    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn archival_group(mut self) -> Self {
        self.archival_group = true;
        self
    }

    pub fn created_by(mut self, principal: &str) -> Self {
        self.created_by = Some(principal.to_string());
        self.last_modified_by = Some(principal.to_string());
        self
    }

    /// Record digest and size of `content`.
    pub fn describe_content(mut self, content: &[u8]) -> Self {
        self.content_digest = Some(ContentDigest::compute(content));
        self.content_size = Some(content.len() as u64);
        self
    }

    /// Bump the modification stamp.
    pub fn touch(&mut self, at: Instant, principal: Option<&str>) {
        self.last_modified = at.max(self.created);
        if let Some(principal) = principal {
            self.last_modified_by = Some(principal.to_string());
        }
    }

    /// Turn these headers into a tombstone recorded at `at`.
    pub fn into_tombstone(mut self, at: Instant) -> Self {
        self.deleted = true;
        self.last_modified = at.max(self.created);
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// Whether this resource owns its own store object.
    pub fn is_object_root(&self) -> bool {
        self.root == self.id.as_base() && !self.id.is_description() && !self.id.is_acl()
    }

    pub fn to_json(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
