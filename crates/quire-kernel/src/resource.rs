use chrono::{DateTime, Utc};

use quire_store::{ResourceHeaders, ResourceReader, StoreError};
use quire_types::{Graph, Instant, InteractionModel, ResourceId};

use crate::error::{KernelError, KernelResult};

/// A stored resource as seen by callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Container { headers: ResourceHeaders, graph: Graph },
    Binary { headers: ResourceHeaders, content: Vec<u8> },
    /// RDF description of a binary.
    Description { headers: ResourceHeaders, graph: Graph },
    Acl { headers: ResourceHeaders, graph: Graph },
    /// What remains of a deleted resource until it is purged.
    Tombstone { headers: ResourceHeaders },
    /// The resource as it was at a sealed version.
    Memento { instant: Instant, resource: Box<Resource> },
}

impl Resource {
    /// Load `id` through `reader`. Memento ids load the matching version.
    ///
    /// The repository root is an implicit container until something is
    /// stored for it.
    pub fn load(reader: &dyn ResourceReader, id: &ResourceId) -> KernelResult<Self> {
        let headers = match reader.read_headers(id) {
            Ok(headers) => headers,
            Err(StoreError::NotFound(_)) if id.is_root() => {
                let epoch = DateTime::<Utc>::UNIX_EPOCH;
                return Ok(Self::Container {
                    headers: ResourceHeaders::new(ResourceId::root(), InteractionModel::BasicContainer, epoch),
                    graph: Graph::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let current = Self::from_parts(headers, reader.read_content(id)?)?;
        Ok(match id.memento_instant() {
            Some(instant) => Self::Memento {
                instant,
                resource: Box::new(current),
            },
            None => current,
        })
    }

    fn from_parts(headers: ResourceHeaders, content: Option<Vec<u8>>) -> KernelResult<Self> {
        if headers.is_tombstone() {
            return Ok(Self::Tombstone { headers });
        }
        let content = content.unwrap_or_default();
        Ok(match headers.interaction_model {
            InteractionModel::NonRdfSource => Self::Binary { headers, content },
            InteractionModel::NonRdfSourceDescription => Self::Description {
                graph: decode_graph(&content)?,
                headers,
            },
            InteractionModel::Acl => Self::Acl {
                graph: decode_graph(&content)?,
                headers,
            },
            _ => Self::Container {
                graph: decode_graph(&content)?,
                headers,
            },
        })
    }

    pub fn headers(&self) -> &ResourceHeaders {
        match self {
            Self::Container { headers, .. }
            | Self::Binary { headers, .. }
            | Self::Description { headers, .. }
            | Self::Acl { headers, .. }
            | Self::Tombstone { headers } => headers,
            Self::Memento { resource, .. } => resource.headers(),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.headers().id
    }

    pub fn graph(&self) -> Option<&Graph> {
        match self {
            Self::Container { graph, .. } | Self::Description { graph, .. } | Self::Acl { graph, .. } => Some(graph),
            Self::Memento { resource, .. } => resource.graph(),
            Self::Binary { .. } | Self::Tombstone { .. } => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }
}

/// Stored form of an RDF graph.
pub fn encode_graph(graph: &Graph) -> KernelResult<Vec<u8>> {
    Ok(serde_json::to_vec(graph)?)
}

pub fn decode_graph(data: &[u8]) -> KernelResult<Graph> {
    if data.is_empty() {
        return Ok(Graph::new());
    }
    serde_json::from_slice(data).map_err(KernelError::from)
}
