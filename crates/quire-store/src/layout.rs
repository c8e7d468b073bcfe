//! Deterministic file layout inside a store object.
//!
//! Every resource stored in a root's object gets one headers file under
//! [`HEADERS_DIR`] and (unless it is a deleted tombstone) one content file.
//! Paths derive only from the root-relative id, so they can be recomputed
//! from an id alone.

use quire_types::{InteractionModel, Qualifier, ResourceId};

use crate::error::{StoreError, StoreResult};

pub const HEADERS_DIR: &str = ".quire";
pub const ROOT_SEGMENT: &str = "quire-root";
pub const CONTAINER_CONTENT: &str = "quire-container.json";
pub const DESCRIPTION_SUFFIX: &str = "-description";
pub const ACL_SUFFIX: &str = "-acl";
const HEADERS_EXTENSION: &str = ".json";

/// Store object id for a root resource.
pub fn object_id_for(root: &ResourceId) -> String {
    root.as_base().full_id()
}

/// Headers file path for `id` inside the object rooted at `root`.
pub fn headers_path(root: &ResourceId, id: &ResourceId) -> StoreResult<String> {
    let key = match relative_path(root, id)? {
        rel if rel.is_empty() => ROOT_SEGMENT.to_string(),
        rel => rel,
    };
    Ok(format!("{HEADERS_DIR}/{key}{}{HEADERS_EXTENSION}", suffix(id)))
}

/// Content file path for `id` with interaction model `model`.
pub fn content_path(root: &ResourceId, id: &ResourceId, model: InteractionModel) -> StoreResult<String> {
    let rel = relative_path(root, id)?;
    if id.is_description() || id.is_acl() {
        let stem = if rel.is_empty() {
            root_stem(root)
        } else {
            rel
        };
        return Ok(format!("{stem}{}", suffix(id)));
    }
    if model.is_container() {
        return Ok(if rel.is_empty() {
            CONTAINER_CONTENT.to_string()
        } else {
            format!("{rel}/{CONTAINER_CONTENT}")
        });
    }
    Ok(if rel.is_empty() { root_stem(root) } else { rel })
}

/// Whether `path` is a headers file.
pub fn is_headers_path(path: &str) -> bool {
    path.starts_with(HEADERS_DIR) && path.ends_with(HEADERS_EXTENSION)
}

fn relative_path(root: &ResourceId, id: &ResourceId) -> StoreResult<String> {
    let base = id.as_base();
    let root = root.as_base();
    if base == root {
        return Ok(String::new());
    }
    if !root.is_ancestor_of(&base) {
        return Err(StoreError::OutsideRoot {
            id: id.clone(),
            root,
        });
    }
    let rel = base.path().strip_prefix(root.path()).unwrap_or(base.path());
    Ok(rel.trim_start_matches('/').to_string())
}

fn root_stem(root: &ResourceId) -> String {
    root.segments()
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| ROOT_SEGMENT.to_string())
}

fn suffix(id: &ResourceId) -> &'static str {
    match id.qualifier() {
        Some(Qualifier::Description) => DESCRIPTION_SUFFIX,
        Some(Qualifier::Acl) => ACL_SUFFIX,
        Some(Qualifier::Memento(_)) | None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn root_container_paths() {
        let root = id("ag");
        assert_eq!(headers_path(&root, &root).unwrap(), ".quire/quire-root.json");
        assert_eq!(
            content_path(&root, &root, InteractionModel::BasicContainer).unwrap(),
            "quire-container.json"
        );
        assert_eq!(headers_path(&root, &root.as_acl()).unwrap(), ".quire/quire-root-acl.json");
        assert_eq!(
            content_path(&root, &root.as_acl(), InteractionModel::Acl).unwrap(),
            "ag-acl"
        );
    }

    #[test]
    fn atomic_binary_paths() {
        let bin = id("a/bin");
        assert_eq!(content_path(&bin, &bin, InteractionModel::NonRdfSource).unwrap(), "bin");
        let desc = bin.as_description();
        assert_eq!(headers_path(&bin, &desc).unwrap(), ".quire/quire-root-description.json");
        assert_eq!(
            content_path(&bin, &desc, InteractionModel::NonRdfSourceDescription).unwrap(),
            "bin-description"
        );
    }

    #[test]
    fn archival_group_member_paths() {
        let root = id("ag");
        let child = id("ag/sub/file");
        assert_eq!(headers_path(&root, &child).unwrap(), ".quire/sub/file.json");
        assert_eq!(content_path(&root, &child, InteractionModel::NonRdfSource).unwrap(), "sub/file");
        let sub = id("ag/sub");
        assert_eq!(
            content_path(&root, &sub, InteractionModel::BasicContainer).unwrap(),
            "sub/quire-container.json"
        );
    }

    #[test]
    fn repository_root_uses_literal_segment() {
        let root = ResourceId::root();
        assert_eq!(headers_path(&root, &root).unwrap(), ".quire/quire-root.json");
        assert_eq!(content_path(&root, &root.as_acl(), InteractionModel::Acl).unwrap(), "quire-root-acl");
    }

    #[test]
    fn mementos_share_resource_paths() {
        let root = id("x");
        let memento = root.as_memento(chrono::Utc::now());
        assert_eq!(headers_path(&root, &memento).unwrap(), headers_path(&root, &root).unwrap());
    }

    #[test]
    fn outside_root_is_rejected() {
        let err = headers_path(&id("a"), &id("b/c")).unwrap_err();
        assert!(matches!(err, StoreError::OutsideRoot { .. }));
    }

    #[test]
    fn headers_path_detection() {
        assert!(is_headers_path(".quire/sub/file.json"));
        assert!(!is_headers_path("sub/quire-container.json"));
    }
}
