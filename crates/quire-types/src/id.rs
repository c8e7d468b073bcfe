use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::time::{format_memento_label, parse_memento_label, truncate_to_second, Instant};

/// Prefix of every resource id; also the id of the repository root.
pub const ROOT_ID: &str = "info:fedora";

/// Qualifier segment addressing a resource's description.
pub const DESCRIPTION_SEGMENT: &str = "fcr:metadata";
/// Qualifier segment addressing a resource's ACL.
pub const ACL_SEGMENT: &str = "fcr:acl";
/// Qualifier segment introducing a memento label.
pub const VERSIONS_SEGMENT: &str = "fcr:versions";

/// Segment names owned by the store layout.
pub const RESERVED_SEGMENTS: [&str; 3] = ["quire-root", ".quire", "quire-container.json"];
/// Segment suffixes owned by the store layout.
pub const RESERVED_SUFFIXES: [&str; 2] = ["-description", "-acl"];

/// Sub-resource or snapshot selector attached to a base id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    Description,
    Acl,
    Memento(Instant),
}

/// Hierarchical resource identifier.
///
/// A `ResourceId` is a base path under [`ROOT_ID`] plus at most one
/// [`Qualifier`]. Trailing slashes are ignored.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    base: String,
    qualifier: Option<Qualifier>,
}

impl ResourceId {
    /// The repository root.
    pub fn root() -> Self {
        Self {
            base: ROOT_ID.to_string(),
            qualifier: None,
        }
    }

    /// Parse a full (`info:fedora/...`) or root-relative (`a/b`) id.
    pub fn parse(raw: &str) -> TypeResult<Self> {
        let trimmed = raw.trim();
        let path = match trimmed.strip_prefix(ROOT_ID) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            Some(_) => return Err(TypeError::invalid_id(raw, "unexpected text after root prefix")),
            None => trimmed,
        };
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let segments: Vec<&str> = path.split('/').collect();
        let mut base_segments = Vec::with_capacity(segments.len());
        let mut qualifier = None;
        let mut iter = segments.iter().enumerate().peekable();
        while let Some((index, segment)) = iter.next() {
            if segment.is_empty() {
                return Err(TypeError::invalid_id(raw, "empty path segment"));
            }
            if qualifier.is_some() {
                return Err(TypeError::invalid_id(raw, "more than one qualifier"));
            }
            match *segment {
                DESCRIPTION_SEGMENT => qualifier = Some(Qualifier::Description),
                ACL_SEGMENT => qualifier = Some(Qualifier::Acl),
                VERSIONS_SEGMENT => {
                    let Some((_, label)) = iter.next() else {
                        return Err(TypeError::invalid_id(raw, "timemaps are not addressable"));
                    };
                    qualifier = Some(Qualifier::Memento(parse_memento_label(label)?));
                }
                other if other.starts_with("fcr:") => {
                    return Err(TypeError::invalid_id(raw, format!("unknown qualifier {other}")));
                }
                other => {
                    check_segment(raw, other)?;
                    base_segments.push(other);
                }
            }
            if qualifier.is_some() && index == 0 && segment != &ACL_SEGMENT {
                return Err(TypeError::invalid_id(raw, "only the ACL qualifier applies to the root"));
            }
        }

        let base = if base_segments.is_empty() {
            ROOT_ID.to_string()
        } else {
            format!("{ROOT_ID}/{}", base_segments.join("/"))
        };
        Ok(Self { base, qualifier })
    }

    /// The full id, including any qualifier.
    pub fn full_id(&self) -> String {
        self.to_string()
    }

    /// The id with any qualifier removed.
    pub fn base_id(&self) -> &str {
        &self.base
    }

    pub fn qualifier(&self) -> Option<Qualifier> {
        self.qualifier
    }

    pub fn is_root(&self) -> bool {
        self.base == ROOT_ID && self.qualifier.is_none()
    }

    pub fn is_description(&self) -> bool {
        matches!(self.qualifier, Some(Qualifier::Description))
    }

    pub fn is_acl(&self) -> bool {
        matches!(self.qualifier, Some(Qualifier::Acl))
    }

    pub fn is_memento(&self) -> bool {
        matches!(self.qualifier, Some(Qualifier::Memento(_)))
    }

    /// Instant carried by a memento id.
    pub fn memento_instant(&self) -> Option<Instant> {
        match self.qualifier {
            Some(Qualifier::Memento(at)) => Some(at),
            _ => None,
        }
    }

    /// The base resource this id addresses.
    pub fn as_base(&self) -> ResourceId {
        Self {
            base: self.base.clone(),
            qualifier: None,
        }
    }

    pub fn as_description(&self) -> ResourceId {
        self.with_qualifier(Qualifier::Description)
    }

    pub fn as_acl(&self) -> ResourceId {
        self.with_qualifier(Qualifier::Acl)
    }

    /// Memento of the base resource at `instant` (truncated to whole seconds).
    pub fn as_memento(&self, instant: Instant) -> ResourceId {
        self.with_qualifier(Qualifier::Memento(truncate_to_second(instant)))
    }

    /// Drop a memento qualifier, keep description/ACL ones.
    pub fn without_memento(&self) -> ResourceId {
        match self.qualifier {
            Some(Qualifier::Memento(_)) => self.as_base(),
            _ => self.clone(),
        }
    }

    fn with_qualifier(&self, qualifier: Qualifier) -> ResourceId {
        Self {
            base: self.base.clone(),
            qualifier: Some(qualifier),
        }
    }

    /// Resolve a child path segment (or several) below the base id.
    pub fn resolve(&self, child: &str) -> TypeResult<ResourceId> {
        let child = child.trim_matches('/');
        if child.is_empty() {
            return Err(TypeError::invalid_id(child, "empty child path"));
        }
        Self::parse(&format!("{}/{child}", self.base))
    }

    /// Root-relative path of the base id (`""` for the root).
    pub fn path(&self) -> &str {
        self.base
            .strip_prefix(ROOT_ID)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or("")
    }

    /// Path segments of the base id below the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path().split('/').filter(|s| !s.is_empty())
    }

    /// Containing resource: the base for qualified ids, the parent path otherwise.
    pub fn parent(&self) -> Option<ResourceId> {
        if self.qualifier.is_some() {
            return Some(self.as_base());
        }
        if self.is_root() {
            return None;
        }
        let parent = match self.base.rfind('/') {
            Some(idx) if idx > ROOT_ID.len() => self.base[..idx].to_string(),
            _ => ROOT_ID.to_string(),
        };
        Some(Self {
            base: parent,
            qualifier: None,
        })
    }

    /// Base ancestors strictly between the root and this resource, outermost first.
    pub fn ancestors(&self) -> Vec<ResourceId> {
        let segments: Vec<&str> = self.segments().collect();
        (1..segments.len())
            .map(|n| Self {
                base: format!("{ROOT_ID}/{}", segments[..n].join("/")),
                qualifier: None,
            })
            .collect()
    }

    /// `true` when `other`'s base lies strictly below this base id.
    pub fn is_ancestor_of(&self, other: &ResourceId) -> bool {
        if self.base == ROOT_ID {
            return other.base != ROOT_ID;
        }
        other
            .base
            .strip_prefix(&self.base)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn check_segment(raw: &str, segment: &str) -> TypeResult<()> {
    let reserved = RESERVED_SEGMENTS.contains(&segment)
        || RESERVED_SUFFIXES.iter().any(|suffix| segment.ends_with(suffix));
    if reserved {
        return Err(TypeError::ReservedSegment {
            id: raw.to_string(),
            segment: segment.to_string(),
        });
    }
    Ok(())
}

impl FromStr for ResourceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        match &self.qualifier {
            None => Ok(()),
            Some(Qualifier::Description) => write!(f, "/{DESCRIPTION_SEGMENT}"),
            Some(Qualifier::Acl) => write!(f, "/{ACL_SEGMENT}"),
            Some(Qualifier::Memento(at)) => {
                write!(f, "/{VERSIONS_SEGMENT}/{}", format_memento_label(at))
            }
        }
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({self})")
    }
}
