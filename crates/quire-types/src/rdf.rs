//! Minimal RDF term model: enough to carry a resource's graph through the
//! store and to derive references and membership from it.

use serde::{Deserialize, Serialize};

use crate::id::{ResourceId, ROOT_ID};

/// Well-known predicates and classes.
pub mod vocab {
    pub const LDP: &str = "http://www.w3.org/ns/ldp#";
    pub const MEMBER: &str = "http://www.w3.org/ns/ldp#member";
    pub const MEMBERSHIP_RESOURCE: &str = "http://www.w3.org/ns/ldp#membershipResource";
    pub const HAS_MEMBER_RELATION: &str = "http://www.w3.org/ns/ldp#hasMemberRelation";
    pub const IS_MEMBER_OF_RELATION: &str = "http://www.w3.org/ns/ldp#isMemberOfRelation";
    pub const INSERTED_CONTENT_RELATION: &str = "http://www.w3.org/ns/ldp#insertedContentRelation";
    pub const MEMBER_SUBJECT: &str = "http://www.w3.org/ns/ldp#MemberSubject";
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
}

/// Object position of a triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Term {
    Iri(String),
    Literal(String),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            Self::Literal(_) => None,
        }
    }

    /// The repository resource this term points at, if any.
    pub fn as_resource(&self) -> Option<ResourceId> {
        self.as_iri()
            .filter(|iri| iri.starts_with(ROOT_ID))
            .and_then(|iri| ResourceId::parse(iri).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

/// An unordered bag of triples describing one resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a triple; duplicates are ignored.
    pub fn insert(&mut self, triple: Triple) {
        if !self.triples.contains(&triple) {
            self.triples.push(triple);
        }
    }

    /// Builder-style insert of `(subject, predicate, object)`.
    pub fn with(mut self, subject: &ResourceId, predicate: &str, object: Term) -> Self {
        self.insert(Triple::new(subject.full_id(), predicate, object));
        self
    }

    pub fn remove_predicate(&mut self, predicate: &str) {
        self.triples.retain(|t| t.predicate != predicate);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// First object of `predicate` on any subject.
    pub fn first_object(&self, predicate: &str) -> Option<&Term> {
        self.triples
            .iter()
            .find(|t| t.predicate == predicate)
            .map(|t| &t.object)
    }

    /// Triples whose object is another repository resource.
    pub fn resource_references(&self) -> impl Iterator<Item = (&str, ResourceId)> {
        self.triples
            .iter()
            .filter_map(|t| t.object.as_resource().map(|target| (t.predicate.as_str(), target)))
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut graph = Graph::new();
        for triple in iter {
            graph.insert(triple);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn insert_ignores_duplicates() {
        let subject = id("a");
        let graph = Graph::new()
            .with(&subject, "http://purl.org/dc/terms/title", Term::literal("A"))
            .with(&subject, "http://purl.org/dc/terms/title", Term::literal("A"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn resource_references_skip_literals_and_foreign_iris() {
        let subject = id("a");
        let graph = Graph::new()
            .with(&subject, "http://example.org/rel", Term::iri("info:fedora/b"))
            .with(&subject, "http://example.org/ext", Term::iri("http://example.org/x"))
            .with(&subject, "http://example.org/lit", Term::literal("info:fedora/c"));
        let refs: Vec<_> = graph.resource_references().collect();
        assert_eq!(refs, vec![("http://example.org/rel", id("b"))]);
    }

    #[test]
    fn first_object_and_remove_predicate() {
        let subject = id("c");
        let mut graph = Graph::new().with(&subject, vocab::HAS_MEMBER_RELATION, Term::iri(vocab::MEMBER));
        assert_eq!(graph.first_object(vocab::HAS_MEMBER_RELATION).and_then(Term::as_iri), Some(vocab::MEMBER));
        graph.remove_predicate(vocab::HAS_MEMBER_RELATION);
        assert!(graph.is_empty());
    }

    #[test]
    fn serde_roundtrip() {
        let graph = Graph::new().with(&id("a"), vocab::RDF_TYPE, Term::iri("http://example.org/T"));
        let json = serde_json::to_string(&graph).unwrap();
        let parsed: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, graph);
    }
}
