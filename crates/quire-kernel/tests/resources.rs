mod common;

use common::{at, harness, id};
use quire_kernel::{Content, CreateRequest, KernelError, Resource};
use quire_types::{ContentDigest, Graph, InteractionModel, Term};

const REL: &str = "http://example.org/rel";
const READ: &str = "http://www.w3.org/ns/auth/acl#Read";

fn basic() -> CreateRequest {
    CreateRequest::container(InteractionModel::BasicContainer, Graph::new())
}

// ---------------------------------------------------------------------------
// Create rules
// ---------------------------------------------------------------------------

#[test]
fn binary_gets_a_description() {
    let h = harness();
    h.create("b", CreateRequest::binary(b"payload".to_vec()));
    let service = h.repo.service();

    match service.get(None, &id("b")).unwrap() {
        Resource::Binary { headers, content } => {
            assert_eq!(content, b"payload");
            assert_eq!(headers.content_digest, Some(ContentDigest::compute(b"payload")));
            assert_eq!(headers.created_by.as_deref(), Some("alice"));
        }
        other => panic!("expected binary, got {other:?}"),
    }
    assert!(matches!(
        service.get(None, &id("b").as_description()).unwrap(),
        Resource::Description { .. }
    ));
}

#[test]
fn declared_digest_must_match_content() {
    let h = harness();
    let request = CreateRequest {
        model: InteractionModel::NonRdfSource,
        content: Content::Binary {
            data: b"payload".to_vec(),
            mime_type: Some("text/plain".into()),
            filename: None,
            expected_digest: Some(ContentDigest::compute(b"something else")),
        },
        archival_group: false,
    };
    let tx = h.repo.begin().unwrap();
    let err = h.repo.service().create(&tx, "alice", &id("b"), request).unwrap_err();
    assert!(matches!(err, KernelError::DigestMismatch(_)));
    assert!(tx.is_rolled_back());
    assert!(h.repo.service().get(None, &id("b")).is_err());
}

#[test]
fn create_rejects_existing_and_misplaced_resources() {
    let h = harness();
    h.create("c", basic());
    h.create("c/b", CreateRequest::binary(b"x".to_vec()));
    let service = h.repo.service();

    let exists = service.create(&h.repo.begin().unwrap(), "alice", &id("c"), basic()).unwrap_err();
    assert!(matches!(exists, KernelError::Conflict(_)));
    let under_binary = service.create(&h.repo.begin().unwrap(), "alice", &id("c/b/x"), basic()).unwrap_err();
    assert!(matches!(under_binary, KernelError::Conflict(_)));
    let mismatched = CreateRequest {
        model: InteractionModel::BasicContainer,
        content: Content::binary(b"x".to_vec()),
        archival_group: false,
    };
    let wrong_content = service.create(&h.repo.begin().unwrap(), "alice", &id("d"), mismatched).unwrap_err();
    assert!(matches!(wrong_content, KernelError::Conflict(_)));
}

#[test]
fn placeholder_segments_resolve_to_the_nearest_container() {
    let h = harness();
    h.create("c", basic());
    h.create("c/x/y", basic());
    let service = h.repo.service();
    assert_eq!(service.children(None, &id("c")).unwrap(), vec![id("c/x/y")]);
    assert_eq!(service.get(None, &id("c/x/y")).unwrap().headers().parent, Some(id("c")));
}

#[test]
fn placeholder_with_descendants_cannot_become_a_binary() {
    let h = harness();
    h.create("c/x/y", basic());
    let service = h.repo.service();

    let err = service
        .create(&h.repo.begin().unwrap(), "alice", &id("c/x"), CreateRequest::binary(b"x".to_vec()))
        .unwrap_err();
    assert!(matches!(err, KernelError::Conflict(_)));
    h.create("c/x", basic());
    h.create("c/xy", CreateRequest::binary(b"x".to_vec()));
    assert!(service.get(None, &id("c/x")).is_ok());
}

#[test]
fn derived_last_modified_tracks_child_changes() {
    let h = harness();
    h.create("c", basic());
    let service = h.repo.service();
    assert_eq!(service.derived_last_modified(None, &id("c")).unwrap(), None);

    h.clock.set(at(10));
    h.create("c/a", basic());
    assert_eq!(service.derived_last_modified(None, &id("c")).unwrap(), Some(at(10)));
    assert_eq!(service.get(None, &id("c")).unwrap().headers().last_modified, at(0));

    h.clock.set(at(20));
    service.delete(&h.repo.begin().unwrap(), "alice", &id("c/a")).unwrap();
    assert_eq!(service.derived_last_modified(None, &id("c")).unwrap(), Some(at(20)));
}

#[test]
fn archival_group_members_share_its_store_object() {
    let h = harness();
    h.create("ag", basic().archival_group());
    h.create("ag/part", basic());
    h.create("ag/part/file", CreateRequest::binary(b"x".to_vec()));
    let service = h.repo.service();

    assert_eq!(service.get(None, &id("ag/part")).unwrap().headers().root, id("ag"));
    assert_eq!(service.get(None, &id("ag/part/file")).unwrap().headers().root, id("ag"));
    let nested = service
        .create(&h.repo.begin().unwrap(), "alice", &id("ag/inner"), basic().archival_group())
        .unwrap_err();
    assert!(matches!(nested, KernelError::Conflict(_)));
}

// ---------------------------------------------------------------------------
// Delete and purge
// ---------------------------------------------------------------------------

#[test]
fn delete_leaves_tombstones_for_the_whole_tree() {
    let h = harness();
    h.create("c", basic());
    h.create("c/x", basic());
    h.create("c/x/b", CreateRequest::binary(b"x".to_vec()));
    h.clock.set(at(10));
    let service = h.repo.service();
    service.delete(&h.repo.begin().unwrap(), "bob", &id("c")).unwrap();

    for path in ["c", "c/x", "c/x/b"] {
        let resource = service.get(None, &id(path)).unwrap();
        assert!(resource.is_tombstone(), "{path} should be a tombstone");
        assert_eq!(resource.headers().last_modified, at(10));
    }
    assert!(service.children(None, &id("c")).unwrap().is_empty());
    assert_eq!(service.children(None, &id("c").as_memento(at(5))).unwrap(), vec![id("c/x")]);

    let recreate = service.create(&h.repo.begin().unwrap(), "alice", &id("c"), basic()).unwrap_err();
    assert!(matches!(recreate, KernelError::Conflict(_)));
    let under_tombstone = service.create(&h.repo.begin().unwrap(), "alice", &id("c/new"), basic()).unwrap_err();
    assert!(matches!(under_tombstone, KernelError::Conflict(_)));
}

#[test]
fn purge_requires_a_tombstone_and_frees_the_id() {
    let h = harness();
    h.create("c", basic());
    h.create("c/x", basic());
    let service = h.repo.service();

    let live = service.purge(&h.repo.begin().unwrap(), "alice", &id("c")).unwrap_err();
    assert!(matches!(live, KernelError::Conflict(_)));

    service.delete(&h.repo.begin().unwrap(), "alice", &id("c")).unwrap();
    service.purge(&h.repo.begin().unwrap(), "alice", &id("c")).unwrap();
    assert!(matches!(service.get(None, &id("c")), Err(KernelError::NotFound(_))));
    assert!(matches!(service.get(None, &id("c/x")), Err(KernelError::NotFound(_))));

    h.create("c", basic());
    assert!(!service.get(None, &id("c")).unwrap().is_tombstone());
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[test]
fn references_follow_graph_changes() {
    let h = harness();
    h.create("t", basic());
    h.create("u", basic());
    let graph = Graph::new().with(&id("s"), REL, Term::iri(id("t").full_id()));
    h.create("s", CreateRequest::container(InteractionModel::BasicContainer, graph));
    let service = h.repo.service();
    assert_eq!(service.inbound_references(None, &id("t")).unwrap().len(), 1);
    assert_eq!(service.outbound_references(None, &id("s")).unwrap().len(), 1);

    let moved = Graph::new().with(&id("s"), REL, Term::iri(id("u").full_id()));
    service
        .replace(&h.repo.begin().unwrap(), "alice", &id("s"), Content::Rdf(moved))
        .unwrap();
    assert!(service.inbound_references(None, &id("t")).unwrap().is_empty());
    assert_eq!(service.inbound_references(None, &id("u")).unwrap().len(), 1);

    service.delete(&h.repo.begin().unwrap(), "alice", &id("s")).unwrap();
    assert!(service.inbound_references(None, &id("u")).unwrap().is_empty());
}

#[test]
fn binary_references_live_in_its_description() {
    let h = harness();
    h.create("t", basic());
    h.create("b", CreateRequest::binary(b"x".to_vec()));
    let service = h.repo.service();
    let description = id("b").as_description();
    let graph = Graph::new().with(&id("b"), REL, Term::iri(id("t").full_id()));
    service
        .replace(&h.repo.begin().unwrap(), "alice", &description, Content::Rdf(graph))
        .unwrap();

    assert_eq!(service.outbound_references(None, &description).unwrap().len(), 1);
    assert_eq!(service.inbound_references(None, &id("t")).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// ACLs
// ---------------------------------------------------------------------------

#[test]
fn acl_writes_invalidate_the_authorization_cache() {
    let h = harness();
    h.create("c", basic());
    let service = h.repo.service();
    let acl = id("c").as_acl();
    let graph = Graph::new().with(&acl, "http://www.w3.org/ns/auth/acl#mode", Term::iri(READ));

    service
        .replace(&h.repo.begin().unwrap(), "alice", &acl, Content::Rdf(graph))
        .unwrap();
    assert!(matches!(service.get(None, &acl).unwrap(), Resource::Acl { .. }));

    service.delete(&h.repo.begin().unwrap(), "alice", &acl).unwrap();
    assert!(matches!(service.get(None, &acl), Err(KernelError::NotFound(_))));
    assert!(!service.get(None, &id("c")).unwrap().is_tombstone());

    let invalidated = h.authorization.invalidated.lock().unwrap().clone();
    assert_eq!(invalidated, vec![id("c"), id("c")]);
}
