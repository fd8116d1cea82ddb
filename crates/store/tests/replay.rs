#![forbid(unsafe_code)]

use labsync_core::{ChangeEvent, ChangeKind, Classification, Resource, ResourceList};
use labsync_store::reconcile;

fn obj(name: &str, ns: Option<&str>, phase: &str, pretty: &str) -> Resource {
    let mut meta = serde_json::json!({
        "name": name,
        "creationTimestamp": "2020-01-01T00:00:00Z",
    });
    if let Some(ns) = ns { meta["namespace"] = serde_json::Value::String(ns.to_string()); }
    Resource::from_raw(serde_json::json!({
        "metadata": meta,
        "spec": { "prettyName": pretty, "running": true },
        "status": { "phase": phase },
    }))
    .unwrap()
}

fn replay(start: &ResourceList, events: &[ChangeEvent]) -> (ResourceList, Vec<Classification>) {
    let mut list = start.clone();
    let mut seen = Vec::new();
    for e in events {
        let out = reconcile(&list, e);
        seen.push(out.classification);
        list = out.list;
        assert!(list.identities_unique());
    }
    (list, seen)
}

#[test]
fn replay_basic_sequence() {
    let events = vec![
        // add a/ns
        ChangeEvent::new(ChangeKind::Added, obj("a", Some("ns"), "Pending", "A")),
        // duplicate add of the same payload
        ChangeEvent::new(ChangeKind::Added, obj("a", Some("ns"), "Pending", "A")),
        // add b cluster-scoped
        ChangeEvent::new(ChangeKind::Added, obj("b", None, "Ready", "B")),
        // a becomes ready
        ChangeEvent::new(ChangeKind::Modified, obj("a", Some("ns"), "Ready", "A")),
        // rename a
        ChangeEvent::new(ChangeKind::Modified, obj("a", Some("ns"), "Ready", "A2")),
        // delete b
        ChangeEvent::new(ChangeKind::Deleted, obj("b", None, "Ready", "B")),
        // delete b again
        ChangeEvent::new(ChangeKind::Deleted, obj("b", None, "Ready", "B")),
    ];

    let (after_two, _) = replay(&ResourceList::new(), &events[..2]);
    assert_eq!(after_two.len(), 1);
    assert_eq!(after_two.get(0).unwrap().name(), "a");

    let (end, seen) = replay(&ResourceList::new(), &events);
    assert_eq!(
        seen,
        vec![
            Classification::Addition,
            Classification::Drop,
            Classification::Addition,
            Classification::UpdatedInfo,
            Classification::PrettyNameOnly,
            Classification::Deletion,
            Classification::Deletion,
        ]
    );
    assert_eq!(end.len(), 1);
    assert_eq!(end.get(0).unwrap().pretty_name(), Some("A2"));
    assert_eq!(end.get(0).unwrap().namespace(), Some("ns"));
}

#[test]
fn replay_is_deterministic() {
    let events = vec![
        ChangeEvent::new(ChangeKind::Added, obj("x", Some("ns1"), "Pending", "x")),
        ChangeEvent::new(ChangeKind::Modified, obj("y", Some("ns2"), "Starting", "y")),
        ChangeEvent::new(ChangeKind::Modified, obj("x", Some("ns1"), "Ready", "x")),
        ChangeEvent::new(ChangeKind::Deleted, obj("y", Some("ns2"), "Starting", "y")),
    ];
    let (a, ca) = replay(&ResourceList::new(), &events);
    let (b, cb) = replay(&ResourceList::new(), &events);
    assert_eq!(a, b);
    assert_eq!(ca, cb);
}
