//! Test: text patches posted to a log and replayed into a dataset.
//!
//! Covers the text codec, the log, the follower and the dataset handler
//! together: an add patch followed by a delete patch leaves exactly the
//! surviving quads, and reverse replay undoes the last patch.

use std::sync::Arc;

use super::helpers::{file_registry, quad};
use crate::codec::{self, PatchFormat};
use crate::follow::LogFollower;
use crate::handlers::{ApplyToDataset, Channel, CollectingHandler, PatchHandler};
use crate::patch::PatchCollector;
use crate::types::{Id, Version};
use tempfile::tempdir;

const FIRST: &str = "\
H id <uuid:6f1c2a4e-0000-4000-8000-000000000001> .
TX .
A <http://example/s1> <http://example/p> \"1\" .
A <http://example/s2> <http://example/p> \"2\" .
A <http://example/s3> <http://example/p> \"3\" .
TC .
";

const SECOND: &str = "\
H id <uuid:6f1c2a4e-0000-4000-8000-000000000002> .
H previous <uuid:6f1c2a4e-0000-4000-8000-000000000001> .
TX .
D <http://example/s2> <http://example/p> \"2\" .
A <http://example/s4> <http://example/p> \"4\" .
TC .
";

#[test]
fn test_add_then_delete_reaches_replica() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("books", None, None).expect("create");

    for body in [FIRST, SECOND] {
        let patch = codec::decode(PatchFormat::Text, body.as_bytes()).expect("decode");
        source.log().append(&patch).expect("append");
    }
    assert_eq!(source.log().current_version().expect("current"), Version::from_index(2));
    assert_eq!(
        source.log().current_id().expect("head"),
        Some(Id::from_string("uuid:6f1c2a4e-0000-4000-8000-000000000002"))
    );

    let apply = Arc::new(ApplyToDataset::new(Arc::default()));
    let seen = Arc::new(CollectingHandler::new());
    let channel = Channel::builder()
        .handler(seen.clone())
        .terminal(apply.clone())
        .build();
    let replica = dir.path().join("replica");
    let mut follower =
        LogFollower::new(Arc::clone(source.log()), channel, replica).expect("follower");
    assert_eq!(follower.sync().expect("sync"), Version::from_index(2));
    assert_eq!(seen.patches().expect("patches").len(), 2);

    let dataset = apply.dataset();
    let dataset = dataset.read().expect("read");
    assert_eq!(dataset.len(), 3);
    assert!(dataset.contains(&quad("s1", "1")));
    assert!(!dataset.contains(&quad("s2", "2")));
    assert!(dataset.contains(&quad("s3", "3")));
    assert!(dataset.contains(&quad("s4", "4")));
}

#[test]
fn test_reverse_replay_undoes_last_patch() {
    let first = codec::decode(PatchFormat::Text, FIRST.as_bytes()).expect("decode");
    let second = codec::decode(PatchFormat::Text, SECOND.as_bytes()).expect("decode");

    let mut undo = PatchCollector::new();
    second.play_reverse(&mut undo).expect("reverse");
    let undo = undo.into_patch();

    let apply = ApplyToDataset::new(Arc::default());
    for patch in [&first, &second, &undo] {
        apply.handle(patch).expect("apply");
    }

    let dataset = apply.dataset();
    let guard = dataset.read().expect("read");
    assert_eq!(guard.len(), 3);
    assert!(guard.contains(&quad("s2", "2")));
    assert!(!guard.contains(&quad("s4", "4")));
}
