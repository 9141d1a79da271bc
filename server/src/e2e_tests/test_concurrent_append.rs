//! Test: many writers racing on one log.
//!
//! Each writer reads the head, builds a patch on it and retries on a
//! sequencing conflict. Every patch lands exactly once and the history is a
//! single unbroken chain.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use super::helpers::{file_registry, log_dir, patch_after, quad, reattach};
use crate::log::LogError;
use crate::patch::ChangeItem;
use crate::types::{Id, Version};
use tempfile::tempdir;

const WRITERS: usize = 6;
const PATCHES_PER_WRITER: usize = 10;

#[test]
fn test_racing_writers_build_one_chain() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("race", None, None).expect("create");

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let log = Arc::clone(source.log());
            thread::spawn(move || {
                let mut conflicts = 0;
                for n in 0..PATCHES_PER_WRITER {
                    let item = ChangeItem::AddQuad(quad(&format!("w{writer}"), &n.to_string()));
                    loop {
                        let head = log.current_id().expect("head");
                        let patch = patch_after(head.as_ref(), vec![item.clone()]);
                        match log.append(&patch) {
                            Ok(_) => break,
                            Err(LogError::Sequence { .. }) => conflicts += 1,
                            Err(e) => panic!("writer {writer}: {e}"),
                        }
                    }
                }
                conflicts
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let log = source.log();
    let total = WRITERS * PATCHES_PER_WRITER;
    let current = log.current_version().expect("current");
    assert_eq!(current, Version::from_index(total as u64));

    let mut ids = HashSet::new();
    let mut previous: Option<Id> = None;
    for entry in log.range(Version::FIRST, current).expect("range") {
        let (_, patch) = entry.expect("read");
        assert_eq!(patch.previous(), previous);
        let id = patch.id().expect("id");
        assert!(ids.insert(id.clone()));
        previous = Some(id);
    }
    assert_eq!(ids.len(), total);

    // The same chain is rebuilt from disk.
    let reopened = reattach(&log_dir(dir.path(), "race"));
    assert_eq!(reopened.current_version().expect("current"), current);
    assert_eq!(reopened.current_id().expect("head"), log.current_id().expect("head"));
}
