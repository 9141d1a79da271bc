//! Test: patches that do not follow the head.
//!
//! A patch naming an older predecessor is refused with the current head in
//! the error, a second copy of an old patch is refused as a duplicate, and
//! resending the head patch is answered with its existing version.

use super::helpers::{append_next, file_registry, patch_after};
use crate::log::LogError;
use crate::types::{Id, Version};
use tempfile::tempdir;

#[test]
fn test_stale_previous_is_refused() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("seq", None, None).expect("create");
    let log = source.log();

    let (_, first) = append_next(log, Vec::new());
    let (_, second) = append_next(log, Vec::new());

    let stale = patch_after(first.id().as_ref(), Vec::new());
    match log.append(&stale) {
        Err(LogError::Sequence { expected, declared }) => {
            assert_eq!(expected, second.id());
            assert_eq!(declared, first.id());
        }
        other => panic!("expected a sequencing conflict, got {other:?}"),
    }

    let unknown = patch_after(Some(&Id::new()), Vec::new());
    assert!(matches!(log.append(&unknown), Err(LogError::Sequence { .. })));

    let rootless = patch_after(None, Vec::new());
    assert!(matches!(log.append(&rootless), Err(LogError::Sequence { .. })));

    assert_eq!(log.current_version().expect("current"), Version::from_index(2));
}

#[test]
fn test_resent_patches() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("resend", None, None).expect("create");
    let log = source.log();

    let (_, first) = append_next(log, Vec::new());
    let (head_version, head) = append_next(log, Vec::new());

    // The head again: same version, nothing new written.
    assert_eq!(log.append(&head).expect("replay head"), head_version);
    assert_eq!(log.current_version().expect("current"), head_version);

    // An older patch again.
    match log.append(&first) {
        Err(LogError::DuplicateId(id)) => assert_eq!(Some(id), first.id()),
        other => panic!("expected a duplicate id, got {other:?}"),
    }
}
