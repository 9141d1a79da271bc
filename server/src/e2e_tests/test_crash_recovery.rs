//! Test: restart after a crash mid-append.
//!
//! A body that was never completed must not appear in the log after
//! restart, and the next append continues the chain. A completed record
//! that cannot be read is left out but keeps its slot.

use std::fs;

use super::helpers::{append_next, file_registry, log_dir, patch_after, quad};
use crate::codec::{self, PatchFormat};
use crate::patch::ChangeItem;
use crate::storage::file::{RECORD_PREFIX, TMP_PREFIX};
use crate::types::Version;
use tempfile::tempdir;

#[test]
fn test_uncompleted_write_is_not_visible() {
    let dir = tempdir().expect("Failed to create temp dir");
    let head = {
        let registry = file_registry(dir.path());
        let source = registry.create("crash", None, None).expect("create");
        append_next(source.log(), vec![ChangeItem::AddQuad(quad("s", "1"))]);
        let (_, second) = append_next(source.log(), vec![ChangeItem::AddQuad(quad("s", "2"))]);
        second.id()
    };

    // A third patch was being written when the process died.
    let lost = patch_after(head.as_ref(), vec![ChangeItem::AddQuad(quad("s", "3"))]);
    let body = codec::encode(PatchFormat::Text, &lost).expect("encode");
    let tmp = log_dir(dir.path(), "crash").join(format!("{TMP_PREFIX}0003"));
    fs::write(&tmp, body).expect("write tmp");

    let registry = file_registry(dir.path());
    let source = registry.get_by_name("crash").expect("lookup").expect("present");
    let log = source.log();
    assert_eq!(log.current_version().expect("current"), Version::from_index(2));
    assert_eq!(log.current_id().expect("head"), head);
    assert!(log.fetch(Version::from_index(3)).expect("fetch").is_none());
    assert!(log.fetch_by_id(&lost.id().expect("id")).expect("fetch").is_none());
    assert!(!tmp.exists());

    // The lost patch can be sent again.
    assert_eq!(log.append(&lost).expect("append"), Version::from_index(3));
}

#[test]
fn test_unreadable_record_keeps_its_slot() {
    let dir = tempdir().expect("Failed to create temp dir");
    {
        let registry = file_registry(dir.path());
        let source = registry.create("torn", None, None).expect("create");
        append_next(source.log(), Vec::new());
    }
    let record = log_dir(dir.path(), "torn").join(format!("{RECORD_PREFIX}0002"));
    fs::write(&record, b"not a patch").expect("write record");

    let registry = file_registry(dir.path());
    let source = registry.get_by_name("torn").expect("lookup").expect("present");
    let log = source.log();
    assert_eq!(log.current_version().expect("current"), Version::FIRST);

    let (version, _) = append_next(log, Vec::new());
    assert_eq!(version, Version::from_index(3));
    assert!(log.fetch(version).expect("fetch").is_some());
}
