//! Test: a patch with no operations.
//!
//! An empty transaction still gets a version, reads back unchanged and
//! survives a restart.

use super::helpers::{append_next, file_registry, log_dir, reattach};
use crate::codec::{self, PatchFormat};
use crate::patch::{ChangeItem, Patch, PatchHeader};
use crate::types::Version;
use tempfile::tempdir;

#[test]
fn test_empty_patch_is_versioned() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("empty", None, None).expect("create");
    let log = source.log();

    let (version, patch) = append_next(log, Vec::new());
    assert_eq!(version, Version::FIRST);
    assert_eq!(patch.len(), 2);
    assert!(matches!(patch.items()[0], ChangeItem::TxnBegin));
    assert!(matches!(patch.items()[1], ChangeItem::TxnCommit));

    let fetched = log.fetch(version).expect("fetch").expect("present");
    assert_eq!(fetched, patch);
    assert_eq!(log.earliest_version().expect("earliest"), Version::FIRST);
    assert_eq!(log.current_version().expect("current"), Version::FIRST);

    let reopened = reattach(&log_dir(dir.path(), "empty"));
    assert_eq!(reopened.current_version().expect("current"), Version::FIRST);
    assert_eq!(reopened.fetch(Version::FIRST).expect("fetch"), Some(patch));
}

#[test]
fn test_empty_patch_both_codecs() {
    let patch = Patch::transaction(PatchHeader::new(), Vec::new());
    for format in [PatchFormat::Text, PatchFormat::Binary] {
        let bytes = codec::encode(format, &patch).expect("encode");
        assert_eq!(codec::decode(format, &bytes).expect("decode"), patch);
    }
}

#[test]
fn test_patch_without_id_is_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = file_registry(dir.path());
    let source = registry.create("noid", None, None).expect("create");

    let patch = Patch::transaction(PatchHeader::new(), Vec::new());
    assert!(source.log().append(&patch).is_err());
    assert!(source.log().is_empty().expect("empty"));
    assert_eq!(source.log().current_version().expect("current"), Version::INIT);
}
