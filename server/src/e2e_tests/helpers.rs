//! Common helpers for end-to-end tests.

use std::path::Path;
use std::sync::Arc;

use crate::log::PatchLog;
use crate::patch::{ChangeItem, Patch, PatchHeader, Quad};
use crate::provider::{FileProvider, LOG_DIR, MemProvider, PROVIDER_FILE, ProviderRegistry};
use crate::registry::DataRegistry;
use crate::storage::FileStore;
use crate::types::{Id, Node, Version};

pub const CACHE_SIZE: usize = 16;

/// A quad in the default graph with an IRI subject and predicate.
pub fn quad(subject: &str, object: &str) -> Quad {
    Quad::new(
        None,
        Node::iri(format!("http://example/{subject}")),
        Node::iri("http://example/p"),
        Node::plain_literal(object),
    )
}

/// A transaction patch with a fresh id following `previous`.
pub fn patch_after(previous: Option<&Id>, items: Vec<ChangeItem>) -> Patch {
    Patch::transaction(PatchHeader::with_ids(&Id::new(), previous), items)
}

/// Append `patch` after the current head of `log`.
#[allow(clippy::expect_used)]
pub fn append_next(log: &PatchLog, items: Vec<ChangeItem>) -> (Version, Patch) {
    let patch = patch_after(log.current_id().expect("head").as_ref(), items);
    let version = log.append(&patch).expect("append");
    (version, patch)
}

/// A registry of file and memory providers rooted at `base`.
#[allow(clippy::expect_used)]
pub fn file_registry(base: &Path) -> DataRegistry {
    let providers = ProviderRegistry::new(PROVIDER_FILE)
        .with(Arc::new(FileProvider::new(base, CACHE_SIZE)))
        .with(Arc::new(MemProvider::new(CACHE_SIZE)));
    DataRegistry::attach(providers).expect("attach registry")
}

/// The record store directory of the file-backed source `name`.
pub fn log_dir(base: &Path, name: &str) -> std::path::PathBuf {
    base.join(name).join(LOG_DIR)
}

/// Reattach the record store at `dir` as a local log.
#[allow(clippy::expect_used)]
pub fn reattach(dir: &Path) -> PatchLog {
    let store = FileStore::attach(dir).expect("attach store");
    PatchLog::attach_local("reattached", Arc::new(store), CACHE_SIZE).expect("attach log")
}
