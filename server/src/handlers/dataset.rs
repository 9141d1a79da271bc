//! Apply patches to an in-memory quad store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::handlers::PatchHandler;
use crate::patch::{Patch, PatchError, PatchSink, Quad};
use crate::types::Node;

/// A set of quads with per-graph prefix mappings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InMemoryDataset {
    quads: BTreeSet<Quad>,
    prefixes: BTreeMap<(Option<Node>, String), String>,
    base: Option<String>,
}

impl InMemoryDataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, quad: &Quad) -> bool {
        self.quads.contains(quad)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn quads(&self) -> impl Iterator<Item = &Quad> {
        self.quads.iter()
    }

    #[must_use]
    pub fn prefix(&self, graph: Option<&Node>, prefix: &str) -> Option<&str> {
        self.prefixes
            .get(&(graph.cloned(), prefix.to_string()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Add(q) => {
                self.quads.insert(q);
            }
            Change::Delete(q) => {
                self.quads.remove(&q);
            }
            Change::AddPrefix(graph, prefix, uri) => {
                self.prefixes.insert((graph, prefix), uri);
            }
            Change::DeletePrefix(graph, prefix) => {
                self.prefixes.remove(&(graph, prefix));
            }
            Change::Base(uri) => self.base = Some(uri),
        }
    }
}

enum Change {
    Add(Quad),
    Delete(Quad),
    AddPrefix(Option<Node>, String, String),
    DeletePrefix(Option<Node>, String),
    Base(String),
}

/// Buffers changes until the enclosing transaction commits.
struct BufferingSink<'a> {
    dataset: &'a mut InMemoryDataset,
    pending: Vec<Change>,
}

impl BufferingSink<'_> {
    fn flush(&mut self) {
        for change in self.pending.drain(..) {
            self.dataset.apply(change);
        }
    }
}

impl PatchSink for BufferingSink<'_> {
    fn finish(&mut self) -> Result<(), PatchError> {
        // No markers: the whole patch is one implicit transaction.
        self.flush();
        Ok(())
    }

    fn add(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.pending.push(Change::Add(quad.clone()));
        Ok(())
    }

    fn delete(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.pending.push(Change::Delete(quad.clone()));
        Ok(())
    }

    fn add_prefix(
        &mut self,
        graph: Option<&Node>,
        prefix: &str,
        uri: &str,
    ) -> Result<(), PatchError> {
        self.pending.push(Change::AddPrefix(
            graph.cloned(),
            prefix.to_string(),
            uri.to_string(),
        ));
        Ok(())
    }

    fn delete_prefix(&mut self, graph: Option<&Node>, prefix: &str) -> Result<(), PatchError> {
        self.pending
            .push(Change::DeletePrefix(graph.cloned(), prefix.to_string()));
        Ok(())
    }

    fn set_base(&mut self, uri: &str) -> Result<(), PatchError> {
        self.pending.push(Change::Base(uri.to_string()));
        Ok(())
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        // Anything before an explicit begin was its own implicit transaction.
        self.flush();
        Ok(())
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.flush();
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.pending.clear();
        Ok(())
    }
}

/// Applies each patch to a shared dataset under its write lock.
#[derive(Debug, Clone, Default)]
pub struct ApplyToDataset {
    dataset: Arc<RwLock<InMemoryDataset>>,
}

impl ApplyToDataset {
    #[must_use]
    pub const fn new(dataset: Arc<RwLock<InMemoryDataset>>) -> Self {
        Self { dataset }
    }

    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn dataset(&self) -> Arc<RwLock<InMemoryDataset>> {
        Arc::clone(&self.dataset)
    }
}

impl PatchHandler for ApplyToDataset {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        let mut dataset = self
            .dataset
            .write()
            .map_err(|_| PatchError::Sink("dataset lock poisoned".to_string()))?;
        let mut sink = BufferingSink {
            dataset: &mut *dataset,
            pending: Vec::new(),
        };
        // On error the buffered transaction is dropped unapplied.
        patch.play(&mut sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{ChangeItem, PatchHeader};
    use crate::types::Id;

    fn quad(o: &str) -> Quad {
        Quad::new(
            Some(Node::iri("http://x/g")),
            Node::iri("http://x/s"),
            Node::iri("http://x/p"),
            Node::plain_literal(o),
        )
    }

    fn header() -> PatchHeader {
        PatchHeader::with_ids(&Id::new(), None)
    }

    #[test]
    fn test_commit_applies_and_abort_discards() {
        let handler = ApplyToDataset::default();
        let patch = Patch::new(
            header(),
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("kept")),
                ChangeItem::TxnCommit,
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("dropped")),
                ChangeItem::TxnAbort,
            ],
        );
        handler.handle(&patch).expect("handle");

        let dataset = handler.dataset();
        let ds = dataset.read().expect("read");
        assert!(ds.contains(&quad("kept")));
        assert!(!ds.contains(&quad("dropped")));
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn test_unbracketed_patch_is_one_transaction() {
        let handler = ApplyToDataset::default();
        let patch = Patch::new(
            header(),
            vec![
                ChangeItem::AddQuad(quad("a")),
                ChangeItem::AddPrefix {
                    graph: None,
                    prefix: "ex".to_string(),
                    uri: "http://example/".to_string(),
                },
            ],
        );
        handler.handle(&patch).expect("handle");
        let dataset = handler.dataset();
        let ds = dataset.read().expect("read");
        assert!(ds.contains(&quad("a")));
        assert_eq!(ds.prefix(None, "ex"), Some("http://example/"));
    }

    #[test]
    fn test_add_then_delete() {
        let handler = ApplyToDataset::default();
        handler
            .handle(&Patch::transaction(header(), vec![ChangeItem::AddQuad(quad("x"))]))
            .expect("add");
        handler
            .handle(&Patch::transaction(header(), vec![ChangeItem::DeleteQuad(quad("x"))]))
            .expect("delete");
        assert!(handler.dataset().read().expect("read").is_empty());
    }
}
