//! Build a `Patch` by collecting a stream of operations.

use crate::patch::{ChangeItem, Patch, PatchError, PatchHeader, PatchSink, Quad};
use crate::types::Node;

/// Collects sink calls into a `Patch`.
///
/// Header calls that arrive before the first operation fill the patch
/// header. Later header calls are kept in sequence as `ChangeItem::Header`.
#[derive(Debug, Default)]
pub struct PatchCollector {
    header: PatchHeader,
    items: Vec<ChangeItem>,
}

impl PatchCollector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: PatchHeader::new(),
            items: Vec::new(),
        }
    }

    /// Freeze the collected operations.
    #[must_use]
    pub fn into_patch(self) -> Patch {
        Patch::new(self.header, self.items)
    }

    /// Take what has been collected so far and start afresh.
    pub fn take_patch(&mut self) -> Patch {
        std::mem::take(self).into_patch()
    }

    /// The header collected so far.
    #[must_use]
    pub const fn collected_header(&self) -> &PatchHeader {
        &self.header
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.items.is_empty()
    }
}

impl PatchSink for PatchCollector {
    fn header(&mut self, field: &str, value: &Node) -> Result<(), PatchError> {
        if self.items.is_empty() {
            self.header.set(field, value.clone());
        } else {
            self.items.push(ChangeItem::Header {
                field: field.to_string(),
                value: value.clone(),
            });
        }
        Ok(())
    }

    fn add(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.items.push(ChangeItem::AddQuad(quad.clone()));
        Ok(())
    }

    fn delete(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.items.push(ChangeItem::DeleteQuad(quad.clone()));
        Ok(())
    }

    fn add_prefix(
        &mut self,
        graph: Option<&Node>,
        prefix: &str,
        uri: &str,
    ) -> Result<(), PatchError> {
        self.items.push(ChangeItem::AddPrefix {
            graph: graph.cloned(),
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn delete_prefix(&mut self, graph: Option<&Node>, prefix: &str) -> Result<(), PatchError> {
        self.items.push(ChangeItem::DeletePrefix {
            graph: graph.cloned(),
            prefix: prefix.to_string(),
        });
        Ok(())
    }

    fn set_base(&mut self, uri: &str) -> Result<(), PatchError> {
        self.items.push(ChangeItem::SetBase(uri.to_string()));
        Ok(())
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        self.items.push(ChangeItem::TxnBegin);
        Ok(())
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.items.push(ChangeItem::TxnCommit);
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.items.push(ChangeItem::TxnAbort);
        Ok(())
    }

    fn segment(&mut self) -> Result<(), PatchError> {
        self.items.push(ChangeItem::Segment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_header_kept_in_sequence() {
        let mut c = PatchCollector::new();
        c.header("id", &Node::plain_literal("p1")).expect("header");
        c.txn_begin().expect("begin");
        c.header("note", &Node::plain_literal("mid")).expect("header");
        c.txn_commit().expect("commit");

        assert_eq!(c.collected_header().len(), 1);
        let patch = c.into_patch();
        assert_eq!(patch.header().len(), 1);
        assert_eq!(
            patch.items(),
            &[
                ChangeItem::TxnBegin,
                ChangeItem::Header {
                    field: "note".to_string(),
                    value: Node::plain_literal("mid"),
                },
                ChangeItem::TxnCommit,
            ]
        );
    }

    #[test]
    fn test_take_patch_resets() {
        let mut c = PatchCollector::new();
        c.segment().expect("segment");
        let first = c.take_patch();
        assert_eq!(first.len(), 1);
        assert!(c.is_empty());
    }
}
