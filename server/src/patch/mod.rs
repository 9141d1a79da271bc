//! The patch data model.
//!
//! A `Patch` is a header (field name to term) plus an ordered list of
//! `ChangeItem`s. Patches are built once, usually by a `PatchCollector`
//! fed from a codec reader, and are immutable afterwards.
//!
//! Patches form a singly linked history through the `previous` header
//! field. The link is used for ordering and gap detection only; it is not
//! verified cryptographically.

pub mod collector;
pub mod header;
pub mod processor;
pub mod sink;

use crate::types::{Id, Node};

pub use collector::PatchCollector;
pub use header::PatchHeader;
pub use processor::PatchProcessor;
pub use sink::{NoOpSink, PatchSink};

/// Errors from building, encoding, decoding or replaying patches.
#[derive(Debug)]
pub enum PatchError {
    /// I/O error on the underlying stream.
    Io(std::io::Error),
    /// Malformed text input at a known position.
    Parse {
        line: u64,
        column: u64,
        message: String,
    },
    /// Input ended in the middle of a record.
    Truncated(String),
    /// Malformed binary row.
    Decode(String),
    /// A sink rejected an operation.
    Sink(String),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse {
                line,
                column,
                message,
            } => write!(f, "[line: {line}, col: {column}] {message}"),
            Self::Truncated(msg) => write!(f, "input truncated: {msg}"),
            Self::Decode(msg) => write!(f, "bad binary patch row: {msg}"),
            Self::Sink(msg) => write!(f, "patch sink failed: {msg}"),
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PatchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A quad. `graph` is `None` for the default graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quad {
    pub graph: Option<Node>,
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
}

impl Quad {
    #[must_use]
    pub const fn new(graph: Option<Node>, subject: Node, predicate: Node, object: Node) -> Self {
        Self {
            graph,
            subject,
            predicate,
            object,
        }
    }
}

/// One operation in a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeItem {
    AddQuad(Quad),
    DeleteQuad(Quad),
    AddPrefix {
        graph: Option<Node>,
        prefix: String,
        uri: String,
    },
    DeletePrefix {
        graph: Option<Node>,
        prefix: String,
    },
    SetBase(String),
    TxnBegin,
    TxnCommit,
    TxnAbort,
    /// A header line that appeared after the first operation.
    Header {
        field: String,
        value: Node,
    },
    Segment,
}

impl ChangeItem {
    /// Send this operation to a sink.
    pub fn apply_to(&self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        match self {
            Self::AddQuad(q) => sink.add(q),
            Self::DeleteQuad(q) => sink.delete(q),
            Self::AddPrefix { graph, prefix, uri } => sink.add_prefix(graph.as_ref(), prefix, uri),
            Self::DeletePrefix { graph, prefix } => sink.delete_prefix(graph.as_ref(), prefix),
            Self::SetBase(uri) => sink.set_base(uri),
            Self::TxnBegin => sink.txn_begin(),
            Self::TxnCommit => sink.txn_commit(),
            Self::TxnAbort => sink.txn_abort(),
            Self::Header { field, value } => sink.header(field, value),
            Self::Segment => sink.segment(),
        }
    }

    #[must_use]
    pub const fn is_transaction_marker(&self) -> bool {
        matches!(self, Self::TxnBegin | Self::TxnCommit | Self::TxnAbort)
    }
}

/// An immutable patch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Patch {
    header: PatchHeader,
    items: Vec<ChangeItem>,
}

impl Patch {
    #[must_use]
    pub const fn new(header: PatchHeader, items: Vec<ChangeItem>) -> Self {
        Self { header, items }
    }

    /// A patch whose operations are bracketed by one transaction.
    #[must_use]
    pub fn transaction(header: PatchHeader, operations: Vec<ChangeItem>) -> Self {
        let mut items = Vec::with_capacity(operations.len() + 2);
        items.push(ChangeItem::TxnBegin);
        items.extend(operations);
        items.push(ChangeItem::TxnCommit);
        Self { header, items }
    }

    #[must_use]
    pub const fn header(&self) -> &PatchHeader {
        &self.header
    }

    #[must_use]
    pub fn items(&self) -> &[ChangeItem] {
        &self.items
    }

    #[must_use]
    pub fn id(&self) -> Option<Id> {
        self.header.id()
    }

    #[must_use]
    pub fn previous(&self) -> Option<Id> {
        self.header.previous()
    }

    /// Number of operations, not counting the header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replay the header and every operation into `sink`.
    pub fn play(&self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        sink.start()?;
        for (field, value) in self.header.iter() {
            sink.header(field, value)?;
        }
        for item in &self.items {
            item.apply_to(sink)?;
        }
        sink.finish()
    }

    /// Replay the patch backwards, undoing its effect.
    ///
    /// Operations are visited last to first. Adds and deletes of quads swap,
    /// an added prefix is deleted, and transaction begin and commit swap so
    /// each committed transaction is still bracketed. Aborted transactions
    /// had no effect and are skipped. Removed prefixes cannot be restored
    /// because their URI is not recorded, so they are skipped as well.
    pub fn play_reverse(&self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        sink.start()?;
        let mut in_aborted = false;
        for item in self.items.iter().rev() {
            // Walking backwards, an abort marker opens the skipped region
            // and its begin marker closes it.
            if in_aborted {
                if matches!(item, ChangeItem::TxnBegin) {
                    in_aborted = false;
                }
                continue;
            }
            match item {
                ChangeItem::TxnAbort => in_aborted = true,
                ChangeItem::AddQuad(q) => sink.delete(q)?,
                ChangeItem::DeleteQuad(q) => sink.add(q)?,
                ChangeItem::AddPrefix { graph, prefix, .. } => {
                    sink.delete_prefix(graph.as_ref(), prefix)?;
                }
                ChangeItem::DeletePrefix { prefix, .. } => {
                    tracing::debug!("reverse replay: cannot restore prefix '{prefix}'");
                }
                ChangeItem::TxnCommit => sink.txn_begin()?,
                ChangeItem::TxnBegin => sink.txn_commit()?,
                ChangeItem::Header { .. } => {}
                ChangeItem::SetBase(_) | ChangeItem::Segment => item.apply_to(sink)?,
            }
        }
        sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(s: &str) -> Quad {
        Quad::new(
            None,
            Node::iri(format!("http://example/{s}")),
            Node::iri("http://example/p"),
            Node::plain_literal(s),
        )
    }

    fn collect_reverse(patch: &Patch) -> Vec<ChangeItem> {
        let mut collector = PatchCollector::new();
        patch.play_reverse(&mut collector).expect("reverse replay");
        collector.into_patch().items().to_vec()
    }

    #[test]
    fn test_transaction_brackets_operations() {
        let patch = Patch::transaction(
            PatchHeader::new(),
            vec![ChangeItem::AddQuad(quad("a"))],
        );
        assert_eq!(patch.items().first(), Some(&ChangeItem::TxnBegin));
        assert_eq!(patch.items().last(), Some(&ChangeItem::TxnCommit));
        assert_eq!(patch.len(), 3);
    }

    #[test]
    fn test_play_replays_in_order() {
        let mut header = PatchHeader::new();
        let id = Id::new();
        header.set_id(&id);
        let patch = Patch::transaction(
            header,
            vec![
                ChangeItem::AddQuad(quad("a")),
                ChangeItem::DeleteQuad(quad("b")),
            ],
        );

        let mut collector = PatchCollector::new();
        patch.play(&mut collector).expect("play");
        assert_eq!(collector.into_patch(), patch);
    }

    #[test]
    fn test_reverse_flips_operations_and_keeps_brackets() {
        let patch = Patch::transaction(
            PatchHeader::new(),
            vec![
                ChangeItem::AddQuad(quad("a")),
                ChangeItem::DeleteQuad(quad("b")),
                ChangeItem::AddPrefix {
                    graph: None,
                    prefix: "ex".to_string(),
                    uri: "http://example/".to_string(),
                },
            ],
        );

        let reversed = collect_reverse(&patch);
        assert_eq!(
            reversed,
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::DeletePrefix {
                    graph: None,
                    prefix: "ex".to_string(),
                },
                ChangeItem::AddQuad(quad("b")),
                ChangeItem::DeleteQuad(quad("a")),
                ChangeItem::TxnCommit,
            ]
        );
    }

    #[test]
    fn test_reverse_skips_aborted_transactions() {
        let patch = Patch::new(
            PatchHeader::new(),
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("kept")),
                ChangeItem::TxnCommit,
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("dropped")),
                ChangeItem::TxnAbort,
            ],
        );

        let reversed = collect_reverse(&patch);
        assert_eq!(
            reversed,
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::DeleteQuad(quad("kept")),
                ChangeItem::TxnCommit,
            ]
        );
    }

    #[test]
    fn test_reverse_of_multiple_transactions_regroups() {
        let patch = Patch::new(
            PatchHeader::new(),
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("1")),
                ChangeItem::TxnCommit,
                ChangeItem::TxnBegin,
                ChangeItem::AddQuad(quad("2")),
                ChangeItem::TxnCommit,
            ],
        );
        let reversed = collect_reverse(&patch);
        assert_eq!(
            reversed,
            vec![
                ChangeItem::TxnBegin,
                ChangeItem::DeleteQuad(quad("2")),
                ChangeItem::TxnCommit,
                ChangeItem::TxnBegin,
                ChangeItem::DeleteQuad(quad("1")),
                ChangeItem::TxnCommit,
            ]
        );
    }

    #[test]
    fn test_patch_error_display_has_position() {
        let e = PatchError::Parse {
            line: 3,
            column: 7,
            message: "Code 'XX' not recognized".to_string(),
        };
        assert_eq!(e.to_string(), "[line: 3, col: 7] Code 'XX' not recognized");
    }
}
