//! Per-patch change tallies.

use crate::handlers::PatchHandler;
use crate::patch::header::HEADER_ID;
use crate::patch::{Patch, PatchError, PatchSink, Quad};
use crate::types::Node;

const ID_DISPLAY_LEN: usize = 11;

/// Counts quad and prefix operations delivered to it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeCounter {
    pub add_quads: u64,
    pub delete_quads: u64,
    pub add_prefixes: u64,
    pub delete_prefixes: u64,
    pub txn_begins: u64,
    pub txn_commits: u64,
    pub txn_aborts: u64,
    id: Option<Node>,
}

impl ChangeCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(patch: &Patch) -> Self {
        let mut counter = Self::new();
        // Counting never fails.
        let _ = patch.play(&mut counter);
        counter
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The `id` header as text, cut to a fixed display width.
    #[must_use]
    pub fn id_label(&self) -> String {
        let text = match &self.id {
            None => "unset".to_string(),
            Some(Node::Iri(s) | Node::Blank(s) | Node::Variable(s)) => s.clone(),
            Some(Node::Literal { lexical, .. }) => lexical.clone(),
        };
        if text.chars().count() > ID_DISPLAY_LEN {
            let mut cut: String = text.chars().take(ID_DISPLAY_LEN).collect();
            cut.push_str("...");
            cut
        } else {
            text
        }
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{} :: QA: {} :: QD {} :: PA {} :: PD {}",
            self.id_label(),
            self.add_quads,
            self.delete_quads,
            self.add_prefixes,
            self.delete_prefixes
        )
    }
}

impl PatchSink for ChangeCounter {
    fn header(&mut self, field: &str, value: &Node) -> Result<(), PatchError> {
        if field == HEADER_ID {
            self.id = Some(value.clone());
        }
        Ok(())
    }

    fn add(&mut self, _quad: &Quad) -> Result<(), PatchError> {
        self.add_quads += 1;
        Ok(())
    }

    fn delete(&mut self, _quad: &Quad) -> Result<(), PatchError> {
        self.delete_quads += 1;
        Ok(())
    }

    fn add_prefix(
        &mut self,
        _graph: Option<&Node>,
        _prefix: &str,
        _uri: &str,
    ) -> Result<(), PatchError> {
        self.add_prefixes += 1;
        Ok(())
    }

    fn delete_prefix(&mut self, _graph: Option<&Node>, _prefix: &str) -> Result<(), PatchError> {
        self.delete_prefixes += 1;
        Ok(())
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        self.txn_begins += 1;
        Ok(())
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.txn_commits += 1;
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.txn_aborts += 1;
        Ok(())
    }
}

/// Logs one summary line per patch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryLogger;

impl PatchHandler for SummaryLogger {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        tracing::info!("{}", ChangeCounter::count(patch).summary_line());
        Ok(())
    }
}
