//! Durable receiver: every patch is written to a record store before the
//! handler returns.

use std::path::PathBuf;
use std::sync::Arc;

use crate::codec::{self, PatchFormat};
use crate::handlers::PatchHandler;
use crate::patch::{Patch, PatchError};
use crate::storage::{FileStore, RecordStore, StoreError};

pub struct PatchFileWriter {
    store: Arc<dyn RecordStore>,
}

impl PatchFileWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// A writer over a file store in `dir`.
    pub fn attach(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(FileStore::attach(dir)?)))
    }

    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }
}

impl PatchHandler for PatchFileWriter {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        let bytes = codec::encode(PatchFormat::Text, patch)?;
        let index = self
            .store
            .append(&bytes)
            .map_err(|e| PatchError::Sink(format!("failed to store patch: {e}")))?;
        let id = patch.id().map_or_else(String::new, |id| id.to_string());
        tracing::debug!("stored patch {id} as record {index}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchHeader;
    use crate::types::Id;
    use tempfile::tempdir;

    #[test]
    fn test_patches_are_written_in_order() {
        let dir = tempdir().expect("Failed to create temp dir");
        let writer = PatchFileWriter::attach(dir.path()).expect("attach");
        let first = Patch::transaction(PatchHeader::with_ids(&Id::new(), None), Vec::new());
        let header = PatchHeader::with_ids(&Id::new(), first.id().as_ref());
        let second = Patch::transaction(header, Vec::new());
        writer.handle(&first).expect("first");
        writer.handle(&second).expect("second");

        let store = writer.store();
        assert_eq!(store.indexes().expect("indexes"), vec![1, 2]);
        let back = codec::decode(PatchFormat::Text, &store.read(2).expect("read")).expect("decode");
        assert_eq!(back, second);
    }
}
