//! Patch handler pipeline.
//!
//! A `Channel` delivers each patch to an ordered list of handlers and then
//! to one terminal handler. The terminal always runs, even when an earlier
//! handler failed; the first failure is reported after it has run.

pub mod dataset;
pub mod file_writer;
pub mod summary;
pub mod update;

use std::sync::{Arc, Mutex};

use crate::patch::{Patch, PatchError};

pub use dataset::{ApplyToDataset, InMemoryDataset};
pub use file_writer::PatchFileWriter;
pub use summary::{ChangeCounter, SummaryLogger};
pub use update::{HttpTransport, SparqlUpdateForwarder, UpdateTransport};

/// A consumer of whole patches.
pub trait PatchHandler: Send + Sync {
    /// Process one patch.
    ///
    /// # Errors
    ///
    /// Returns `PatchError` if the handler could not take the patch.
    fn handle(&self, patch: &Patch) -> Result<(), PatchError>;
}

/// Terminal that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl PatchHandler for NoOpHandler {
    fn handle(&self, _patch: &Patch) -> Result<(), PatchError> {
        Ok(())
    }
}

/// Ordered handlers plus a terminal.
///
/// # Invariants
///
/// - Every published patch reaches the terminal exactly once.
/// - Handlers run in the order they were added, then the terminal.
pub struct Channel {
    handlers: Vec<Arc<dyn PatchHandler>>,
    terminal: Arc<dyn PatchHandler>,
}

impl Channel {
    #[must_use]
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::default()
    }

    /// Deliver `patch` to every handler, then the terminal.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure, after the terminal has run. A
    /// terminal failure is returned when no earlier handler failed.
    pub fn publish(&self, patch: &Patch) -> Result<(), PatchError> {
        let mut first_error = None;
        for handler in &self.handlers {
            if let Err(e) = handler.handle(patch) {
                tracing::warn!("patch handler failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        let terminal_result = self.terminal.handle(patch);
        match first_error {
            Some(e) => {
                if let Err(te) = terminal_result {
                    tracing::warn!("terminal handler failed: {te}");
                }
                Err(e)
            }
            None => terminal_result,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl PatchHandler for Channel {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        self.publish(patch)
    }
}

pub struct ChannelBuilder {
    handlers: Vec<Arc<dyn PatchHandler>>,
    terminal: Arc<dyn PatchHandler>,
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            terminal: Arc::new(NoOpHandler),
        }
    }
}

impl ChannelBuilder {
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn PatchHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn terminal(mut self, terminal: Arc<dyn PatchHandler>) -> Self {
        self.terminal = terminal;
        self
    }

    #[must_use]
    pub fn build(self) -> Channel {
        Channel {
            handlers: self.handlers,
            terminal: self.terminal,
        }
    }
}

/// Keeps every patch it is given, in order.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    patches: Mutex<Vec<Patch>>,
}

impl CollectingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the patches received so far.
    pub fn patches(&self) -> Result<Vec<Patch>, PatchError> {
        self.patches
            .lock()
            .map(|p| p.clone())
            .map_err(|_| PatchError::Sink("collecting handler lock poisoned".to_string()))
    }

    /// Remove and return the patches received so far.
    pub fn drain(&self) -> Result<Vec<Patch>, PatchError> {
        self.patches
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .map_err(|_| PatchError::Sink("collecting handler lock poisoned".to_string()))
    }
}

impl PatchHandler for CollectingHandler {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        self.patches
            .lock()
            .map_err(|_| PatchError::Sink("collecting handler lock poisoned".to_string()))?
            .push(patch.clone());
        Ok(())
    }
}
