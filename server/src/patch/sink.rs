//! The change-application contract.
//!
//! Every consumer of a patch stream implements `PatchSink`: codec writers,
//! the collector, dataset application, counters and forwarders. Readers
//! drive a sink; `Patch::play` drives one from memory.
//!
//! All methods default to doing nothing so that sinks only implement the
//! operations they care about.

use crate::patch::{PatchError, Quad};
use crate::types::Node;

pub trait PatchSink {
    /// Called once before the first operation of a stream.
    fn start(&mut self) -> Result<(), PatchError> {
        Ok(())
    }

    /// Called once after the last operation of a stream.
    fn finish(&mut self) -> Result<(), PatchError> {
        Ok(())
    }

    fn header(&mut self, _field: &str, _value: &Node) -> Result<(), PatchError> {
        Ok(())
    }

    fn add(&mut self, _quad: &Quad) -> Result<(), PatchError> {
        Ok(())
    }

    fn delete(&mut self, _quad: &Quad) -> Result<(), PatchError> {
        Ok(())
    }

    fn add_prefix(
        &mut self,
        _graph: Option<&Node>,
        _prefix: &str,
        _uri: &str,
    ) -> Result<(), PatchError> {
        Ok(())
    }

    fn delete_prefix(&mut self, _graph: Option<&Node>, _prefix: &str) -> Result<(), PatchError> {
        Ok(())
    }

    fn set_base(&mut self, _uri: &str) -> Result<(), PatchError> {
        Ok(())
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        Ok(())
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        Ok(())
    }

    fn segment(&mut self) -> Result<(), PatchError> {
        Ok(())
    }
}

/// A sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl PatchSink for NoOpSink {}
