//! Driving a sink from an encoded stream.
//!
//! # State Machine
//!
//! ```text
//!   Idle --TX / first data op--> InTransaction --TC / TA--> Idle
//!     \                               |
//!      \----------- error ------------+--> Finished
//! ```
//!
//! A decode failure while a transaction is open delivers `txn_abort` to the
//! sink before the error is returned, so a half-applied patch is never
//! mistaken for a committed one. After a failure the reader is finished and
//! reports no more input.

use crate::patch::{PatchError, PatchSink};

/// A pull-driven patch reader.
pub trait PatchProcessor {
    /// Process records until the end of one transaction (commit or abort)
    /// or the end of input.
    fn apply_one(&mut self, sink: &mut dyn PatchSink) -> Result<(), PatchError>;

    /// Whether another record may follow.
    fn has_more(&mut self) -> Result<bool, PatchError>;

    /// Stop reading after `err`, aborting an open transaction in `sink`.
    fn fail(&mut self, sink: &mut dyn PatchSink, err: PatchError) -> PatchError;

    /// Process the whole stream, bracketed by `start` and `finish`.
    fn apply(&mut self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        sink.start()?;
        loop {
            match self.has_more() {
                Ok(true) => self.apply_one(sink)?,
                Ok(false) => break,
                Err(e) => return Err(self.fail(sink, e)),
            }
        }
        sink.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    InTransaction,
    Finished,
}

/// Transaction bookkeeping shared by the text and binary readers.
#[derive(Debug)]
pub(crate) struct TxnTracker {
    state: ReaderState,
}

impl TxnTracker {
    pub(crate) const fn new() -> Self {
        Self {
            state: ReaderState::Idle,
        }
    }

    pub(crate) const fn state(&self) -> ReaderState {
        self.state
    }

    pub(crate) const fn is_finished(&self) -> bool {
        matches!(self.state, ReaderState::Finished)
    }

    pub(crate) fn begin(&mut self) {
        self.state = ReaderState::InTransaction;
    }

    /// A data or prefix operation; opens an implicit transaction.
    pub(crate) fn data(&mut self) {
        if self.state == ReaderState::Idle {
            self.state = ReaderState::InTransaction;
        }
    }

    pub(crate) fn end(&mut self) {
        self.state = ReaderState::Idle;
    }

    pub(crate) fn finish(&mut self) {
        self.state = ReaderState::Finished;
    }

    /// Halt the stream after a failure, aborting any open transaction.
    pub(crate) fn fail(&mut self, sink: &mut dyn PatchSink, err: PatchError) -> PatchError {
        if self.state == ReaderState::InTransaction {
            if let Err(abort_err) = sink.txn_abort() {
                tracing::warn!("abort after patch read failure also failed: {abort_err}");
            }
        }
        self.state = ReaderState::Finished;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchCollector;

    #[test]
    fn test_fail_aborts_open_transaction() {
        let mut tracker = TxnTracker::new();
        tracker.data();
        assert_eq!(tracker.state(), ReaderState::InTransaction);

        let mut sink = PatchCollector::new();
        let err = tracker.fail(&mut sink, PatchError::Truncated("no DOT".to_string()));
        assert!(matches!(err, PatchError::Truncated(_)));
        assert!(tracker.is_finished());
        assert_eq!(sink.into_patch().items(), &[crate::patch::ChangeItem::TxnAbort]);
    }

    #[test]
    fn test_fail_when_idle_sends_nothing() {
        let mut tracker = TxnTracker::new();
        let mut sink = PatchCollector::new();
        let _ = tracker.fail(&mut sink, PatchError::Decode("bad".to_string()));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_commit_returns_to_idle() {
        let mut tracker = TxnTracker::new();
        tracker.begin();
        tracker.end();
        assert_eq!(tracker.state(), ReaderState::Idle);
    }
}
