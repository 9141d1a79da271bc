//! Record store abstraction.
//!
//! A record store keeps an append-only sequence of opaque byte records
//! addressed by a positive integer index. The file store is used in
//! production; the in-memory store backs tests and the coordinated
//! provider, and can inject faults.
//!
//! # Publication
//!
//! A record is written through a `PendingWrite` and becomes visible only
//! when `complete` succeeds. A pending write that is dropped, or abandoned
//! by a crash, leaves no trace in `indexes()` and cannot be opened.
//!
//! # Retired Boundary
//!
//! Retiring removes records from the start of the sequence. The store keeps
//! the id of the newest retired patch so that recovery can tell a first
//! record that follows a retired one from a record whose predecessor was
//! lost.
//!
//! # Single Writer
//!
//! At most one pending write exists per store at a time. Allocation blocks
//! until the previous pending write is completed or dropped, so indexes are
//! never handed out twice.

use std::io::{Read, Write};
use std::ops::RangeInclusive;
use std::sync::{Condvar, Mutex};

use crate::types::Id;

/// Errors from record store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// No committed record at this index.
    NotFound(u64),
    /// A committed record already exists at this index.
    AlreadyExists(u64),
    /// Index 0 and indexes past the end of the sequence are never allocated.
    InvalidIndex(u64),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// Corruption detected.
    Corruption(String),
    /// A lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotFound(index) => write!(f, "no record at index {index}"),
            Self::AlreadyExists(index) => write!(f, "record {index} already exists"),
            Self::InvalidIndex(index) => write!(f, "invalid record index {index}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::LockPoisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A record being written. Dropping it without `complete` discards it.
pub trait PendingWrite: Write + Send {
    /// The index this record will occupy.
    fn index(&self) -> u64;

    /// Make the record durable and visible to readers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record could not be published; the index
    /// is then free again.
    fn complete(self: Box<Self>) -> Result<(), StoreError>;
}

/// Append-only sequence of records.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `indexes` and `open` only ever see completed records
/// - `allocate_next` returns one more than the largest committed index
/// - a failed or abandoned write leaves the sequence unchanged
pub trait RecordStore: Send + Sync {
    /// Reserve the index after the largest committed one.
    fn allocate_next(&self) -> Result<Box<dyn PendingWrite + '_>, StoreError>;

    /// Reserve a specific index. Used when the index is decided elsewhere,
    /// e.g. by a coordination service.
    fn allocate_at(&self, index: u64) -> Result<Box<dyn PendingWrite + '_>, StoreError>;

    /// Open a committed record.
    fn open(&self, index: u64) -> Result<Box<dyn Read + Send + '_>, StoreError>;

    /// Read a committed record into memory.
    fn read(&self, index: u64) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        self.open(index)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Committed indexes in ascending order.
    fn indexes(&self) -> Result<Vec<u64>, StoreError>;

    /// Remove one committed record.
    fn delete(&self, index: u64) -> Result<(), StoreError>;

    /// Remove every committed record in `range`. Missing records are skipped.
    fn retire(&self, range: RangeInclusive<u64>) -> Result<(), StoreError> {
        for index in self.indexes()? {
            if range.contains(&index) {
                self.delete(index)?;
            }
        }
        Ok(())
    }

    /// Id of the newest retired patch, if anything was ever retired.
    fn retired_boundary(&self) -> Result<Option<Id>, StoreError>;

    /// Remember `id` as the newest retired patch. Written before the
    /// retired records are deleted.
    fn set_retired_boundary(&self, id: &Id) -> Result<(), StoreError>;

    /// Largest committed index, 0 if there is none.
    fn current_index(&self) -> Result<u64, StoreError> {
        Ok(self.indexes()?.last().copied().unwrap_or(0))
    }

    /// Write and complete a record at the next index.
    fn append(&self, bytes: &[u8]) -> Result<u64, StoreError> {
        let mut pending = self.allocate_next()?;
        pending.write_all(bytes)?;
        let index = pending.index();
        pending.complete()?;
        Ok(index)
    }
}

/// The single-writer token shared by the store implementations.
#[derive(Debug, Default)]
pub(crate) struct WriterSlot {
    busy: Mutex<bool>,
    released: Condvar,
}

impl WriterSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until no other write is pending, then take the slot.
    pub(crate) fn acquire(&self) -> Result<WriterToken<'_>, StoreError> {
        let mut busy = self.busy.lock().map_err(|_| StoreError::LockPoisoned)?;
        while *busy {
            busy = self
                .released
                .wait(busy)
                .map_err(|_| StoreError::LockPoisoned)?;
        }
        *busy = true;
        Ok(WriterToken { slot: self })
    }
}

/// Held by a pending write; releases the slot on drop.
#[derive(Debug)]
pub(crate) struct WriterToken<'a> {
    slot: &'a WriterSlot,
}

impl Drop for WriterToken<'_> {
    fn drop(&mut self) {
        match self.slot.busy.lock() {
            Ok(mut busy) => *busy = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
        self.slot.released.notify_one();
    }
}
