//! Patch record storage.
//!
//! Each data source keeps its patches as a sequence of opaque records in a
//! `RecordStore`. Record index N holds version N.
//!
//! # Layout
//!
//! The file store keeps one directory per log:
//!
//! ```text
//! <area>/Log/patch-0001
//! <area>/Log/patch-0002
//! <area>/Log/tmp-0003      (being written; removed on attach)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let store = FileStore::attach(dir)?;
//! let mut pending = store.allocate_next()?;
//! pending.write_all(bytes)?;
//! pending.complete()?;
//!
//! let recovered = recovery::recover(&store)?;
//! ```

pub mod file;
pub mod io;
pub mod memory;
pub mod recovery;
pub mod state;

pub use file::FileStore;
pub use io::{PendingWrite, RecordStore, StoreError};
pub use memory::{FaultConfig, MemStore, MemStoreStats};
pub use recovery::{RecoveryResult, SkipReason, recover};
pub use state::{PersistentCounter, PersistentState};
