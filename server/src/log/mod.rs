//! The patch log of one data source.
//!
//! A `PatchLog` combines a record store holding the encoded patches with a
//! `LogIndex` mapping ids to versions.
//!
//! # Append
//!
//! 1. Encode the patch (outside the critical section)
//! 2. Enter the index's critical section
//! 3. Validate the header against the head
//! 4. Store the body at the next version
//! 5. Record the version in the index; on failure remove the body again
//!
//! # Invariants
//!
//! - Versions handed out by `append` are 1, 2, 3, ... without repeats.
//! - A version is visible through `fetch` only once its index entry exists.
//! - Retired versions leave the rest of the log with their numbers intact.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub mod cache;
pub mod index;

pub use cache::PatchCache;
pub use index::{CoordinatedLogIndex, LocalLogIndex, LogIndex};

use crate::codec::{self, PatchFormat};
use crate::coord::{CoordError, Coordinator};
use crate::patch::{Patch, PatchError};
use crate::storage::{self, RecordStore, StoreError};
use crate::types::{Id, Version};

/// Default number of decoded patches kept per log.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Debug)]
pub enum LogError {
    /// The patch cannot be appended as it stands.
    BadPatch(String),
    /// The patch does not follow the head. The caller should re-read the
    /// head and retry.
    Sequence {
        expected: Option<Id>,
        declared: Option<Id>,
    },
    DuplicateId(Id),
    Store(StoreError),
    Patch(PatchError),
    Coordination(CoordError),
    LockPoisoned,
}

fn show(id: Option<&Id>) -> String {
    id.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPatch(msg) => write!(f, "bad patch: {msg}"),
            Self::Sequence { expected, declared } => write!(
                f,
                "patch out of sequence: head is {}, patch follows {}",
                show(expected.as_ref()),
                show(declared.as_ref())
            ),
            Self::DuplicateId(id) => write!(f, "patch {id} is already in the log"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Patch(e) => write!(f, "patch error: {e}"),
            Self::Coordination(e) => write!(f, "coordination error: {e}"),
            Self::LockPoisoned => write!(f, "log lock poisoned"),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Patch(e) => Some(e),
            Self::Coordination(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LogError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<PatchError> for LogError {
    fn from(e: PatchError) -> Self {
        Self::Patch(e)
    }
}

impl From<CoordError> for LogError {
    fn from(e: CoordError) -> Self {
        Self::Coordination(e)
    }
}

/// The history of one data source.
pub struct PatchLog {
    name: String,
    store: Arc<dyn RecordStore>,
    index: Box<dyn LogIndex>,
    cache: PatchCache,
}

impl fmt::Debug for PatchLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchLog")
            .field("name", &self.name)
            .field("earliest", &self.index.earliest_version().ok())
            .field("current", &self.index.current_version().ok())
            .finish_non_exhaustive()
    }
}

impl PatchLog {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RecordStore>,
        index: Box<dyn LogIndex>,
        cache_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            index,
            cache: PatchCache::new(cache_size),
        }
    }

    /// A log owned by this process, with its index rebuilt from `store`.
    pub fn attach_local(
        name: impl Into<String>,
        store: Arc<dyn RecordStore>,
        cache_size: usize,
    ) -> Result<Self, LogError> {
        let name = name.into();
        let recovery = storage::recover(store.as_ref())?;
        if !recovery.skipped.is_empty() {
            tracing::warn!(
                "{name}: {} records left out of the log on attach",
                recovery.skipped.len()
            );
        }
        let index = LocalLogIndex::from_recovery(&recovery);
        Ok(Self::new(name, store, Box::new(index), cache_size))
    }

    /// A log shared through a coordination service. `store` must be the same
    /// record store every participant writes to.
    pub fn coordinated(
        name: impl Into<String>,
        store: Arc<dyn RecordStore>,
        coord: Arc<dyn Coordinator>,
        lock_timeout: Duration,
        cache_size: usize,
    ) -> Result<Self, LogError> {
        let name = name.into();
        let index = CoordinatedLogIndex::new(coord, &name, lock_timeout)?;
        Ok(Self::new(name, store, Box::new(index), cache_size))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `patch` and return its version.
    ///
    /// # Errors
    ///
    /// - `LogError::BadPatch` if the patch has no id
    /// - `LogError::DuplicateId` if the id is already in the log
    /// - `LogError::Sequence` if `previous` is not the head
    /// - `LogError::Store` or `LogError::Coordination` if the write failed;
    ///   nothing is appended in that case
    pub fn append(&self, patch: &Patch) -> Result<Version, LogError> {
        let id = patch
            .id()
            .ok_or_else(|| LogError::BadPatch("patch has no id".to_string()))?;
        let previous = patch.previous();
        let body = codec::encode(PatchFormat::Text, patch)?;

        let mut action = || self.append_locked(patch, &id, previous.as_ref(), &body);
        self.index.run_with_lock(&mut action)
    }

    fn append_locked(
        &self,
        patch: &Patch,
        id: &Id,
        previous: Option<&Id>,
        body: &[u8],
    ) -> Result<Version, LogError> {
        let head = self.index.current_id()?;

        if head.as_ref() == Some(id) {
            let version = self.index.current_version()?;
            let recorded = match version.dec() {
                Ok(before) => self.index.id_of(before)?,
                Err(_) => None,
            };
            if recorded.is_some() && recorded.as_ref() != previous {
                tracing::warn!(
                    "{}: replay of head {id} names previous {} but the log has {}",
                    self.name,
                    show(previous),
                    show(recorded.as_ref())
                );
            }
            tracing::info!("{}: patch {id} is already the head at {version}", self.name);
            return Ok(version);
        }

        if self.index.version_of(id)?.is_some() {
            return Err(LogError::DuplicateId(id.clone()));
        }

        if previous != head.as_ref() {
            return Err(LogError::Sequence {
                expected: head,
                declared: previous.cloned(),
            });
        }

        let mut version = self.index.next_version()?;
        let stored = self.store.current_index()?;
        if version.as_index().is_some_and(|index| stored >= index) {
            // Records the index left out on attach still occupy their slots.
            tracing::warn!(
                "{}: record {stored} exists past the head, skipping to {}",
                self.name,
                stored + 1
            );
            version = Version::from_index(stored + 1);
        }
        let index = version
            .as_index()
            .ok_or_else(|| LogError::BadPatch(format!("no record slot for {version}")))?;

        let mut pending = self.store.allocate_at(index)?;
        pending.write_all(body).map_err(StoreError::from)?;
        pending.complete()?;

        if let Err(e) = self.index.save(version, id, previous) {
            if let Err(delete) = self.store.delete(index) {
                tracing::error!(
                    "{}: failed to remove record {index} after index failure: {delete}",
                    self.name
                );
            }
            return Err(e);
        }

        if let Err(e) = self.cache.put(id.clone(), patch.clone()) {
            tracing::warn!("{}: patch {id} not cached: {e}", self.name);
        }
        tracing::info!("{}: append {version} id={id}", self.name);
        Ok(version)
    }

    /// The patch at `version`, `None` outside `[earliest, current]`.
    pub fn fetch(&self, version: Version) -> Result<Option<Patch>, LogError> {
        if version.is_after(self.index.current_version()?) {
            self.sync_quietly();
        }
        if !version.is_valid()
            || version.is_before(self.index.earliest_version()?)
            || version.is_after(self.index.current_version()?)
        {
            return Ok(None);
        }
        let Some(id) = self.index.id_of(version)? else {
            return Ok(None);
        };
        self.read_patch(version, &id)
    }

    pub fn fetch_by_id(&self, id: &Id) -> Result<Option<Patch>, LogError> {
        match self.index.version_of(id)? {
            Some(version) => self.read_patch(version, id),
            None => Ok(None),
        }
    }

    fn read_patch(&self, version: Version, id: &Id) -> Result<Option<Patch>, LogError> {
        if let Some(patch) = self.cache.get(id)? {
            return Ok(Some(patch));
        }
        let Some(index) = version.as_index() else {
            return Ok(None);
        };
        let bytes = match self.store.read(index) {
            Ok(bytes) => bytes,
            // Retired underneath us.
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let patch = codec::decode(PatchFormat::Text, &bytes)?;
        self.cache.put(id.clone(), patch.clone())?;
        Ok(Some(patch))
    }

    /// Patches from `from` to `to` inclusive, clamped to the log.
    pub fn range(
        &self,
        from: Version,
        to: Version,
    ) -> Result<impl Iterator<Item = Result<(Version, Patch), LogError>> + '_, LogError> {
        let start = from
            .value()
            .max(self.index.earliest_version()?.value())
            .max(Version::FIRST.value());
        let end = to.value().min(self.index.current_version()?.value());
        Ok((start..=end).filter_map(move |n| {
            let version = Version::create(n).ok()?;
            self.fetch(version)
                .map(|patch| patch.map(|patch| (version, patch)))
                .transpose()
        }))
    }

    pub fn is_empty(&self) -> Result<bool, LogError> {
        self.index.is_empty()
    }

    pub fn earliest_version(&self) -> Result<Version, LogError> {
        self.index.earliest_version()
    }

    pub fn current_version(&self) -> Result<Version, LogError> {
        self.index.current_version()
    }

    /// Id of the head patch.
    pub fn current_id(&self) -> Result<Option<Id>, LogError> {
        self.index.current_id()
    }

    pub fn version_of(&self, id: &Id) -> Result<Option<Version>, LogError> {
        self.index.version_of(id)
    }

    pub fn id_of(&self, version: Version) -> Result<Option<Id>, LogError> {
        self.index.id_of(version)
    }

    /// Refresh the index from its source of truth.
    pub fn sync(&self) -> Result<(), LogError> {
        self.index.sync()
    }

    fn sync_quietly(&self) {
        if let Err(e) = self.index.sync() {
            tracing::warn!("{}: could not refresh index: {e}", self.name);
        }
    }

    /// Remove versions from the start of the log through `version` and
    /// return the new earliest version. The head always stays.
    pub fn retire_through(&self, version: Version) -> Result<Version, LogError> {
        let mut action = || {
            let retired = self.index.retire_through(version)?;
            // Recovery links the first kept record through this id.
            if let Some((_, boundary)) = retired.iter().max_by_key(|(v, _)| *v) {
                self.store.set_retired_boundary(boundary)?;
            }
            for (retired_version, id) in &retired {
                self.cache.remove(id)?;
                let Some(index) = retired_version.as_index() else {
                    continue;
                };
                match self.store.delete(index) {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if !retired.is_empty() {
                tracing::info!(
                    "{}: retired {} versions, earliest is now {}",
                    self.name,
                    retired.len(),
                    self.index.earliest_version()?
                );
            }
            self.index.earliest_version()
        };
        self.index.run_with_lock(&mut action)
    }
}
