//! The id/version index of a patch log.
//!
//! A `LogIndex` knows which patch id sits at which version, where the log
//! starts and where its head is. It also owns the critical section for
//! appends: `run_with_lock` serializes "read the head, store the next
//! version, record it" for one log.
//!
//! Two implementations:
//! - `LocalLogIndex`: maps in memory, rebuilt from the record store on
//!   attach, guarded by an in-process mutex.
//! - `CoordinatedLogIndex`: the coordination service is the source of
//!   truth; a local mirror is refreshed under the distributed lock before
//!   every append.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coord::{self, CoordError, Coordinator, Locked};
use crate::log::LogError;
use crate::storage::RecoveryResult;
use crate::types::{Id, Version};

/// Root of all log nodes in the coordination service.
pub const LOGS_ROOT: &str = "/delta/logs";

pub trait LogIndex: Send + Sync {
    /// Run `action` inside this log's append critical section.
    fn run_with_lock(
        &self,
        action: &mut dyn FnMut() -> Result<Version, LogError>,
    ) -> Result<Version, LogError>;

    /// Bring the index up to date with its source of truth.
    fn sync(&self) -> Result<(), LogError> {
        Ok(())
    }

    fn earliest_version(&self) -> Result<Version, LogError>;

    fn current_version(&self) -> Result<Version, LogError>;

    /// Id of the head patch.
    fn current_id(&self) -> Result<Option<Id>, LogError>;

    fn version_of(&self, id: &Id) -> Result<Option<Version>, LogError>;

    fn id_of(&self, version: Version) -> Result<Option<Id>, LogError>;

    /// The version the next append gets.
    fn next_version(&self) -> Result<Version, LogError> {
        let current = self.current_version()?.as_index().unwrap_or(0);
        Ok(Version::from_index(current + 1))
    }

    /// Record `id` at `version`. Called with the critical section held,
    /// after the patch body is stored.
    fn save(&self, version: Version, id: &Id, previous: Option<&Id>) -> Result<(), LogError>;

    /// Drop versions from the start of the log through `version`. The head
    /// is never dropped. Returns what was dropped.
    fn retire_through(&self, version: Version) -> Result<Vec<(Version, Id)>, LogError>;

    fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.current_version()? == Version::INIT)
    }
}

/// The maps behind both index kinds.
#[derive(Debug, Clone)]
struct IndexState {
    versions: BTreeMap<Version, Id>,
    ids: HashMap<Id, Version>,
    earliest: Version,
    current: Version,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            versions: BTreeMap::new(),
            ids: HashMap::new(),
            earliest: Version::INIT,
            current: Version::INIT,
        }
    }
}

impl IndexState {
    fn from_recovery(recovery: &RecoveryResult) -> Self {
        Self {
            versions: recovery.versions.clone(),
            ids: recovery.ids.clone(),
            earliest: recovery.earliest(),
            current: recovery.current(),
        }
    }

    fn current_id(&self) -> Option<Id> {
        self.versions.get(&self.current).cloned()
    }

    fn record(&mut self, version: Version, id: Id) {
        if let Some(old) = self.versions.insert(version, id.clone()) {
            self.ids.remove(&old);
        }
        self.ids.insert(id, version);
        if self.earliest == Version::INIT {
            self.earliest = version;
        }
        if version > self.current {
            self.current = version;
        }
    }

    /// Highest version that `retire_through(version)` may drop.
    fn retire_bound(&self, version: Version) -> Option<Version> {
        let bound = version.min(self.current.dec().ok()?);
        bound.is_valid().then_some(bound)
    }

    fn retire_through(&mut self, version: Version) -> Vec<(Version, Id)> {
        let Some(bound) = self.retire_bound(version) else {
            return Vec::new();
        };
        let retired: Vec<(Version, Id)> = self
            .versions
            .range(..=bound)
            .map(|(v, id)| (*v, id.clone()))
            .collect();
        for (v, id) in &retired {
            self.versions.remove(v);
            self.ids.remove(id);
        }
        self.earliest = self
            .versions
            .keys()
            .next()
            .copied()
            .unwrap_or(self.current);
        retired
    }

    /// Drop everything below `earliest`.
    fn advance_earliest(&mut self, earliest: Version) {
        if earliest <= self.earliest {
            return;
        }
        let retired: Vec<Version> = self.versions.range(..earliest).map(|(v, _)| *v).collect();
        for v in retired {
            if let Some(id) = self.versions.remove(&v) {
                self.ids.remove(&id);
            }
        }
        self.earliest = earliest;
    }
}

fn read_state(lock: &RwLock<IndexState>) -> Result<RwLockReadGuard<'_, IndexState>, LogError> {
    lock.read().map_err(|_| LogError::LockPoisoned)
}

fn write_state(lock: &RwLock<IndexState>) -> Result<RwLockWriteGuard<'_, IndexState>, LogError> {
    lock.write().map_err(|_| LogError::LockPoisoned)
}

/// Index for a log owned by this process.
#[derive(Debug, Default)]
pub struct LocalLogIndex {
    state: RwLock<IndexState>,
    writer: Mutex<()>,
}

impl LocalLogIndex {
    /// An index for an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An index rebuilt by scanning the record store.
    #[must_use]
    pub fn from_recovery(recovery: &RecoveryResult) -> Self {
        Self {
            state: RwLock::new(IndexState::from_recovery(recovery)),
            writer: Mutex::new(()),
        }
    }
}

impl LogIndex for LocalLogIndex {
    fn run_with_lock(
        &self,
        action: &mut dyn FnMut() -> Result<Version, LogError>,
    ) -> Result<Version, LogError> {
        let _guard = self.writer.lock().map_err(|_| LogError::LockPoisoned)?;
        action()
    }

    fn earliest_version(&self) -> Result<Version, LogError> {
        Ok(read_state(&self.state)?.earliest)
    }

    fn current_version(&self) -> Result<Version, LogError> {
        Ok(read_state(&self.state)?.current)
    }

    fn current_id(&self) -> Result<Option<Id>, LogError> {
        Ok(read_state(&self.state)?.current_id())
    }

    fn version_of(&self, id: &Id) -> Result<Option<Version>, LogError> {
        Ok(read_state(&self.state)?.ids.get(id).copied())
    }

    fn id_of(&self, version: Version) -> Result<Option<Id>, LogError> {
        Ok(read_state(&self.state)?.versions.get(&version).cloned())
    }

    fn save(&self, version: Version, id: &Id, _previous: Option<&Id>) -> Result<(), LogError> {
        write_state(&self.state)?.record(version, id.clone());
        Ok(())
    }

    fn retire_through(&self, version: Version) -> Result<Vec<(Version, Id)>, LogError> {
        Ok(write_state(&self.state)?.retire_through(version))
    }
}

/// Head of a log as published in the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LogState {
    version: Version,
    id: Option<Id>,
    earliest: Version,
}

/// Per-patch entry under `headers/<id>`.
#[derive(Debug, Serialize, Deserialize)]
struct HeaderEntry {
    version: Version,
    previous: Option<Id>,
}

fn corrupt(path: &str, e: &serde_json::Error) -> LogError {
    LogError::Coordination(CoordError::Corrupt(format!("{path}: {e}")))
}

/// Node path of the log called `name`.
#[must_use]
pub fn log_path(name: &str) -> String {
    format!("{LOGS_ROOT}/{name}")
}

/// Index for a log shared between processes through a coordination service.
///
/// Layout under `/delta/logs/<name>`:
///
/// ```text
/// state               {"version": N, "id": "...", "earliest": N}
/// versions/00000001   patch id
/// headers/<id>        {"version": N, "previous": "..."}
/// lock                the append lock
/// ```
pub struct CoordinatedLogIndex {
    coord: Arc<dyn Coordinator>,
    name: String,
    root: String,
    lock_timeout: Duration,
    mirror: RwLock<IndexState>,
}

impl CoordinatedLogIndex {
    /// Connect to the log `name` and load its current state.
    pub fn new(
        coord: Arc<dyn Coordinator>,
        name: &str,
        lock_timeout: Duration,
    ) -> Result<Self, LogError> {
        let index = Self {
            coord,
            name: name.to_string(),
            root: log_path(name),
            lock_timeout,
            mirror: RwLock::new(IndexState::default()),
        };
        index.sync()?;
        Ok(index)
    }

    fn state_path(&self) -> String {
        format!("{}/state", self.root)
    }

    fn lock_path(&self) -> String {
        format!("{}/lock", self.root)
    }

    fn version_path(&self, version: Version) -> String {
        format!("{}/versions/{:08}", self.root, version.value())
    }

    fn header_path(&self, id: &Id) -> String {
        format!("{}/headers/{}", self.root, id.as_param())
    }

    fn fetch_state(&self) -> Result<Option<LogState>, LogError> {
        let path = self.state_path();
        let Some(bytes) = self.coord.fetch(&path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupt(&path, &e))
    }

    fn fetch_version_id(&self, version: Version) -> Result<Option<Id>, LogError> {
        Ok(self
            .coord
            .fetch(&self.version_path(version))?
            .map(|bytes| Id::from_string(&String::from_utf8_lossy(&bytes))))
    }

    fn publish_state(&self, state: &LogState) -> Result<(), LogError> {
        let path = self.state_path();
        let bytes = serde_json::to_vec(state).map_err(|e| corrupt(&path, &e))?;
        self.coord.set_node(&path, &bytes)?;
        Ok(())
    }
}

impl LogIndex for CoordinatedLogIndex {
    fn run_with_lock(
        &self,
        action: &mut dyn FnMut() -> Result<Version, LogError>,
    ) -> Result<Version, LogError> {
        coord::run_with_lock(&*self.coord, &self.lock_path(), self.lock_timeout, || {
            self.sync()?;
            action()
        })
        .map_err(|e| match e {
            Locked::Coordination(e) => LogError::Coordination(e),
            Locked::Action(e) => e,
        })
    }

    fn sync(&self) -> Result<(), LogError> {
        let Some(remote) = self.fetch_state()? else {
            return Ok(());
        };
        let mut mirror = write_state(&self.mirror)?;

        if remote.version < mirror.current {
            tracing::debug!(
                "{}: ignoring state {} older than {}",
                self.name,
                remote.version,
                mirror.current
            );
            return Ok(());
        }

        if remote.version == mirror.current {
            let local = mirror.current_id();
            if remote.id != local {
                tracing::error!(
                    "{}: version {} has id {} in the coordination service but {} locally",
                    self.name,
                    remote.version,
                    remote.id.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
                    local.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
                );
                if let Some(id) = remote.id.clone() {
                    mirror.record(remote.version, id);
                }
            }
            mirror.advance_earliest(remote.earliest);
            return Ok(());
        }

        let first = mirror.current.value().max(remote.earliest.value() - 1) + 1;
        for n in first..=remote.version.value() {
            let version = Version::create(n).map_err(|e| {
                LogError::Coordination(CoordError::Corrupt(format!("{}: {e}", self.name)))
            })?;
            match self.fetch_version_id(version)? {
                Some(id) => mirror.record(version, id),
                None => {
                    tracing::error!("{}: no id recorded for {version}", self.name);
                }
            }
        }
        mirror.current = remote.version;
        mirror.advance_earliest(remote.earliest);
        drop(mirror);
        Ok(())
    }

    fn earliest_version(&self) -> Result<Version, LogError> {
        Ok(read_state(&self.mirror)?.earliest)
    }

    fn current_version(&self) -> Result<Version, LogError> {
        Ok(read_state(&self.mirror)?.current)
    }

    fn current_id(&self) -> Result<Option<Id>, LogError> {
        Ok(read_state(&self.mirror)?.current_id())
    }

    fn version_of(&self, id: &Id) -> Result<Option<Version>, LogError> {
        Ok(read_state(&self.mirror)?.ids.get(id).copied())
    }

    fn id_of(&self, version: Version) -> Result<Option<Id>, LogError> {
        Ok(read_state(&self.mirror)?.versions.get(&version).cloned())
    }

    fn save(&self, version: Version, id: &Id, previous: Option<&Id>) -> Result<(), LogError> {
        self.coord
            .set_node(&self.version_path(version), id.as_param().as_bytes())?;

        let header_path = self.header_path(id);
        let entry = HeaderEntry {
            version,
            previous: previous.cloned(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| corrupt(&header_path, &e))?;
        self.coord.set_node(&header_path, &bytes)?;

        let earliest = match self.earliest_version()? {
            Version::INIT => version,
            earliest => earliest,
        };
        self.publish_state(&LogState {
            version,
            id: Some(id.clone()),
            earliest,
        })?;

        write_state(&self.mirror)?.record(version, id.clone());
        Ok(())
    }

    fn retire_through(&self, version: Version) -> Result<Vec<(Version, Id)>, LogError> {
        let (retired, state) = {
            let mut mirror = write_state(&self.mirror)?;
            let retired = mirror.retire_through(version);
            let state = LogState {
                version: mirror.current,
                id: mirror.current_id(),
                earliest: mirror.earliest,
            };
            (retired, state)
        };
        if retired.is_empty() {
            return Ok(retired);
        }
        self.publish_state(&state)?;
        for (v, id) in &retired {
            for path in [self.version_path(*v), self.header_path(id)] {
                match self.coord.delete_node(&path) {
                    Ok(()) | Err(CoordError::NoNode(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(retired)
    }
}
