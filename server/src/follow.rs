//! Replica follower.
//!
//! A replica keeps a local copy of a data source by applying each patch of
//! the log, in version order, through a handler channel. The last applied
//! version is kept in a `PersistentCounter` so a restarted replica resumes
//! where it stopped.

use std::path::PathBuf;
use std::sync::Arc;

use crate::handlers::Channel;
use crate::log::{LogError, PatchLog};
use crate::storage::PersistentCounter;
use crate::types::Version;

pub struct LogFollower {
    log: Arc<PatchLog>,
    channel: Channel,
    applied: PersistentCounter,
}

impl LogFollower {
    /// Follow `log`, recording progress in the counter file `state`.
    pub fn new(
        log: Arc<PatchLog>,
        channel: Channel,
        state: impl Into<PathBuf>,
    ) -> Result<Self, LogError> {
        let applied = PersistentCounter::open(state, Version::INIT.value())?;
        Ok(Self {
            log,
            channel,
            applied,
        })
    }

    /// The last version passed through the channel.
    pub fn applied_version(&self) -> Result<Version, LogError> {
        let value = self.applied.get()?;
        Version::create(value).map_err(|e| LogError::BadPatch(format!("follower state: {e}")))
    }

    /// Apply every version after the applied one up to the log's current
    /// version, and return the new applied version.
    ///
    /// The counter advances after each patch, so a failure leaves it at the
    /// last patch that went through.
    pub fn sync(&mut self) -> Result<Version, LogError> {
        self.log.sync()?;
        let applied = self.applied_version()?;
        let current = self.log.current_version()?;
        if !applied.is_before(current) {
            return Ok(applied);
        }

        let earliest = self.log.earliest_version()?;
        if applied.value() + 1 < earliest.value() {
            tracing::warn!(
                "{}: replica at {applied} is behind the earliest retained {earliest}",
                self.log.name()
            );
        }

        let from = applied.inc().unwrap_or(Version::FIRST);
        let mut last = applied;
        for entry in self.log.range(from, current)? {
            let (version, patch) = entry?;
            self.channel.publish(&patch)?;
            self.applied.set(version.value())?;
            last = version;
        }
        tracing::debug!("{}: replica synced to {last}", self.log.name());
        Ok(last)
    }
}
