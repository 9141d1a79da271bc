//! Cross-process coordination.
//!
//! When several server processes share one patch store, "read the head and
//! append the next version" must run under a lock held in a coordination
//! service, with the head kept in a metadata node.
//!
//! # Sessions
//!
//! A `Coordinator` is bound to one session. Locks are ephemeral: they belong
//! to the session and vanish when it expires. After expiry every call on the
//! old session fails with `CoordError::SessionExpired`; a client must
//! reconnect to get a fresh session and must re-acquire any lock it needs.

use std::fmt;
use std::time::Duration;

pub mod memory;

pub use memory::{CoordinationService, MemCoordinator};

/// Identifier of a coordination session.
pub type SessionId = u64;

/// Errors raised by the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    SessionExpired(SessionId),
    ConnectionLoss,
    LockTimeout { path: String },
    NotLockOwner(String),
    NodeExists(String),
    NoNode(String),
    LockPoisoned,
    Corrupt(String),
    /// The node tree could not be written to or read from disk.
    Persistence(String),
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionExpired(id) => write!(f, "coordination session {id} expired"),
            Self::ConnectionLoss => write!(f, "lost connection to the coordination service"),
            Self::LockTimeout { path } => write!(f, "timed out waiting for lock {path}"),
            Self::NotLockOwner(path) => write!(f, "lock {path} is not held by this session"),
            Self::NodeExists(path) => write!(f, "node {path} already exists"),
            Self::NoNode(path) => write!(f, "no node at {path}"),
            Self::LockPoisoned => write!(f, "coordination state lock poisoned"),
            Self::Corrupt(msg) => write!(f, "corrupt coordination metadata: {msg}"),
            Self::Persistence(msg) => write!(f, "coordination state not saved: {msg}"),
        }
    }
}

impl std::error::Error for CoordError {}

/// A session-bound client of a coordination service.
///
/// Node paths are absolute and `/`-separated. Parents are implicit: a node
/// can be set without creating its parent first.
pub trait Coordinator: Send + Sync {
    /// The session this client currently speaks for.
    fn session_id(&self) -> SessionId;

    /// Block until the lock at `path` is held by this session.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::LockTimeout` if the lock is not granted within
    /// `timeout`.
    fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<(), CoordError>;

    /// Release a lock held by this session.
    fn release_lock(&self, path: &str) -> Result<(), CoordError>;

    /// The data at `path`, `None` if there is no such node.
    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, CoordError>;

    /// Create or replace the node at `path`.
    fn set_node(&self, path: &str, data: &[u8]) -> Result<(), CoordError>;

    /// Create the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::NodeExists` if it is already there.
    fn create_node(&self, path: &str, data: &[u8]) -> Result<(), CoordError>;

    /// Names of the immediate children of `path`, sorted.
    fn children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    /// Delete the node at `path` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::NoNode` if nothing exists at or below `path`.
    fn delete_node(&self, path: &str) -> Result<(), CoordError>;
}

/// Outcome of a failed `run_with_lock`: either the coordination service
/// failed or the action did.
#[derive(Debug, PartialEq, Eq)]
pub enum Locked<E> {
    Coordination(CoordError),
    Action(E),
}

impl<E: fmt::Display> fmt::Display for Locked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordination(e) => write!(f, "{e}"),
            Self::Action(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Locked<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Coordination(e) => Some(e),
            Self::Action(e) => Some(e),
        }
    }
}

/// Run `action` while holding the lock at `path`.
///
/// The lock is released on every exit path. If the action succeeded but the
/// release fails (for example because the session expired while the action
/// ran), the result is a coordination error: the caller cannot assume its
/// writes were made under the lock. If the action failed, its error wins and
/// the release failure is only logged.
pub fn run_with_lock<T, E>(
    coord: &dyn Coordinator,
    path: &str,
    timeout: Duration,
    action: impl FnOnce() -> Result<T, E>,
) -> Result<T, Locked<E>> {
    coord
        .acquire_lock(path, timeout)
        .map_err(Locked::Coordination)?;

    let result = action();

    match (result, coord.release_lock(path)) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => {
            tracing::warn!("lock {path} release failed after action: {e}");
            Err(Locked::Coordination(e))
        }
        (Err(e), Ok(())) => Err(Locked::Action(e)),
        (Err(e), Err(release)) => {
            tracing::warn!("lock {path} release failed after failed action: {release}");
            Err(Locked::Action(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn test_lock_released_after_success_and_failure() {
        let service = CoordinationService::new();
        let client = service.connect().expect("connect");

        let ok: Result<u32, Locked<String>> = run_with_lock(&client, "/l", TIMEOUT, || Ok(7));
        assert_eq!(ok, Ok(7));

        let failed: Result<u32, Locked<String>> =
            run_with_lock(&client, "/l", TIMEOUT, || Err("boom".to_string()));
        assert_eq!(failed, Err(Locked::Action("boom".to_string())));

        // Free again for another session.
        let other = service.connect().expect("connect");
        other.acquire_lock("/l", TIMEOUT).expect("lock is free");
    }

    #[test]
    fn test_session_loss_during_action_is_coordination_error() {
        let service = CoordinationService::new();
        let client = service.connect().expect("connect");
        let session = client.session_id();

        let result: Result<(), Locked<String>> = run_with_lock(&client, "/l", TIMEOUT, || {
            service.expire_session(session);
            Ok(())
        });
        assert_eq!(
            result,
            Err(Locked::Coordination(CoordError::SessionExpired(session)))
        );
    }

    #[test]
    fn test_lock_timeout_is_coordination_error() {
        let service = CoordinationService::new();
        let holder = service.connect().expect("connect");
        holder.acquire_lock("/l", TIMEOUT).expect("lock");

        let waiter = service.connect().expect("connect");
        let mut ran = false;
        let result: Result<(), Locked<String>> =
            run_with_lock(&waiter, "/l", Duration::from_millis(20), || {
                ran = true;
                Ok(())
            });
        assert!(!ran);
        assert!(matches!(
            result,
            Err(Locked::Coordination(CoordError::LockTimeout { .. }))
        ));
    }
}
