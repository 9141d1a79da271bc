//! In-process coordination service.
//!
//! Holds the node tree, the lock table and the set of live sessions behind
//! one mutex. Lock waiters park on a condvar that is notified on every
//! release and every session expiry.
//!
//! A service opened with `persistent` writes the node tree through to a
//! `PersistentState` file after every change, so nodes outlive the process.
//! Locks and sessions are ephemeral and never written.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::coord::{CoordError, Coordinator, SessionId};
use crate::storage::PersistentState;

#[derive(Debug, Default)]
struct ServiceState {
    nodes: BTreeMap<String, Vec<u8>>,
    /// Lock path to owning session.
    locks: HashMap<String, SessionId>,
    live: HashSet<SessionId>,
    next_session: SessionId,
    /// Where the node tree is written through to, if anywhere.
    saved: Option<PersistentState>,
}

impl ServiceState {
    fn save(&mut self) -> Result<(), CoordError> {
        let Self { nodes, saved, .. } = self;
        let Some(saved) = saved else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(nodes).map_err(|e| CoordError::Corrupt(e.to_string()))?;
        saved
            .set(&bytes)
            .map_err(|e| CoordError::Persistence(e.to_string()))
    }

    fn open_session(&mut self) -> SessionId {
        self.next_session += 1;
        let id = self.next_session;
        self.live.insert(id);
        id
    }

    fn check_live(&self, session: SessionId) -> Result<(), CoordError> {
        if self.live.contains(&session) {
            Ok(())
        } else {
            Err(CoordError::SessionExpired(session))
        }
    }
}

/// A coordination service shared by every client in the process.
#[derive(Debug, Default)]
pub struct CoordinationService {
    state: Mutex<ServiceState>,
    released: Condvar,
}

impl CoordinationService {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A service whose node tree is kept in the file at `path` and reloaded
    /// from it on the next start.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::Persistence` if the file cannot be read, and
    /// `CoordError::Corrupt` if it does not hold a node tree.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Arc<Self>, CoordError> {
        let path = path.into();
        let saved =
            PersistentState::open(&path).map_err(|e| CoordError::Persistence(e.to_string()))?;
        let nodes = if saved.get().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_slice(saved.get())
                .map_err(|e| CoordError::Corrupt(format!("{}: {e}", path.display())))?
        };
        tracing::info!(
            "coordination state {} loaded with {} nodes",
            path.display(),
            nodes.len()
        );
        Ok(Arc::new(Self {
            state: Mutex::new(ServiceState {
                nodes,
                saved: Some(saved),
                ..ServiceState::default()
            }),
            released: Condvar::new(),
        }))
    }

    /// Open a new session and return a client bound to it.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn connect(self: &Arc<Self>) -> Result<MemCoordinator, CoordError> {
        let session = self.open_session()?;
        Ok(MemCoordinator {
            service: Arc::clone(self),
            session: AtomicU64::new(session),
        })
    }

    /// End `session`: its locks are dropped and later calls on it fail.
    pub fn expire_session(&self, session: SessionId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.live.remove(&session) {
            state.locks.retain(|_, owner| *owner != session);
            tracing::warn!("coordination session {session} expired");
        }
        drop(state);
        self.released.notify_all();
    }

    /// Whether `session` is still live.
    #[must_use]
    pub fn is_live(&self, session: SessionId) -> bool {
        self.state
            .lock()
            .is_ok_and(|state| state.live.contains(&session))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ServiceState>, CoordError> {
        self.state.lock().map_err(|_| CoordError::LockPoisoned)
    }

    fn open_session(&self) -> Result<SessionId, CoordError> {
        Ok(self.lock_state()?.open_session())
    }

    fn acquire(&self, session: SessionId, path: &str, timeout: Duration) -> Result<(), CoordError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state()?;
        loop {
            state.check_live(session)?;
            if !state.locks.contains_key(path) {
                state.locks.insert(path.to_string(), session);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoordError::LockTimeout {
                    path: path.to_string(),
                });
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|_| CoordError::LockPoisoned)?
                .0;
        }
    }

    fn release(&self, session: SessionId, path: &str) -> Result<(), CoordError> {
        let mut state = self.lock_state()?;
        state.check_live(session)?;
        if state.locks.get(path) != Some(&session) {
            return Err(CoordError::NotLockOwner(path.to_string()));
        }
        state.locks.remove(path);
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    fn with_live<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut ServiceState) -> Result<T, CoordError>,
    ) -> Result<T, CoordError> {
        let mut state = self.lock_state()?;
        state.check_live(session)?;
        f(&mut state)
    }

    /// Like `with_live`, for calls that change the node tree. The change is
    /// undone if it cannot be written through.
    fn update_live<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut ServiceState) -> Result<T, CoordError>,
    ) -> Result<T, CoordError> {
        let mut state = self.lock_state()?;
        state.check_live(session)?;
        let before = state.saved.is_some().then(|| state.nodes.clone());
        let out = f(&mut state)?;
        if let Err(e) = state.save() {
            if let Some(nodes) = before {
                state.nodes = nodes;
            }
            return Err(e);
        }
        Ok(out)
    }
}

fn descendants_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// A client of a `CoordinationService`.
#[derive(Debug)]
pub struct MemCoordinator {
    service: Arc<CoordinationService>,
    session: AtomicU64,
}

impl MemCoordinator {
    /// Replace the session with a fresh one. Locks held by the old session
    /// are not carried over.
    pub fn reconnect(&self) -> Result<SessionId, CoordError> {
        let old = self.session_id();
        self.service.expire_session(old);
        let session = self.service.open_session()?;
        self.session.store(session, Ordering::SeqCst);
        tracing::info!("coordination session {old} replaced by {session}");
        Ok(session)
    }

    #[must_use]
    pub fn service(&self) -> &CoordinationService {
        &self.service
    }
}

impl Coordinator for MemCoordinator {
    fn session_id(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    fn acquire_lock(&self, path: &str, timeout: Duration) -> Result<(), CoordError> {
        self.service.acquire(self.session_id(), path, timeout)
    }

    fn release_lock(&self, path: &str) -> Result<(), CoordError> {
        self.service.release(self.session_id(), path)
    }

    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, CoordError> {
        self.service
            .with_live(self.session_id(), |state| Ok(state.nodes.get(path).cloned()))
    }

    fn set_node(&self, path: &str, data: &[u8]) -> Result<(), CoordError> {
        self.service.update_live(self.session_id(), |state| {
            state.nodes.insert(path.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn create_node(&self, path: &str, data: &[u8]) -> Result<(), CoordError> {
        self.service.update_live(self.session_id(), |state| {
            if state.nodes.contains_key(path) {
                return Err(CoordError::NodeExists(path.to_string()));
            }
            state.nodes.insert(path.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let prefix = descendants_prefix(path);
        self.service.with_live(self.session_id(), |state| {
            let names: BTreeSet<String> = state
                .nodes
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .collect();
            Ok(names.into_iter().collect())
        })
    }

    fn delete_node(&self, path: &str) -> Result<(), CoordError> {
        let prefix = descendants_prefix(path);
        self.service.update_live(self.session_id(), |state| {
            let before = state.nodes.len();
            state
                .nodes
                .retain(|key, _| key != path && !key.starts_with(&prefix));
            if state.nodes.len() == before {
                return Err(CoordError::NoNode(path.to_string()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn test_nodes() {
        let service = CoordinationService::new();
        let client = service.connect().expect("connect");

        assert_eq!(client.fetch("/a").expect("fetch"), None);
        client.create_node("/a", b"1").expect("create");
        assert_eq!(
            client.create_node("/a", b"2"),
            Err(CoordError::NodeExists("/a".to_string()))
        );
        client.set_node("/a", b"2").expect("set");
        assert_eq!(client.fetch("/a").expect("fetch"), Some(b"2".to_vec()));

        client.set_node("/a/x/deep", b"").expect("set");
        client.set_node("/a/y", b"").expect("set");
        client.set_node("/ab", b"").expect("set");
        assert_eq!(client.children("/a").expect("children"), vec!["x", "y"]);

        client.delete_node("/a").expect("delete");
        assert_eq!(client.fetch("/a/y").expect("fetch"), None);
        assert_eq!(client.fetch("/ab").expect("fetch"), Some(Vec::new()));
        assert_eq!(
            client.delete_node("/a"),
            Err(CoordError::NoNode("/a".to_string()))
        );
    }

    #[test]
    fn test_lock_excludes_other_sessions() {
        let service = CoordinationService::new();
        let a = service.connect().expect("connect");
        let b = service.connect().expect("connect");

        a.acquire_lock("/lock", TIMEOUT).expect("a locks");
        assert!(matches!(
            b.acquire_lock("/lock", Duration::from_millis(10)),
            Err(CoordError::LockTimeout { .. })
        ));
        assert_eq!(
            b.release_lock("/lock"),
            Err(CoordError::NotLockOwner("/lock".to_string()))
        );
        a.release_lock("/lock").expect("release");
        b.acquire_lock("/lock", TIMEOUT).expect("b locks");
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let service = CoordinationService::new();
        let a = service.connect().expect("connect");
        a.acquire_lock("/lock", TIMEOUT).expect("lock");

        let b = service.connect().expect("connect");
        let waiter = thread::spawn(move || b.acquire_lock("/lock", Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        a.release_lock("/lock").expect("release");
        waiter.join().expect("join").expect("b locks");
    }

    #[test]
    fn test_expiry_drops_locks_and_fails_calls() {
        let service = CoordinationService::new();
        let a = service.connect().expect("connect");
        let b = service.connect().expect("connect");
        a.acquire_lock("/lock", TIMEOUT).expect("lock");

        let session = a.session_id();
        service.expire_session(session);
        assert!(!service.is_live(session));
        assert_eq!(a.fetch("/x"), Err(CoordError::SessionExpired(session)));
        b.acquire_lock("/lock", TIMEOUT).expect("lock freed by expiry");
    }

    #[test]
    fn test_persistent_nodes_survive_restart() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("coord");
        {
            let service = CoordinationService::persistent(&path).expect("open");
            let client = service.connect().expect("connect");
            client.set_node("/logs/a/state", b"1").expect("set");
            client.set_node("/logs/b/state", b"2").expect("set");
            client.delete_node("/logs/b").expect("delete");
            client.acquire_lock("/logs/a/lock", TIMEOUT).expect("lock");
        }
        let service = CoordinationService::persistent(&path).expect("reopen");
        let client = service.connect().expect("connect");
        assert_eq!(client.fetch("/logs/a/state").expect("fetch"), Some(b"1".to_vec()));
        assert_eq!(client.children("/logs").expect("children"), vec!["a"]);
        // Locks belonged to the old process.
        client.acquire_lock("/logs/a/lock", TIMEOUT).expect("lock");
    }

    #[test]
    fn test_poisoned_service_refuses_sessions() {
        let service = CoordinationService::new();
        let poisoner = Arc::clone(&service);
        let result = thread::spawn(move || {
            let _guard = poisoner.state.lock().expect("lock");
            panic!("poison the service");
        })
        .join();
        assert!(result.is_err());
        assert!(matches!(service.connect(), Err(CoordError::LockPoisoned)));
    }

    #[test]
    fn test_reconnect_does_not_carry_locks() {
        let service = CoordinationService::new();
        let a = service.connect().expect("connect");
        a.acquire_lock("/lock", TIMEOUT).expect("lock");
        let old = a.session_id();

        let fresh = a.reconnect().expect("reconnect");
        assert_ne!(fresh, old);
        assert_eq!(
            a.release_lock("/lock"),
            Err(CoordError::NotLockOwner("/lock".to_string()))
        );
        a.acquire_lock("/lock", TIMEOUT).expect("lock again");
    }
}
