//! Test: two servers sharing one log through the coordination service.
//!
//! Each server has its own session and index mirror; patch bodies live in a
//! shared record store. Appends from either server form one history, and a
//! server whose session expired cannot append until it reconnects.

use std::sync::Arc;
use std::time::Duration;

use super::helpers::{CACHE_SIZE, patch_after, quad};
use crate::coord::{CoordError, CoordinationService, Coordinator, MemCoordinator};
use crate::log::{LogError, PatchLog};
use crate::patch::ChangeItem;
use crate::provider::SharedBodies;
use crate::types::Version;

const LOCK_TIMEOUT: Duration = Duration::from_millis(500);

fn server(coord: &Arc<MemCoordinator>, bodies: &SharedBodies) -> PatchLog {
    let store = bodies.store("ledger").expect("store");
    let coord: Arc<dyn Coordinator> = coord.clone();
    PatchLog::coordinated("ledger", store, coord, LOCK_TIMEOUT, CACHE_SIZE).expect("log")
}

#[test]
fn test_two_servers_one_history() {
    let service = CoordinationService::new();
    let bodies = SharedBodies::in_memory();
    let coord_a = Arc::new(service.connect().expect("connect"));
    let coord_b = Arc::new(service.connect().expect("connect"));
    let a = server(&coord_a, &bodies);
    let b = server(&coord_b, &bodies);

    let first = patch_after(None, vec![ChangeItem::AddQuad(quad("a", "1"))]);
    assert_eq!(a.append(&first).expect("append a"), Version::FIRST);

    // B has not seen the append yet but its lock-holding append syncs first.
    let stale = patch_after(None, vec![ChangeItem::AddQuad(quad("b", "1"))]);
    match b.append(&stale) {
        Err(LogError::Sequence { expected, .. }) => assert_eq!(expected, first.id()),
        other => panic!("expected a sequencing conflict, got {other:?}"),
    }

    let second = patch_after(first.id().as_ref(), vec![ChangeItem::AddQuad(quad("b", "2"))]);
    assert_eq!(b.append(&second).expect("append b"), Version::from_index(2));

    a.sync().expect("sync a");
    assert_eq!(a.current_version().expect("current"), Version::from_index(2));
    assert_eq!(a.current_id().expect("head"), second.id());
    assert_eq!(a.fetch(Version::from_index(2)).expect("fetch"), Some(second));
}

#[test]
fn test_expired_session_cannot_append() {
    let service = CoordinationService::new();
    let bodies = SharedBodies::in_memory();
    let coord_a = Arc::new(service.connect().expect("connect"));
    let coord_b = Arc::new(service.connect().expect("connect"));
    let a = server(&coord_a, &bodies);
    let b = server(&coord_b, &bodies);

    let first = patch_after(None, Vec::new());
    a.append(&first).expect("append a");

    service.expire_session(coord_a.session_id());
    let second = patch_after(first.id().as_ref(), Vec::new());
    assert!(matches!(
        a.append(&second),
        Err(LogError::Coordination(CoordError::SessionExpired(_)))
    ));

    // The other server carries on, and A resumes after reconnecting.
    assert_eq!(b.append(&second).expect("append b"), Version::from_index(2));
    coord_a.reconnect().expect("reconnect");
    let third = patch_after(second.id().as_ref(), Vec::new());
    assert_eq!(a.append(&third).expect("append a"), Version::from_index(3));
    assert_eq!(b.fetch(Version::from_index(3)).expect("fetch"), Some(third));
}
