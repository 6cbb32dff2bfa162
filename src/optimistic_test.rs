use super::*;
use crate::error::ErrorKind;
use crate::object::ObjectKind;

fn confirmed(store: &mut ObjectStore, version: i64) -> CanvasObject {
    let mut obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 0.0, 0.0, None);
    obj.version = version;
    store.upsert(obj.clone());
    obj
}

fn server(obj: &CanvasObject, version: i64) -> CanvasObject {
    let mut out = obj.clone();
    out.version = version;
    out
}

fn move_to(id: Uuid, x: f64) -> LocalChange {
    LocalChange::Update { id, patch: ObjectPatch::position(x, x) }
}

fn manager() -> OptimisticManager {
    OptimisticManager::new(8, Duration::from_secs(60))
}

// =============================================================================
// LOCAL APPLY
// =============================================================================

#[test]
fn create_is_visible_immediately_and_queued() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 200.0, 200.0, None);
    let handle = mgr.apply_local(&mut store, LocalChange::Create(obj.clone()), Instant::now()).expect("apply");
    assert_eq!(handle.object_id, obj.id);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(200.0));
    assert!(store.confirmed(&obj.id).is_none());
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::Queued));
    assert_eq!(mgr.take_notices(), vec![SyncNotice::Pending { op_id: handle.op_id, object_id: obj.id }]);
}

#[test]
fn rapid_updates_coalesce_into_one_mutation() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let first = mgr.apply_local(&mut store, move_to(obj.id, 1.0), now).expect("apply");
    for x in 2..=10 {
        let h = mgr.apply_local(&mut store, move_to(obj.id, f64::from(x)), now).expect("apply");
        assert_eq!(h.op_id, first.op_id);
    }
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(10.0));
    let sent = mgr.take_for_dispatch(obj.id).expect("dispatch");
    assert_eq!(sent.op, MutationOp::Update(ObjectPatch::position(10.0, 10.0)));
    assert_eq!(sent.base_version, 1);
}

#[test]
fn create_then_delete_vanishes_without_submission() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Circle, 0.0, 0.0, None);
    let now = Instant::now();
    let created = mgr.apply_local(&mut store, LocalChange::Create(obj.clone()), now).expect("create");
    mgr.apply_local(&mut store, LocalChange::Delete { id: obj.id }, now).expect("delete");
    assert!(store.get(&obj.id).is_none());
    assert!(mgr.dispatchable().is_empty());
    assert_eq!(mgr.status(&created.op_id), Some(MutationStatus::RolledBack));
}

#[test]
fn edit_of_locally_deleted_object_is_rejected() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    mgr.apply_local(&mut store, LocalChange::Delete { id: obj.id }, Instant::now()).expect("delete");
    let err = mgr.apply_local(&mut store, move_to(obj.id, 1.0), Instant::now()).expect_err("deleted");
    assert!(matches!(err, SyncError::ValidationFailure(_)));
}

#[test]
fn unknown_and_duplicate_objects_are_rejected() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let missing = Uuid::new_v4();
    assert!(matches!(
        mgr.apply_local(&mut store, move_to(missing, 1.0), Instant::now()),
        Err(SyncError::UnknownObject(id)) if id == missing
    ));
    let obj = confirmed(&mut store, 1);
    assert!(matches!(
        mgr.apply_local(&mut store, LocalChange::Create(obj), Instant::now()),
        Err(SyncError::ValidationFailure(_))
    ));
}

#[test]
fn invalid_patch_leaves_store_untouched() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let patch = ObjectPatch { width: Some(-5.0), ..ObjectPatch::default() };
    assert!(mgr.apply_local(&mut store, LocalChange::Update { id: obj.id, patch }, Instant::now()).is_err());
    assert!(!store.has_overlay(&obj.id));
    assert_eq!(mgr.pending_objects(), 0);
}

#[test]
fn queue_full_rejects_new_objects_only() {
    let mut store = ObjectStore::new();
    let mut mgr = OptimisticManager::new(2, Duration::from_secs(60));
    let a = confirmed(&mut store, 1);
    let b = confirmed(&mut store, 1);
    let c = confirmed(&mut store, 1);
    let now = Instant::now();
    mgr.apply_local(&mut store, move_to(a.id, 1.0), now).expect("a");
    mgr.apply_local(&mut store, move_to(b.id, 1.0), now).expect("b");
    assert!(matches!(
        mgr.apply_local(&mut store, move_to(c.id, 1.0), now),
        Err(SyncError::QueueFull { capacity: 2 })
    ));
    mgr.apply_local(&mut store, move_to(a.id, 2.0), now).expect("existing object still editable");
}

// =============================================================================
// DISPATCH
// =============================================================================

#[test]
fn at_most_one_in_flight_per_object() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    mgr.apply_local(&mut store, move_to(obj.id, 1.0), now).expect("apply");
    assert!(mgr.take_for_dispatch(obj.id).is_some());
    mgr.apply_local(&mut store, move_to(obj.id, 2.0), now).expect("apply");
    mgr.apply_local(&mut store, move_to(obj.id, 3.0), now).expect("apply");
    assert!(mgr.take_for_dispatch(obj.id).is_none());
    assert!(mgr.dispatchable().is_empty());
    assert_eq!(mgr.in_flight_count(), 1);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(3.0));
}

#[test]
fn dispatchable_follows_submission_order() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let now = Instant::now();
    let objs: Vec<CanvasObject> = (0..4).map(|_| confirmed(&mut store, 1)).collect();
    for obj in objs.iter().rev() {
        mgr.apply_local(&mut store, move_to(obj.id, 1.0), now).expect("apply");
    }
    let expected: Vec<Uuid> = objs.iter().rev().map(|o| o.id).collect();
    assert_eq!(mgr.dispatchable(), expected);
}

// =============================================================================
// CONFIRMATION
// =============================================================================

#[test]
fn confirm_round_trip_matches_server_object() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 200.0, 200.0, None);
    let handle = mgr.apply_local(&mut store, LocalChange::Create(obj.clone()), Instant::now()).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    let outcome = mgr.confirm(&mut store, handle.op_id, ServerAck::object(server(&obj, 1))).expect("confirm");
    assert!(!outcome.stale);
    assert!(matches!(outcome.broadcast, Some(RemoteEvent::ObjectCreated { .. })));
    assert_eq!(store.get(&obj.id), Some(&server(&obj, 1)));
    assert!(!store.has_overlay(&obj.id));
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::Confirmed));
    assert_eq!(mgr.pending_objects(), 0);
}

#[test]
fn duplicate_confirm_is_unknown_and_harmless() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 5.0), Instant::now()).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    let mut acked = server(&obj, 2);
    acked.x = 5.0;
    mgr.confirm(&mut store, handle.op_id, ServerAck::object(acked.clone())).expect("confirm");
    let again = mgr.confirm(&mut store, handle.op_id, ServerAck::object(acked.clone()));
    assert!(matches!(again, Err(SyncError::UnknownOperation(_))));
    assert_eq!(store.get(&obj.id), Some(&acked));
}

#[test]
fn confirm_rebases_queued_successor() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let first = mgr.apply_local(&mut store, move_to(obj.id, 5.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.apply_local(&mut store, LocalChange::Update { id: obj.id, patch: ObjectPatch::size(40.0, 40.0) }, now)
        .expect("apply");
    let mut acked = server(&obj, 2);
    acked.x = 5.0;
    acked.y = 5.0;
    mgr.confirm(&mut store, first.op_id, ServerAck::object(acked)).expect("confirm");
    let view = store.get(&obj.id).expect("visible");
    assert_eq!((view.x, view.width), (5.0, Some(40.0)));
    let next = mgr.take_for_dispatch(obj.id).expect("successor");
    assert_eq!(next.base_version, 2);
}

#[test]
fn stale_confirm_keeps_newer_version_and_reports_conflict() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 5.0), Instant::now()).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    let mut remote = server(&obj, 6);
    remote.x = 60.0;
    store.upsert(remote);
    mgr.take_notices();
    let outcome = mgr.confirm(&mut store, handle.op_id, ServerAck::object(server(&obj, 5))).expect("confirm");
    assert!(outcome.stale);
    assert!(outcome.broadcast.is_none());
    assert_eq!(store.get(&obj.id).map(|o| (o.version, o.x)), Some((6, 60.0)));
    assert!(mgr.take_notices().contains(&SyncNotice::Conflict { object_id: obj.id, winning_version: 6 }));
}

#[test]
fn server_assigned_id_rekeys_object_and_queue() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 0.0, 0.0, None);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, LocalChange::Create(obj.clone()), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.apply_local(&mut store, move_to(obj.id, 9.0), now).expect("apply");
    let mut acked = server(&obj, 1);
    acked.id = Uuid::new_v4();
    let outcome = mgr.confirm(&mut store, handle.op_id, ServerAck::object(acked.clone())).expect("confirm");
    assert_eq!(outcome.rekeyed_from, Some(obj.id));
    assert_eq!(outcome.object_id, acked.id);
    assert!(store.get(&obj.id).is_none());
    assert_eq!(store.get(&acked.id).map(|o| o.x), Some(9.0));
    assert_eq!(mgr.take_for_dispatch(acked.id).map(|m| m.object_id), Some(acked.id));
}

#[test]
fn confirmed_delete_tombstones_object() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 3);
    let handle = mgr.apply_local(&mut store, LocalChange::Delete { id: obj.id }, Instant::now()).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.confirm(&mut store, handle.op_id, ServerAck::deleted(4)).expect("confirm");
    assert!(store.get(&obj.id).is_none());
    assert!(!store.upsert(server(&obj, 4)).applied());
}

// =============================================================================
// REJECTION
// =============================================================================

#[test]
fn network_failure_rolls_back_and_can_be_retried_with_same_id() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.take_notices();
    mgr.reject(&mut store, handle.op_id, &SyncError::NetworkFailure("down".into()), now).expect("reject");
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(0.0));
    assert_eq!(
        mgr.take_notices(),
        vec![
            SyncNotice::Failed { op_id: handle.op_id, object_id: obj.id, kind: ErrorKind::NetworkFailure, retryable: true },
            SyncNotice::RolledBack { op_id: handle.op_id, object_id: obj.id },
        ]
    );
    let again = mgr.retry_failed(&mut store, handle.op_id, now).expect("retry");
    assert_eq!(again.op_id, handle.op_id);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(7.0));
    assert!(matches!(mgr.retry_failed(&mut store, handle.op_id, now), Err(SyncError::UnknownOperation(_))));
}

#[test]
fn retry_is_refused_while_a_newer_edit_is_queued() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let older = mgr.apply_local(&mut store, move_to(obj.id, 5.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    let newer = mgr.apply_local(&mut store, move_to(obj.id, 10.0), now).expect("apply");
    mgr.reject(&mut store, older.op_id, &SyncError::NetworkFailure("down".into()), now).expect("reject");
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(10.0));

    let err = mgr.retry_failed(&mut store, older.op_id, now).expect_err("superseded");
    assert!(matches!(err, SyncError::ValidationFailure(_)));
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(10.0));
    let queued = mgr.take_for_dispatch(obj.id).expect("newer edit still queued");
    assert_eq!(queued.op_id, newer.op_id);
    assert_eq!(queued.op, MutationOp::Update(ObjectPatch::position(10.0, 10.0)));

    // Still retryable once the newer edit settles.
    let ack = ServerAck::object(server(&store.get(&obj.id).cloned().expect("obj"), 2));
    mgr.confirm(&mut store, newer.op_id, ack).expect("confirm");
    let again = mgr.retry_failed(&mut store, older.op_id, now).expect("retry");
    assert_eq!(again.op_id, older.op_id);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(5.0));
}

#[test]
fn validation_failure_is_not_offered_for_retry() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.reject(&mut store, handle.op_id, &SyncError::validation("no"), now).expect("reject");
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::RolledBack));
    assert!(mgr.retry_failed(&mut store, handle.op_id, now).is_err());
}

#[test]
fn unauthorized_holds_edit_until_refresh() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.reject(&mut store, handle.op_id, &SyncError::AuthenticationRequired, now).expect("reject");
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::Failed(ErrorKind::AuthenticationRequired)));
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(7.0));
    assert!(mgr.dispatchable().is_empty());
    assert_eq!(mgr.expire_held(&mut store, now + Duration::from_secs(59)), 0);
    assert_eq!(mgr.release_held(), 1);
    assert_eq!(mgr.dispatchable(), vec![obj.id]);
    let resent = mgr.take_for_dispatch(obj.id).expect("dispatch");
    assert_eq!(resent.op_id, handle.op_id);
}

#[test]
fn auth_hold_expiry_rolls_back() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.reject(&mut store, handle.op_id, &SyncError::AuthenticationRequired, now).expect("reject");
    assert_eq!(mgr.expire_held(&mut store, now + Duration::from_secs(60)), 1);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(0.0));
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::RolledBack));
}

#[test]
fn conflict_adopts_server_object_and_drops_queue() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    let queued = mgr.apply_local(&mut store, move_to(obj.id, 8.0), now).expect("apply");
    let mut current = server(&obj, 4);
    current.x = 40.0;
    let err = SyncError::VersionConflict { current: Some(Box::new(current)) };
    mgr.take_notices();
    mgr.reject(&mut store, handle.op_id, &err, now).expect("reject");
    assert_eq!(store.get(&obj.id).map(|o| (o.version, o.x)), Some((4, 40.0)));
    assert_eq!(mgr.status(&queued.op_id), Some(MutationStatus::RolledBack));
    assert!(mgr.take_notices().contains(&SyncNotice::Conflict { object_id: obj.id, winning_version: 4 }));
}

#[test]
fn cosmetic_conflict_is_silent() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let patch = ObjectPatch { fill: Some("#123456".into()), ..ObjectPatch::default() };
    let handle = mgr.apply_local(&mut store, LocalChange::Update { id: obj.id, patch }, now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.reject(&mut store, handle.op_id, &SyncError::VersionConflict { current: None }, now).expect("reject");
    assert!(!mgr.take_notices().iter().any(|n| matches!(n, SyncNotice::Conflict { .. })));
}

#[test]
fn forbidden_halts_object_until_refresh() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.reject(&mut store, handle.op_id, &SyncError::AuthorizationDenied, now).expect("reject");
    assert!(mgr.is_halted(&obj.id));
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(0.0));
    assert!(matches!(mgr.apply_local(&mut store, move_to(obj.id, 1.0), now), Err(SyncError::AuthorizationDenied)));
    mgr.release_held();
    assert!(mgr.apply_local(&mut store, move_to(obj.id, 1.0), now).is_ok());
}

#[test]
fn failed_create_drops_dependent_updates() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 0.0, 0.0, None);
    let now = Instant::now();
    let handle = mgr.apply_local(&mut store, LocalChange::Create(obj.clone()), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.apply_local(&mut store, move_to(obj.id, 3.0), now).expect("apply");
    mgr.reject(&mut store, handle.op_id, &SyncError::NetworkFailure("down".into()), now).expect("reject");
    assert!(store.get(&obj.id).is_none());
    assert_eq!(mgr.pending_objects(), 0);
}

// =============================================================================
// CANCEL
// =============================================================================

#[test]
fn cancel_restores_confirmed_state() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let handle = mgr.apply_local(&mut store, move_to(obj.id, 7.0), Instant::now()).expect("apply");
    assert!(mgr.cancel(&mut store, obj.id));
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(0.0));
    assert_eq!(mgr.status(&handle.op_id), Some(MutationStatus::RolledBack));
    assert!(!mgr.cancel(&mut store, obj.id));
}

#[test]
fn cancel_leaves_in_flight_alone() {
    let mut store = ObjectStore::new();
    let mut mgr = manager();
    let obj = confirmed(&mut store, 1);
    let now = Instant::now();
    mgr.apply_local(&mut store, move_to(obj.id, 7.0), now).expect("apply");
    mgr.take_for_dispatch(obj.id).expect("dispatch");
    mgr.apply_local(&mut store, move_to(obj.id, 8.0), now).expect("apply");
    assert!(mgr.cancel(&mut store, obj.id));
    assert_eq!(mgr.in_flight_count(), 1);
    assert_eq!(store.get(&obj.id).map(|o| o.x), Some(7.0));
}
