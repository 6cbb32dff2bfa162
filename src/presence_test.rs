use super::*;

#[test]
fn cursor_creates_and_updates_in_place() {
    let mut map = PresenceMap::new();
    let user = Uuid::new_v4();
    map.move_cursor(user, Some("ann".into()), 1.0, 2.0, 100);
    map.move_cursor(user, None, 3.0, 4.0, 200);
    let entry = map.get(&user).expect("entry");
    assert_eq!(entry.cursor, Some((3.0, 4.0)));
    assert_eq!(entry.name.as_deref(), Some("ann"));
    assert_eq!(entry.last_heartbeat, 200);
    assert_eq!(map.len(), 1);
}

#[test]
fn leave_removes_entry() {
    let mut map = PresenceMap::new();
    let user = Uuid::new_v4();
    map.join(user, None, 0);
    assert!(map.leave(&user).is_some());
    assert!(map.is_empty());
    assert!(map.leave(&user).is_none());
}

#[test]
fn prune_drops_only_silent_users() {
    let mut map = PresenceMap::new();
    let quiet = Uuid::new_v4();
    let active = Uuid::new_v4();
    map.join(quiet, None, 0);
    map.join(active, None, 20_000);
    assert_eq!(map.prune(30_000, 30_000), vec![quiet]);
    assert!(map.get(&active).is_some());
    assert!(map.prune(49_999, 30_000).is_empty());
}

#[test]
fn out_of_order_event_does_not_rewind_heartbeat() {
    let mut map = PresenceMap::new();
    let user = Uuid::new_v4();
    map.join(user, None, 500);
    map.move_cursor(user, None, 1.0, 1.0, 100);
    assert_eq!(map.get(&user).map(|e| e.last_heartbeat), Some(500));
}
