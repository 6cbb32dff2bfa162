use super::*;
use crate::object::ObjectKind;

fn object(version: i64) -> CanvasObject {
    let mut obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 1.0, 2.0, None);
    obj.version = version;
    obj
}

// =============================================================================
// STATUS CLASSIFICATION
// =============================================================================

#[test]
fn auth_statuses_map_to_auth_errors() {
    let id = Uuid::new_v4();
    assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, None, "", id), SyncError::AuthenticationRequired));
    assert!(matches!(classify_status(StatusCode::FORBIDDEN, None, "", id), SyncError::AuthorizationDenied));
}

#[test]
fn conflict_reads_current_object() {
    let current = object(6);
    let body = serde_json::json!({ "current": current }).to_string();
    let SyncError::VersionConflict { current: Some(parsed) } =
        classify_status(StatusCode::CONFLICT, None, &body, current.id)
    else {
        panic!("expected conflict with object");
    };
    assert_eq!(parsed.version, 6);
}

#[test]
fn conflict_accepts_bare_object_or_nothing() {
    let current = object(2);
    let bare = serde_json::to_string(&current).expect("serialize");
    assert!(matches!(
        classify_status(StatusCode::CONFLICT, None, &bare, current.id),
        SyncError::VersionConflict { current: Some(_) }
    ));
    assert!(matches!(
        classify_status(StatusCode::CONFLICT, None, "stale", current.id),
        SyncError::VersionConflict { current: None }
    ));
}

#[test]
fn rate_limit_carries_retry_after() {
    let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2)), "", Uuid::nil());
    assert!(matches!(err, SyncError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(2)));
}

#[test]
fn server_errors_are_network_failures() {
    for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::REQUEST_TIMEOUT] {
        assert!(matches!(classify_status(status, None, "", Uuid::nil()), SyncError::NetworkFailure(_)));
    }
}

#[test]
fn validation_uses_body_message() {
    let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, r#"{"message":"bad width"}"#, Uuid::nil());
    assert!(matches!(err, SyncError::ValidationFailure(ref m) if m == "bad width"));
    let err = classify_status(StatusCode::BAD_REQUEST, None, r#"{"error":"nope"}"#, Uuid::nil());
    assert!(matches!(err, SyncError::ValidationFailure(ref m) if m == "nope"));
}

#[test]
fn not_found_is_unknown_object() {
    let id = Uuid::new_v4();
    assert!(matches!(classify_status(StatusCode::NOT_FOUND, None, "", id), SyncError::UnknownObject(x) if x == id));
}

// =============================================================================
// BODIES AND HEADERS
// =============================================================================

#[test]
fn retry_after_parses_seconds_only() {
    let header = reqwest::header::HeaderValue::from_static("3");
    assert_eq!(parse_retry_after(Some(&header)), Some(Duration::from_secs(3)));
    let date = reqwest::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
    assert_eq!(parse_retry_after(Some(&date)), None);
    assert_eq!(parse_retry_after(None), None);
}

#[test]
fn delete_ack_falls_back_to_expected_plus_one() {
    assert_eq!(parse_ack(&MutationOp::Delete, 4, "").expect("ack"), ServerAck::deleted(5));
    assert_eq!(parse_ack(&MutationOp::Delete, 4, r#"{"version":9}"#).expect("ack"), ServerAck::deleted(9));
}

#[test]
fn update_ack_requires_object_body() {
    let op = MutationOp::Update(ObjectPatch::position(1.0, 1.0));
    assert!(matches!(parse_ack(&op, 1, "{}"), Err(SyncError::NetworkFailure(_))));
    let obj = object(2);
    let ack = parse_ack(&op, 1, &serde_json::to_string(&obj).expect("serialize")).expect("ack");
    assert_eq!(ack.version, 2);
}
