use super::*;

// =============================================================================
// ERROR CODES
// =============================================================================

#[test]
fn error_codes_are_stable() {
    assert_eq!(SyncError::AuthenticationRequired.error_code(), "E_AUTH_REQUIRED");
    assert_eq!(SyncError::AuthorizationDenied.error_code(), "E_FORBIDDEN");
    assert_eq!(SyncError::VersionConflict { current: None }.error_code(), "E_VERSION_CONFLICT");
    assert_eq!(SyncError::RateLimited { retry_after: None }.error_code(), "E_RATE_LIMITED");
    assert_eq!(SyncError::NetworkFailure("x".into()).error_code(), "E_NETWORK");
    assert_eq!(SyncError::validation("x").error_code(), "E_VALIDATION");
    assert_eq!(SyncError::QueueFull { capacity: 1 }.error_code(), "E_QUEUE_FULL");
    assert_eq!(SyncError::UnknownObject(Uuid::nil()).error_code(), "E_UNKNOWN_OBJECT");
    assert_eq!(SyncError::UnknownOperation(Uuid::nil()).error_code(), "E_UNKNOWN_OPERATION");
}

#[test]
fn retryable_covers_transient_and_auth() {
    assert!(SyncError::RateLimited { retry_after: None }.retryable());
    assert!(SyncError::NetworkFailure("down".into()).retryable());
    assert!(SyncError::AuthenticationRequired.retryable());
    assert!(!SyncError::AuthorizationDenied.retryable());
    assert!(!SyncError::VersionConflict { current: None }.retryable());
    assert!(!SyncError::validation("bad").retryable());
}

// =============================================================================
// KINDS
// =============================================================================

#[test]
fn kind_matches_variant() {
    assert_eq!(SyncError::AuthorizationDenied.kind(), ErrorKind::AuthorizationDenied);
    assert_eq!(
        SyncError::RateLimited { retry_after: Some(Duration::from_secs(1)) }.kind(),
        ErrorKind::RateLimited
    );
    assert_eq!(SyncError::QueueFull { capacity: 3 }.kind(), ErrorKind::QueueFull);
}

#[test]
fn only_rate_limit_and_network_are_transient() {
    assert!(ErrorKind::RateLimited.is_transient());
    assert!(ErrorKind::NetworkFailure.is_transient());
    assert!(!ErrorKind::AuthenticationRequired.is_transient());
    assert!(!ErrorKind::VersionConflict.is_transient());
    assert!(!ErrorKind::ValidationFailure.is_transient());
}

#[test]
fn display_includes_detail() {
    assert_eq!(SyncError::QueueFull { capacity: 4 }.to_string(), "offline queue full (max 4 objects)");
    assert_eq!(SyncError::validation("empty patch").to_string(), "validation failed: empty patch");
}
