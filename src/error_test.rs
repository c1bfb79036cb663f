use super::*;

#[test]
fn send_failed_carries_user_facing_reason() {
    let err = ChatError::send_failed(&StoreError::Unavailable);
    assert_eq!(err.to_string(), "Service temporarily unavailable. Please try again.");
    assert_eq!(err.error_code(), "E_SEND_FAILED");
    assert!(err.retryable());
}

#[test]
fn permission_denied_subscription_asks_to_sign_in() {
    let err = ChatError::subscription(&StoreError::PermissionDenied);
    assert_eq!(err.to_string(), "Permission denied. Please sign in again.");
    assert!(!err.retryable());
}

#[test]
fn fetch_older_failed_keeps_backend_detail() {
    let err = ChatError::fetch_older_failed(&StoreError::Backend("disk on fire".into()));
    assert_eq!(err.to_string(), "disk on fire");
    assert_eq!(err.error_code(), "E_FETCH_OLDER_FAILED");
}

#[test]
fn local_validation_errors_are_not_retryable() {
    assert!(!ChatError::EmptyMessage.retryable());
    assert!(!ChatError::SessionClosed.retryable());
    assert_eq!(ChatError::EmptyMessage.to_string(), "Message cannot be empty");
}
