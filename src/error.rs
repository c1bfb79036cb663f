//! Error taxonomy for chat sessions.
//!
//! DESIGN
//! ======
//! Store-layer failures (`StoreError`) never leave the session raw. They are
//! translated into `ChatError` at the boundary, carrying the user-facing
//! reason that the error banner shows. Every error exposes a grepable code
//! and a retryable flag.

use crate::store::StoreError;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for surfaced errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CHAT ERROR
// =============================================================================

/// Errors returned by [`crate::session::ChatSession`] operations or surfaced
/// through its `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The trimmed message body was empty. Never reaches the store.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// The store rejected an append.
    #[error("{0}")]
    SendFailed(String),

    /// Fetching an older page failed.
    #[error("{0}")]
    FetchOlderFailed(String),

    /// The session was closed.
    #[error("chat session is closed")]
    SessionClosed,

    /// The live subscription itself failed.
    #[error("{0}")]
    SubscriptionError(String),

    /// No local message with this id is held by the session.
    #[error("unknown local message: {0}")]
    UnknownMessage(String),

    /// The local message exists but is not in the failed state.
    #[error("message {0} has not failed")]
    NotFailed(String),
}

impl ChatError {
    pub(crate) fn send_failed(err: &StoreError) -> Self {
        Self::SendFailed(err.user_message())
    }

    pub(crate) fn fetch_older_failed(err: &StoreError) -> Self {
        Self::FetchOlderFailed(err.user_message())
    }

    pub(crate) fn subscription(err: &StoreError) -> Self {
        Self::SubscriptionError(err.user_message())
    }
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::SendFailed(_) => "E_SEND_FAILED",
            Self::FetchOlderFailed(_) => "E_FETCH_OLDER_FAILED",
            Self::SessionClosed => "E_SESSION_CLOSED",
            Self::SubscriptionError(_) => "E_SUBSCRIPTION",
            Self::UnknownMessage(_) => "E_UNKNOWN_MESSAGE",
            Self::NotFailed(_) => "E_NOT_FAILED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::SendFailed(_) | Self::FetchOlderFailed(_))
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
