//! Message store: the real-time persistence seam behind a chat session.
//!
//! ARCHITECTURE
//! ============
//! A store keeps one append-only, time-ordered message log per room and
//! exposes three things to a session: a live subscription to the newest
//! page, a fetch for the page before a given message, and append. The
//! backing protocol (document database listen/query, HTTP, in-memory) is
//! the implementor's business.
//!
//! DESIGN
//! ======
//! Snapshots and pages are delivered newest-first, exactly as a descending
//! query returns them; the session reverses them. Subscriptions are bounded
//! mpsc channels.

pub mod memory;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::message::{ChatMessage, MessageDraft};

pub use memory::InMemoryStore;

// =============================================================================
// ERROR
// =============================================================================

/// Failures reported by a message store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A referenced message or room does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller lacks access to the room.
    #[error("permission denied")]
    PermissionDenied,

    /// The backend is temporarily unreachable.
    #[error("service unavailable")]
    Unavailable,

    /// The backend is throttling the caller.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The request failed store-side validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Message suitable for the chat error banner.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => "Permission denied. Please sign in again.".into(),
            Self::Unavailable => "Service temporarily unavailable. Please try again.".into(),
            Self::ResourceExhausted => "Too many requests. Please wait a moment.".into(),
            Self::NotFound(what) => format!("Message {what} no longer exists."),
            Self::InvalidInput(reason) | Self::Backend(reason) => reason.clone(),
        }
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::PermissionDenied => "E_PERMISSION_DENIED",
            Self::Unavailable => "E_UNAVAILABLE",
            Self::ResourceExhausted => "E_RESOURCE_EXHAUSTED",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Backend(_) => "E_BACKEND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::ResourceExhausted | Self::Backend(_))
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Identifies a live subscription for [`MessageStore::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// One push from a live subscription: the newest page, newest first, or
/// the reason the subscription failed.
pub type SnapshotResult = Result<Vec<ChatMessage>, StoreError>;

/// A live subscription to the newest page of a room.
pub struct Subscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<SnapshotResult>,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Real-time persistence collaborator consumed by a chat session.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Start a live subscription to the newest `page_size` messages. Fires
    /// once on subscribe and again on every mutation of the room.
    fn subscribe_latest(&self, room_id: &str, page_size: usize) -> Subscription;

    /// Fetch up to `page_size` messages strictly older than
    /// `before_message_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the anchor message is gone, or a
    /// backend error.
    async fn fetch_older_than(
        &self,
        room_id: &str,
        before_message_id: &str,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Append a message. The store assigns the id and the timestamp and
    /// returns the id.
    ///
    /// # Errors
    ///
    /// Returns a validation or backend error if the write is rejected.
    async fn append(&self, draft: MessageDraft) -> Result<String, StoreError>;

    /// Release a live subscription. Idempotent.
    fn unsubscribe(&self, id: SubscriptionId);
}
