//! Chat message model shared by the session and the store.
//!
//! DESIGN
//! ======
//! One type covers confirmed and local messages. Local messages carry a
//! generated id ending in [`LOCAL_ID_SUFFIX`] so they can be told apart and
//! purged once the store confirms them. Timestamps are milliseconds since
//! the Unix epoch: client clock for local messages, server clock for
//! confirmed ones.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved suffix marking locally-originated, unconfirmed message ids.
pub const LOCAL_ID_SUFFIX: &str = "_local";

// =============================================================================
// TYPES
// =============================================================================

/// Delivery state of a message as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
}

/// A chat message in a room, either confirmed by the store or local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    pub status: MessageStatus,
    /// Idempotency token attached at send time and echoed back by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl ChatMessage {
    /// Whether this message was generated locally and not yet confirmed.
    #[must_use]
    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }

    /// Derived per render; never stored.
    #[must_use]
    pub fn is_own_message(&self, current_user_id: &str) -> bool {
        self.sender_id == current_user_id
    }
}

/// Everything the store needs to append a message. The store assigns the
/// id and the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Trim surrounding whitespace. Returns `None` when nothing is left.
#[must_use]
pub fn normalize_body(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) }
}

#[must_use]
pub fn is_local_id(id: &str) -> bool {
    id.ends_with(LOCAL_ID_SUFFIX)
}

/// Generate a fresh local message id.
#[must_use]
pub fn new_local_id() -> String {
    format!("{}{LOCAL_ID_SUFFIX}", Uuid::new_v4())
}

/// Generate a random 16-byte hex idempotency token.
#[must_use]
pub fn new_client_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Stable ascending sort by creation time. Ties keep their relative order.
pub fn sort_ascending(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| m.created_at);
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
