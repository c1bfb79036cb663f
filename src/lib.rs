//! Signacer chat sync core.
//!
//! A [`ChatSession`] shows one room to one user: the newest page from a
//! live [`MessageStore`] subscription, older pages loaded on demand, and
//! the user's own messages shown optimistically until the store confirms
//! them. Sends that fail stay visible as failed and can be retried or
//! discarded.

pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod store;

pub use config::{ChatConfig, ReconcileMode};
pub use error::{ChatError, ErrorCode};
pub use message::{ChatMessage, MessageDraft, MessageStatus};
pub use session::{ChatSession, ChatView};
pub use store::{InMemoryStore, MessageStore, StoreError};
