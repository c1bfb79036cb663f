//! Chat session with optimistic sends reconciled against a live message store.
//!
//! ARCHITECTURE
//! ============
//! One `ChatSession` per (room, viewing user). It subscribes to the store's
//! newest page on open and owns the merged view of the room: confirmed
//! messages from the store plus local messages the user sent that the
//! store has not echoed back yet. Every change is published as a
//! [`ChatView`] on a watch channel for the UI layer.
//!
//! DESIGN
//! ======
//! All state lives in one `SessionState` behind a mutex that is never held
//! across an await. Public operations apply their local change under the
//! lock and publish; the store call runs in the background and re-acquires
//! the lock to apply the outcome. Snapshot processing and send/retry
//! transitions therefore never interleave.
//!
//! Appends (sends and retries) are queued under the same lock and drained
//! by one worker task, so the store receives them in the order the user
//! made them. Older-page fetches run as their own tasks.
//!
//! Closing sets a flag checked by every async continuation before it
//! touches state, aborts the snapshot pump, and unsubscribes. The append
//! worker stops at the next queued message.

mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, ReconcileMode};
use crate::error::ChatError;
use crate::message::{ChatMessage, MessageDraft, new_client_token, normalize_body};
use crate::store::{MessageStore, SnapshotResult, StoreError, SubscriptionId};

pub use state::{ChatView, SessionState};

// =============================================================================
// SESSION
// =============================================================================

struct Inner {
    room_id: String,
    user_id: String,
    user_name: String,
    config: ChatConfig,
    store: Arc<dyn MessageStore>,
    subscription_id: SubscriptionId,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<ChatView>,
    append_tx: mpsc::UnboundedSender<ChatMessage>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Live view of one chat room for one user.
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Open a session and subscribe to the room's newest page. Must be
    /// called from within a tokio runtime.
    pub fn open(
        store: Arc<dyn MessageStore>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        config: ChatConfig,
    ) -> Self {
        let room_id = room_id.into();
        let user_id = user_id.into();
        let subscription = store.subscribe_latest(&room_id, config.page_size);
        let state = SessionState::new(user_id.clone(), config.page_size, config.reconcile);
        let (view_tx, _) = watch::channel(state.view());
        let (append_tx, append_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            room_id,
            user_id,
            user_name: user_name.into(),
            config,
            store,
            subscription_id: subscription.id,
            state: Mutex::new(state),
            view_tx,
            append_tx,
            pump: Mutex::new(None),
        });

        tokio::spawn(run_appends(Arc::downgrade(&inner), Arc::clone(&inner.store), append_rx));
        let handle = tokio::spawn(pump_snapshots(Arc::downgrade(&inner), subscription.updates));
        *lock_pump(&inner.pump) = Some(handle);

        info!(room_id = %inner.room_id, user_id = %inner.user_id, page_size = config.page_size, "chat session opened");
        Self { inner }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    #[must_use]
    pub fn current_user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Whether `message` was sent by the viewing user.
    #[must_use]
    pub fn is_own_message(&self, message: &ChatMessage) -> bool {
        message.is_own_message(&self.inner.user_id)
    }

    /// The most recently published view.
    #[must_use]
    pub fn view(&self) -> ChatView {
        self.inner.view_tx.borrow().clone()
    }

    /// Receive every future publication of the view.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.inner.view_tx.subscribe()
    }

    /// Send a message optimistically. The local copy is visible as soon as
    /// this returns; the append is queued behind earlier sends. Returns the
    /// local id.
    ///
    /// # Errors
    ///
    /// `SessionClosed` after [`Self::close`], `EmptyMessage` if the trimmed
    /// body is empty. Neither changes any state.
    pub fn send(&self, body: &str) -> Result<String, ChatError> {
        let local = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(ChatError::SessionClosed);
            }
            let body = normalize_body(body).ok_or(ChatError::EmptyMessage)?;
            let token = match self.inner.config.reconcile {
                ReconcileMode::Token => Some(new_client_token()),
                ReconcileMode::Text => None,
            };
            state.last_error = None;
            let local = state.insert_local(&self.inner.room_id, &self.inner.user_name, body, token);
            self.inner.enqueue_append(&mut state, local.clone());
            self.inner.publish(&state);
            local
        };

        debug!(room_id = %self.inner.room_id, local_id = %local.id, "optimistic message queued");
        Ok(local.id)
    }

    /// Resend a failed message under the same local id.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `UnknownMessage`, or `NotFailed`.
    pub fn retry(&self, local_id: &str) -> Result<(), ChatError> {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(ChatError::SessionClosed);
            }
            let local = state.begin_retry(local_id)?;
            state.last_error = None;
            self.inner.enqueue_append(&mut state, local);
            self.inner.publish(&state);
        }

        debug!(room_id = %self.inner.room_id, local_id, "retrying failed message");
        Ok(())
    }

    /// Drop a failed message instead of retrying it.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `UnknownMessage`, or `NotFailed`.
    pub fn discard(&self, local_id: &str) -> Result<(), ChatError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(ChatError::SessionClosed);
        }
        state.discard(local_id)?;
        state.last_error = None;
        self.inner.publish(&state);
        Ok(())
    }

    /// Request the page before the oldest held confirmed message. Returns
    /// whether a fetch was started; a no-op while one is in flight, when no
    /// older pages remain, or before any confirmed message is held.
    ///
    /// # Errors
    ///
    /// `SessionClosed` after [`Self::close`].
    pub fn load_older(&self) -> Result<bool, ChatError> {
        let anchor = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(ChatError::SessionClosed);
            }
            let Some(anchor) = state.older_page_anchor() else {
                return Ok(false);
            };
            state.is_loading_older = true;
            state.last_error = None;
            self.inner.publish(&state);
            anchor
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner
                .store
                .fetch_older_than(&inner.room_id, &anchor, inner.config.page_size)
                .await;
            inner.finish_older_page(&anchor, result);
        });
        Ok(true)
    }

    /// Dismiss the current error banner.
    pub fn clear_error(&self) {
        let mut state = self.inner.lock();
        if state.last_error.take().is_some() {
            self.inner.publish(&state);
        }
    }

    /// Release the subscription. In-flight results are discarded. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.publish(&state);
        }
        self.inner.store.unsubscribe(self.inner.subscription_id);
        if let Some(handle) = lock_pump(&self.inner.pump).take() {
            handle.abort();
        }
        info!(room_id = %self.inner.room_id, "chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// ASYNC CONTINUATIONS
// =============================================================================

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.view_tx.send_replace(state.view());
    }

    /// Queue `local` for the append worker. Called under the state lock so
    /// queue order matches the order local entries were created or retried.
    fn enqueue_append(&self, state: &mut SessionState, local: ChatMessage) {
        let local_id = local.id.clone();
        if self.append_tx.send(local).is_err() {
            warn!(room_id = %self.room_id, local_id = %local_id, "append worker gone");
            state.mark_failed(&local_id, ChatError::SessionClosed);
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn apply_snapshot(&self, snapshot: Vec<ChatMessage>) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        let size = snapshot.len();
        let reconciled = state.apply_snapshot(snapshot);
        self.publish(&state);
        debug!(room_id = %self.room_id, size, reconciled, "snapshot applied");
    }

    fn fail_subscription(&self, err: &StoreError) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        warn!(room_id = %self.room_id, error = %err, "chat subscription failed");
        state.fail_subscription(ChatError::subscription(err));
        self.publish(&state);
    }

    fn finish_append(&self, local_id: &str, result: Result<String, StoreError>) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        match result {
            Ok(message_id) => {
                debug!(room_id = %self.room_id, local_id, message_id = %message_id, "append confirmed");
            }
            Err(e) => {
                warn!(room_id = %self.room_id, local_id, error = %e, "append failed");
                state.mark_failed(local_id, ChatError::send_failed(&e));
                self.publish(&state);
            }
        }
    }

    fn finish_older_page(&self, anchor: &str, result: Result<Vec<ChatMessage>, StoreError>) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        match result {
            Ok(page) => {
                let size = page.len();
                if state.apply_older_page(anchor, page) {
                    debug!(room_id = %self.room_id, size, has_more = state.has_more, "older page applied");
                } else {
                    debug!(room_id = %self.room_id, anchor, "dropping stale older page");
                }
            }
            Err(e) => {
                warn!(room_id = %self.room_id, anchor, error = %e, "older page fetch failed");
                state.fail_older_page(ChatError::fetch_older_failed(&e));
            }
        }
        self.publish(&state);
    }
}

fn lock_pump(pump: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    pump.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append queued messages one at a time, in queue order. Exits when the
/// session closes or is dropped.
async fn run_appends(
    inner: Weak<Inner>,
    store: Arc<dyn MessageStore>,
    mut queue: mpsc::UnboundedReceiver<ChatMessage>,
) {
    while let Some(local) = queue.recv().await {
        if inner.upgrade().is_none_or(|session| session.is_closed()) {
            break;
        }
        let draft = MessageDraft {
            room_id: local.room_id,
            sender_id: local.sender_id,
            sender_name: local.sender_name,
            body: local.body,
            client_token: local.client_token,
        };
        let result = store.append(draft).await;
        let Some(session) = inner.upgrade() else {
            break;
        };
        session.finish_append(&local.id, result);
    }
}

/// Feed store snapshots into the session until the subscription ends or
/// the session is dropped.
async fn pump_snapshots(inner: Weak<Inner>, mut updates: mpsc::Receiver<SnapshotResult>) {
    while let Some(update) = updates.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match update {
            Ok(snapshot) => inner.apply_snapshot(snapshot),
            Err(e) => inner.fail_subscription(&e),
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
