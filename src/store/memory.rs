//! In-memory message store backed by JSON documents.
//!
//! DESIGN
//! ======
//! Each room is a collection of schemaless documents, the shape a document
//! database hands back: `{id, userId, username, message, timestamp,
//! clientToken}`. Reads parse documents into `ChatMessage`, skipping any
//! that are malformed. The store owns the clock: timestamps are strictly
//! increasing per store so ordering never depends on the caller.
//!
//! Timestamps can be deferred to mimic a pending server write: the document
//! is visible immediately with a null timestamp, readers substitute their
//! receive time, and [`InMemoryStore::resolve_pending_timestamps`] fills in
//! the real value later.
//!
//! Faults can be queued per operation, or drawn at random for appends, so
//! sessions can be exercised against an unreliable backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MessageStore, SnapshotResult, StoreError, Subscription, SubscriptionId};
use crate::config::DEFAULT_UPDATE_CAPACITY;
use crate::message::{ChatMessage, MessageDraft, MessageStatus, now_ms};

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDocument {
    id: String,
    user_id: String,
    username: String,
    message: String,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    client_token: Option<String>,
}

fn parse_document(room_id: &str, doc: &Value, received_at: i64) -> Option<ChatMessage> {
    let parsed = match MessageDocument::deserialize(doc) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(room_id, error = %e, "skipping malformed message document");
            return None;
        }
    };
    Some(ChatMessage {
        id: parsed.id,
        room_id: room_id.to_owned(),
        sender_id: parsed.user_id,
        sender_name: parsed.username,
        body: parsed.message,
        created_at: parsed.timestamp.unwrap_or(received_at),
        status: MessageStatus::Sent,
        client_token: parsed.client_token,
    })
}

// =============================================================================
// STATE
// =============================================================================

struct Subscriber {
    room_id: String,
    page_size: usize,
    tx: mpsc::Sender<SnapshotResult>,
}

#[derive(Default)]
struct Faults {
    append: VecDeque<StoreError>,
    fetch: VecDeque<StoreError>,
    subscribe: VecDeque<StoreError>,
}

#[derive(Default)]
struct StoreInner {
    rooms: HashMap<String, Vec<Value>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    last_ts: i64,
    faults: Faults,
    append_failure_rate: f64,
    defer_timestamps: bool,
    append_calls: usize,
    fetch_calls: usize,
}

impl StoreInner {
    fn next_timestamp(&mut self) -> i64 {
        self.last_ts = now_ms().max(self.last_ts + 1);
        self.last_ts
    }

    /// All parseable messages in a room, oldest first.
    fn ascending(&self, room_id: &str) -> Vec<ChatMessage> {
        let received_at = now_ms();
        let mut list: Vec<ChatMessage> = self
            .rooms
            .get(room_id)
            .map(|docs| docs.iter().filter_map(|d| parse_document(room_id, d, received_at)).collect())
            .unwrap_or_default();
        list.sort_by_key(|m| m.created_at);
        list
    }

    fn latest(&self, room_id: &str, page_size: usize) -> Vec<ChatMessage> {
        self.ascending(room_id).into_iter().rev().take(page_size).collect()
    }

    fn notify_room(&mut self, room_id: &str) {
        let mut closed = Vec::new();
        for (id, sub) in &self.subscribers {
            if sub.room_id != room_id {
                continue;
            }
            let snapshot = self.latest(room_id, sub.page_size);
            match sub.tx.try_send(Ok(snapshot)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(room_id, subscription = %id.0, "subscriber queue full; dropping snapshot");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Message store kept entirely in process memory.
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
    update_capacity: usize,
    latency: Duration,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_update_capacity(DEFAULT_UPDATE_CAPACITY)
    }

    /// Create a store whose subscription channels hold `capacity` pending
    /// snapshots.
    #[must_use]
    pub fn with_update_capacity(capacity: usize) -> Self {
        Self { inner: Mutex::new(StoreInner::default()), update_capacity: capacity.max(1), latency: Duration::ZERO }
    }

    /// Delay every append and fetch by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Insert a confirmed message with an explicit timestamp, bypassing
    /// validation. Returns the assigned id.
    pub fn seed(&self, room_id: &str, sender_id: &str, sender_name: &str, body: &str, created_at: i64) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let doc = json!({
            "id": id,
            "userId": sender_id,
            "username": sender_name,
            "message": body,
            "timestamp": created_at,
        });
        let mut inner = self.lock();
        inner.last_ts = inner.last_ts.max(created_at);
        inner.rooms.entry(room_id.to_owned()).or_default().push(doc);
        inner.notify_room(room_id);
        id
    }

    /// Insert a raw document as-is. Malformed documents are kept but never
    /// surface through reads.
    pub fn insert_raw(&self, room_id: &str, doc: Value) {
        let mut inner = self.lock();
        inner.rooms.entry(room_id.to_owned()).or_default().push(doc);
        inner.notify_room(room_id);
    }

    /// Remove a message document by id. Returns whether one was removed.
    pub fn delete(&self, room_id: &str, message_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(docs) = inner.rooms.get_mut(room_id) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|d| d.get("id").and_then(Value::as_str) != Some(message_id));
        let removed = docs.len() != before;
        if removed {
            inner.notify_room(room_id);
        }
        removed
    }

    /// All readable messages in a room, oldest first.
    #[must_use]
    pub fn messages(&self, room_id: &str) -> Vec<ChatMessage> {
        self.lock().ascending(room_id)
    }

    /// Fail the next append with `err`. Queued faults are consumed in order.
    pub fn fail_next_append(&self, err: StoreError) {
        self.lock().faults.append.push_back(err);
    }

    /// Fail the next older-page fetch with `err`.
    pub fn fail_next_fetch(&self, err: StoreError) {
        self.lock().faults.fetch.push_back(err);
    }

    /// Fail the next subscription with `err` instead of an initial snapshot.
    pub fn fail_next_subscribe(&self, err: StoreError) {
        self.lock().faults.subscribe.push_back(err);
    }

    /// Push `err` to every live subscriber of `room_id` and drop them.
    pub fn break_subscriptions(&self, room_id: &str, err: StoreError) {
        let mut inner = self.lock();
        let ids: Vec<SubscriptionId> = inner
            .subscribers
            .iter()
            .filter(|(_, s)| s.room_id == room_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(sub) = inner.subscribers.remove(&id) {
                let _ = sub.tx.try_send(Err(err.clone()));
            }
        }
    }

    /// Fail each append with probability `rate` (clamped to `0.0..=1.0`).
    pub fn set_append_failure_rate(&self, rate: f64) {
        self.lock().append_failure_rate = rate.clamp(0.0, 1.0);
    }

    /// While enabled, appended documents carry a null timestamp until
    /// [`Self::resolve_pending_timestamps`] runs.
    pub fn set_defer_timestamps(&self, defer: bool) {
        self.lock().defer_timestamps = defer;
    }

    /// Assign server timestamps to every document still pending one.
    pub fn resolve_pending_timestamps(&self) {
        let mut inner = self.lock();
        let mut touched = Vec::new();
        let room_ids: Vec<String> = inner.rooms.keys().cloned().collect();
        for room_id in room_ids {
            let pending = inner
                .rooms
                .get(&room_id)
                .map(|docs| docs.iter().filter(|d| d.get("timestamp").is_some_and(Value::is_null)).count())
                .unwrap_or(0);
            if pending == 0 {
                continue;
            }
            let stamps: Vec<i64> = (0..pending).map(|_| inner.next_timestamp()).collect();
            if let Some(docs) = inner.rooms.get_mut(&room_id) {
                let pending_docs = docs.iter_mut().filter(|d| d.get("timestamp").is_some_and(Value::is_null));
                for (doc, ts) in pending_docs.zip(stamps) {
                    doc["timestamp"] = json!(ts);
                }
            }
            touched.push(room_id);
        }
        for room_id in touched {
            inner.notify_room(&room_id);
        }
    }

    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.lock().append_calls
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(draft: &MessageDraft) -> Result<(), StoreError> {
    if draft.body.trim().is_empty() {
        return Err(StoreError::InvalidInput("Message cannot be empty".into()));
    }
    if draft.room_id.is_empty() || draft.sender_id.is_empty() || draft.sender_name.is_empty() {
        return Err(StoreError::InvalidInput("Missing required information".into()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl MessageStore for InMemoryStore {
    fn subscribe_latest(&self, room_id: &str, page_size: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(self.update_capacity);
        let id = SubscriptionId::new();
        let mut inner = self.lock();

        if let Some(err) = inner.faults.subscribe.pop_front() {
            let _ = tx.try_send(Err(err));
            return Subscription { id, updates: rx };
        }

        let _ = tx.try_send(Ok(inner.latest(room_id, page_size)));
        inner.subscribers.insert(id, Subscriber { room_id: room_id.to_owned(), page_size, tx });
        debug!(room_id, subscription = %id.0, page_size, "subscribed");
        Subscription { id, updates: rx }
    }

    async fn fetch_older_than(
        &self,
        room_id: &str,
        before_message_id: &str,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.fetch_calls += 1;
        if let Some(err) = inner.faults.fetch.pop_front() {
            return Err(err);
        }

        let ascending = inner.ascending(room_id);
        let anchor = ascending
            .iter()
            .position(|m| m.id == before_message_id)
            .ok_or_else(|| StoreError::NotFound(before_message_id.to_owned()))?;

        Ok(ascending[..anchor].iter().rev().take(page_size).cloned().collect())
    }

    async fn append(&self, draft: MessageDraft) -> Result<String, StoreError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.append_calls += 1;
        validate(&draft)?;

        if let Some(err) = inner.faults.append.pop_front() {
            return Err(err);
        }
        let rate = inner.append_failure_rate;
        if rate > 0.0 && rand::rng().random_bool(rate) {
            return Err(StoreError::Unavailable);
        }

        let id = Uuid::new_v4().simple().to_string();
        let timestamp = if inner.defer_timestamps { Value::Null } else { json!(inner.next_timestamp()) };
        let mut doc = json!({
            "id": id,
            "userId": draft.sender_id,
            "username": draft.sender_name,
            "message": draft.body.trim(),
            "timestamp": timestamp,
        });
        if let Some(token) = &draft.client_token {
            doc["clientToken"] = json!(token);
        }

        inner.rooms.entry(draft.room_id.clone()).or_default().push(doc);
        inner.notify_room(&draft.room_id);
        info!(room_id = %draft.room_id, message_id = %id, "message appended");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!(subscription = %id.0, "unsubscribed");
        }
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
