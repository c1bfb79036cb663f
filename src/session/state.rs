//! Session state: merge, reconcile, and paginate.
//!
//! DESIGN
//! ======
//! Pure data plus transitions, no I/O and no locking. `ChatSession` wraps
//! one `SessionState` in a mutex and applies every transition under it, so
//! each method here runs atomically with respect to the others.
//!
//! The published list is `confirmed ∪ local`, stably sorted by
//! `created_at`. Confirmed messages come from store snapshots (the newest
//! window) and older pages; local messages live in `local` until a
//! confirmed counterpart supersedes them.
//!
//! RECONCILIATION
//! ==============
//! Exact: a confirmed message echoing a local entry's idempotency token
//! removes that entry, whatever its status.
//!
//! Heuristic: a confirmed message from the current user with the same
//! trimmed body removes one `Sending` entry. A confirmed message only
//! qualifies if a snapshot after the first one delivered it after the local
//! entry was created, and each confirmed message absorbs at most one local
//! entry over the whole session. Everything in the first snapshot predates
//! the session and never qualifies.
//! `Failed` entries are never removed by the heuristic.

use std::collections::{HashMap, HashSet};

use crate::config::ReconcileMode;
use crate::error::ChatError;
use crate::message::{ChatMessage, MessageStatus, new_local_id, now_ms, sort_ascending};

// =============================================================================
// VIEW
// =============================================================================

/// Everything a UI needs to render a room, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatView {
    /// Confirmed and local messages, ascending by `created_at`.
    pub messages: Vec<ChatMessage>,
    /// True until the first snapshot (or subscription error) arrives.
    pub is_loading: bool,
    pub has_more: bool,
    pub is_loading_older: bool,
    /// Most recent failure, shown until the next user action.
    pub last_error: Option<ChatError>,
    pub closed: bool,
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone)]
struct LocalEntry {
    message: ChatMessage,
    /// Event sequence at creation; gates heuristic matches.
    created_seq: u64,
}

#[derive(Debug)]
pub struct SessionState {
    current_user_id: String,
    page_size: usize,
    mode: ReconcileMode,

    confirmed: Vec<ChatMessage>,
    local: HashMap<String, LocalEntry>,
    /// Sequence at which a snapshot first delivered each confirmed id.
    /// Messages from the first snapshot or from older pages are recorded
    /// as 0 and never qualify.
    first_seen: HashMap<String, u64>,
    received_snapshot: bool,
    seq: u64,
    last_local_ts: i64,

    pub(crate) has_more: bool,
    pub(crate) is_loading: bool,
    pub(crate) is_loading_older: bool,
    pub(crate) last_error: Option<ChatError>,
    pub(crate) closed: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(current_user_id: impl Into<String>, page_size: usize, mode: ReconcileMode) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            page_size: page_size.max(1),
            mode,
            confirmed: Vec::new(),
            local: HashMap::new(),
            first_seen: HashMap::new(),
            received_snapshot: false,
            seq: 0,
            last_local_ts: 0,
            has_more: true,
            is_loading: true,
            is_loading_older: false,
            last_error: None,
            closed: false,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Merge a store snapshot (newest first) into the confirmed list and
    /// reconcile local entries. Returns how many local entries were removed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatMessage>) -> usize {
        let seq = self.next_seq();
        let stamp = if self.received_snapshot { seq } else { 0 };
        self.received_snapshot = true;
        let snapshot_len = snapshot.len();

        let mut window: Vec<ChatMessage> = snapshot.into_iter().rev().collect();
        sort_ascending(&mut window);
        let mut window_ids: HashSet<String> = HashSet::with_capacity(window.len());
        window.retain(|m| window_ids.insert(m.id.clone()));

        // Keep paged-in history that is older than the live window.
        let retained: Vec<ChatMessage> = match window.first() {
            Some(oldest) => self
                .confirmed
                .iter()
                .filter(|m| m.created_at < oldest.created_at && !window_ids.contains(&m.id))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if retained.is_empty() {
            self.has_more = snapshot_len >= self.page_size;
        }

        self.confirmed = retained;
        self.confirmed.extend(window);

        let held: HashSet<&str> = self.confirmed.iter().map(|m| m.id.as_str()).collect();
        self.first_seen.retain(|id, _| held.contains(id.as_str()));
        for m in &self.confirmed {
            self.first_seen.entry(m.id.clone()).or_insert(stamp);
        }

        self.is_loading = false;
        self.reconcile()
    }

    fn reconcile(&mut self) -> usize {
        let before = self.local.len();

        if self.mode == ReconcileMode::Token {
            let tokens: HashSet<&str> = self.confirmed.iter().filter_map(|m| m.client_token.as_deref()).collect();
            self.local.retain(|_, entry| {
                entry
                    .message
                    .client_token
                    .as_deref()
                    .is_none_or(|token| !tokens.contains(token))
            });
        }

        let mut absorbed = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        for m in &self.confirmed {
            if m.sender_id != self.current_user_id {
                continue;
            }
            if self.mode == ReconcileMode::Token && m.client_token.is_some() {
                continue;
            }
            let first_seen = self.first_seen.get(&m.id).copied().unwrap_or(0);
            let candidate = self
                .local
                .values()
                .filter(|e| {
                    e.message.status == MessageStatus::Sending
                        && e.created_seq < first_seen
                        && e.message.body == m.body.trim()
                        && !claimed.contains(&e.message.id)
                })
                .min_by_key(|e| e.message.created_at);
            if let Some(entry) = candidate {
                claimed.insert(entry.message.id.clone());
                absorbed.push((m.id.clone(), entry.message.id.clone()));
            }
        }
        for (confirmed_id, local_id) in absorbed {
            self.local.remove(&local_id);
            self.first_seen.insert(confirmed_id, 0);
        }

        before - self.local.len()
    }

    // =========================================================================
    // LOCAL MESSAGES
    // =========================================================================

    /// Create a `Sending` local message. Timestamps are strictly increasing
    /// across local messages so send order survives the merge sort.
    pub fn insert_local(
        &mut self,
        room_id: &str,
        sender_name: &str,
        body: String,
        client_token: Option<String>,
    ) -> ChatMessage {
        let created_seq = self.next_seq();
        self.last_local_ts = now_ms().max(self.last_local_ts + 1);
        let message = ChatMessage {
            id: new_local_id(),
            room_id: room_id.to_owned(),
            sender_id: self.current_user_id.clone(),
            sender_name: sender_name.to_owned(),
            body,
            created_at: self.last_local_ts,
            status: MessageStatus::Sending,
            client_token,
        };
        self.local.insert(message.id.clone(), LocalEntry { message: message.clone(), created_seq });
        message
    }

    /// Record a failed append. Returns false if the entry is already gone.
    pub fn mark_failed(&mut self, local_id: &str, err: ChatError) -> bool {
        self.last_error = Some(err);
        match self.local.get_mut(local_id) {
            Some(entry) => {
                entry.message.status = MessageStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Move a failed entry back to `Sending`, keeping its id, body, and token.
    ///
    /// # Errors
    ///
    /// `UnknownMessage` if no such entry exists, `NotFailed` if it is not failed.
    pub fn begin_retry(&mut self, local_id: &str) -> Result<ChatMessage, ChatError> {
        let entry = self
            .local
            .get_mut(local_id)
            .ok_or_else(|| ChatError::UnknownMessage(local_id.to_owned()))?;
        if entry.message.status != MessageStatus::Failed {
            return Err(ChatError::NotFailed(local_id.to_owned()));
        }
        entry.message.status = MessageStatus::Sending;
        Ok(entry.message.clone())
    }

    /// Drop a failed entry the user gave up on.
    ///
    /// # Errors
    ///
    /// `UnknownMessage` if no such entry exists, `NotFailed` if it is not failed.
    pub fn discard(&mut self, local_id: &str) -> Result<ChatMessage, ChatError> {
        match self.local.get(local_id) {
            None => Err(ChatError::UnknownMessage(local_id.to_owned())),
            Some(entry) if entry.message.status != MessageStatus::Failed => {
                Err(ChatError::NotFailed(local_id.to_owned()))
            }
            Some(_) => self
                .local
                .remove(local_id)
                .map(|entry| entry.message)
                .ok_or_else(|| ChatError::UnknownMessage(local_id.to_owned())),
        }
    }

    // =========================================================================
    // PAGINATION
    // =========================================================================

    /// Id of the oldest held confirmed message if an older page may be
    /// requested now.
    #[must_use]
    pub fn older_page_anchor(&self) -> Option<String> {
        if self.is_loading_older || !self.has_more {
            return None;
        }
        self.confirmed.first().map(|m| m.id.clone())
    }

    /// Apply an older page (newest first) fetched before `anchor_id`.
    /// Returns false if the response is stale and was dropped.
    pub fn apply_older_page(&mut self, anchor_id: &str, page: Vec<ChatMessage>) -> bool {
        self.is_loading_older = false;
        if !self.has_more || self.confirmed.first().map(|m| m.id.as_str()) != Some(anchor_id) {
            return false;
        }
        if page.is_empty() {
            self.has_more = false;
            return true;
        }

        let page_len = page.len();
        let held: HashSet<&str> = self.confirmed.iter().map(|m| m.id.as_str()).collect();
        let mut older: Vec<ChatMessage> = page.into_iter().rev().filter(|m| !held.contains(m.id.as_str())).collect();
        sort_ascending(&mut older);
        for m in &older {
            self.first_seen.insert(m.id.clone(), 0);
        }

        older.append(&mut self.confirmed);
        self.confirmed = older;
        self.has_more = page_len >= self.page_size;
        true
    }

    pub fn fail_older_page(&mut self, err: ChatError) {
        self.is_loading_older = false;
        self.last_error = Some(err);
    }

    pub fn fail_subscription(&mut self, err: ChatError) {
        self.is_loading = false;
        self.last_error = Some(err);
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn confirmed(&self) -> &[ChatMessage] {
        &self.confirmed
    }

    #[must_use]
    pub fn local_message(&self, local_id: &str) -> Option<&ChatMessage> {
        self.local.get(local_id).map(|e| &e.message)
    }

    #[must_use]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Confirmed and local messages merged, ascending by `created_at`.
    #[must_use]
    pub fn merged(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.confirmed.len() + self.local.len());
        out.extend(self.confirmed.iter().cloned());
        let mut locals: Vec<&LocalEntry> = self.local.values().collect();
        locals.sort_by_key(|e| e.created_seq);
        out.extend(locals.into_iter().map(|e| e.message.clone()));
        sort_ascending(&mut out);
        out
    }

    #[must_use]
    pub fn view(&self) -> ChatView {
        ChatView {
            messages: self.merged(),
            is_loading: self.is_loading,
            has_more: self.has_more,
            is_loading_older: self.is_loading_older,
            last_error: self.last_error.clone(),
            closed: self.closed,
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
