use super::*;

const ME: &str = "u-me";
const ROOM: &str = "athlete-1";

fn confirmed(id: &str, sender: &str, body: &str, created_at: i64) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        room_id: ROOM.into(),
        sender_id: sender.into(),
        sender_name: "Someone".into(),
        body: body.into(),
        created_at,
        status: MessageStatus::Sent,
        client_token: None,
    }
}

/// Newest-first snapshot from `(id, created_at)` pairs given oldest first.
fn snapshot(items: &[(&str, i64)]) -> Vec<ChatMessage> {
    items.iter().rev().map(|(id, ts)| confirmed(id, "u-other", id, *ts)).collect()
}

fn state(page_size: usize) -> SessionState {
    SessionState::new(ME, page_size, ReconcileMode::Token)
}

fn ids(list: &[ChatMessage]) -> Vec<&str> {
    list.iter().map(|m| m.id.as_str()).collect()
}

fn assert_ordered(list: &[ChatMessage]) {
    assert!(list.windows(2).all(|w| w[0].created_at <= w[1].created_at), "list must be ascending");
}

// =========================================================================
// snapshots
// =========================================================================

#[test]
fn new_state_is_loading_with_more_pages() {
    let s = state(50);
    let view = s.view();
    assert!(view.is_loading);
    assert!(view.has_more);
    assert!(view.messages.is_empty());
}

#[test]
fn snapshot_is_reversed_to_ascending_and_clears_loading() {
    let mut s = state(50);
    s.apply_snapshot(snapshot(&[("a", 1), ("b", 2), ("c", 3)]));
    assert_eq!(ids(s.confirmed()), ["a", "b", "c"]);
    assert!(!s.is_loading);
    assert!(!s.has_more, "3 < page size");
}

#[test]
fn full_snapshot_means_more_pages() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("a", 1), ("b", 2)]));
    assert!(s.has_more);
}

#[test]
fn snapshot_drops_duplicate_ids() {
    let mut s = state(50);
    let mut snap = snapshot(&[("a", 1), ("b", 2)]);
    snap.push(confirmed("a", "u-other", "a", 1));
    s.apply_snapshot(snap);
    assert_eq!(ids(s.confirmed()), ["a", "b"]);
}

#[test]
fn snapshot_replaces_window_but_keeps_paged_history() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    assert!(s.apply_older_page("c", snapshot(&[("a", 1), ("b", 2)])));
    assert_eq!(ids(s.confirmed()), ["a", "b", "c", "d"]);

    // A new message shifts the live window forward.
    s.apply_snapshot(snapshot(&[("d", 4), ("e", 5)]));
    assert_eq!(ids(s.confirmed()), ["a", "b", "c", "d", "e"]);
    assert!(s.has_more, "pagination still governs has_more");
}

// =========================================================================
// reconciliation
// =========================================================================

#[test]
fn token_match_removes_local_entry() {
    let mut s = state(50);
    s.apply_snapshot(Vec::new());
    let local = s.insert_local(ROOM, "Me", "hi".into(), Some("tok-1".into()));

    let mut echoed = confirmed("m1", ME, "hi", local.created_at + 5);
    echoed.client_token = Some("tok-1".into());
    assert_eq!(s.apply_snapshot(vec![echoed]), 1);

    let view = s.view();
    assert_eq!(ids(&view.messages), ["m1"]);
}

#[test]
fn token_match_removes_even_failed_entry() {
    let mut s = state(50);
    let local = s.insert_local(ROOM, "Me", "hi".into(), Some("tok-1".into()));
    s.mark_failed(&local.id, ChatError::SendFailed("timeout".into()));

    let mut echoed = confirmed("m1", ME, "hi", 10);
    echoed.client_token = Some("tok-1".into());
    s.apply_snapshot(vec![echoed]);
    assert_eq!(s.local_len(), 0);
}

#[test]
fn foreign_token_does_not_fall_back_to_text_match() {
    let mut s = state(50);
    s.apply_snapshot(Vec::new());
    s.insert_local(ROOM, "Me", "hi".into(), Some("tok-1".into()));

    let mut other_device = confirmed("m1", ME, "hi", 10);
    other_device.client_token = Some("tok-other".into());
    s.apply_snapshot(vec![other_device]);
    assert_eq!(s.local_len(), 1);
}

#[test]
fn text_match_requires_own_sender_and_same_body() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    s.apply_snapshot(Vec::new());
    s.insert_local(ROOM, "Me", "hi".into(), None);

    s.apply_snapshot(vec![confirmed("m1", "u-other", "hi", 10)]);
    assert_eq!(s.local_len(), 1, "other sender must not match");

    s.apply_snapshot(vec![confirmed("m2", ME, "hello", 11), confirmed("m1", "u-other", "hi", 10)]);
    assert_eq!(s.local_len(), 1, "different body must not match");

    s.apply_snapshot(vec![
        confirmed("m3", ME, "hi", 12),
        confirmed("m2", ME, "hello", 11),
        confirmed("m1", "u-other", "hi", 10),
    ]);
    assert_eq!(s.local_len(), 0);
}

#[test]
fn text_match_never_removes_failed_entries() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    let local = s.insert_local(ROOM, "Me", "hi".into(), None);
    s.mark_failed(&local.id, ChatError::SendFailed("nope".into()));

    s.apply_snapshot(vec![confirmed("m1", ME, "hi", 10)]);
    let kept = s.local_message(&local.id).expect("failed entry stays visible");
    assert_eq!(kept.status, MessageStatus::Failed);
}

#[test]
fn identical_texts_are_absorbed_one_per_confirmed_message() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    s.apply_snapshot(Vec::new());
    let first = s.insert_local(ROOM, "Me", "gg".into(), None);
    let second = s.insert_local(ROOM, "Me", "gg".into(), None);

    s.apply_snapshot(vec![confirmed("m1", ME, "gg", 10)]);
    assert_eq!(s.local_len(), 1);
    assert!(s.local_message(&first.id).is_none(), "oldest local is absorbed first");
    assert!(s.local_message(&second.id).is_some());

    s.apply_snapshot(vec![confirmed("m1", ME, "gg", 10)]);
    assert_eq!(s.local_len(), 1, "m1 already absorbed a local entry");

    s.apply_snapshot(vec![confirmed("m2", ME, "gg", 11), confirmed("m1", ME, "gg", 10)]);
    assert_eq!(s.local_len(), 0);
}

#[test]
fn confirmed_message_seen_before_send_never_absorbs_it() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    s.apply_snapshot(vec![confirmed("m1", ME, "hi", 10)]);
    s.insert_local(ROOM, "Me", "hi".into(), None);

    s.apply_snapshot(vec![confirmed("m1", ME, "hi", 10)]);
    assert_eq!(s.local_len(), 1, "old identical message is not the echo");
}

#[test]
fn first_snapshot_never_absorbs_sends_made_while_loading() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    let local = s.insert_local(ROOM, "Me", "ok".into(), None);

    s.apply_snapshot(vec![confirmed("old", ME, "ok", 1)]);
    assert!(s.local_message(&local.id).is_some(), "history from before the send is not its echo");
    assert_eq!(s.view().messages.len(), 2);

    s.apply_snapshot(vec![confirmed("m1", ME, "ok", 10), confirmed("old", ME, "ok", 1)]);
    assert_eq!(s.local_len(), 0);
    assert_eq!(ids(&s.view().messages), ["old", "m1"]);
}

#[test]
fn merged_list_has_one_entry_per_logical_message() {
    let mut s = SessionState::new(ME, 50, ReconcileMode::Text);
    s.apply_snapshot(snapshot(&[("a", 1)]));
    s.insert_local(ROOM, "Me", "hi".into(), None);
    assert_eq!(s.view().messages.len(), 2);

    s.apply_snapshot(vec![confirmed("m1", ME, "hi", 5), confirmed("a", "u-other", "a", 1)]);
    let view = s.view();
    assert_eq!(ids(&view.messages), ["a", "m1"]);
    assert_ordered(&view.messages);
}

// =========================================================================
// local lifecycle
// =========================================================================

#[test]
fn local_messages_keep_send_order() {
    let mut s = state(50);
    let a = s.insert_local(ROOM, "Me", "first".into(), None);
    let b = s.insert_local(ROOM, "Me", "second".into(), None);
    assert!(a.created_at < b.created_at);
    assert!(a.is_local());
    assert_eq!(a.status, MessageStatus::Sending);

    let view = s.view();
    assert_eq!(ids(&view.messages), [a.id.as_str(), b.id.as_str()]);
}

#[test]
fn mark_failed_sets_status_and_error() {
    let mut s = state(50);
    let local = s.insert_local(ROOM, "Me", "hi".into(), None);
    assert!(s.mark_failed(&local.id, ChatError::SendFailed("down".into())));
    assert_eq!(s.local_message(&local.id).unwrap().status, MessageStatus::Failed);
    assert_eq!(s.last_error, Some(ChatError::SendFailed("down".into())));

    assert!(!s.mark_failed("missing_local", ChatError::SendFailed("x".into())));
}

#[test]
fn retry_requires_failed_entry_and_keeps_identity() {
    let mut s = state(50);
    let local = s.insert_local(ROOM, "Me", "hi".into(), Some("tok".into()));

    assert_eq!(s.begin_retry(&local.id), Err(ChatError::NotFailed(local.id.clone())));
    assert_eq!(s.begin_retry("nope_local"), Err(ChatError::UnknownMessage("nope_local".into())));

    s.mark_failed(&local.id, ChatError::SendFailed("down".into()));
    let retried = s.begin_retry(&local.id).unwrap();
    assert_eq!(retried.id, local.id);
    assert_eq!(retried.body, "hi");
    assert_eq!(retried.client_token.as_deref(), Some("tok"));
    assert_eq!(retried.status, MessageStatus::Sending);
    assert_eq!(s.view().messages.len(), 1);
}

#[test]
fn discard_only_removes_failed_entries() {
    let mut s = state(50);
    let local = s.insert_local(ROOM, "Me", "hi".into(), None);
    assert_eq!(s.discard(&local.id), Err(ChatError::NotFailed(local.id.clone())));

    s.mark_failed(&local.id, ChatError::SendFailed("down".into()));
    let removed = s.discard(&local.id).unwrap();
    assert_eq!(removed.id, local.id);
    assert_eq!(s.local_len(), 0);
    assert_eq!(s.discard(&local.id), Err(ChatError::UnknownMessage(local.id.clone())));
}

// =========================================================================
// pagination
// =========================================================================

#[test]
fn older_page_anchor_requires_more_idle_and_messages() {
    let mut s = state(2);
    assert!(s.older_page_anchor().is_none(), "no confirmed messages yet");

    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    assert_eq!(s.older_page_anchor().as_deref(), Some("c"));

    s.is_loading_older = true;
    assert!(s.older_page_anchor().is_none());

    s.is_loading_older = false;
    s.has_more = false;
    assert!(s.older_page_anchor().is_none());
}

#[test]
fn older_page_is_prepended_without_reordering() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    let before: Vec<String> = s.confirmed().iter().map(|m| m.id.clone()).collect();

    assert!(s.apply_older_page("c", snapshot(&[("a", 1), ("b", 2)])));
    assert_eq!(ids(s.confirmed()), ["a", "b", "c", "d"]);
    let before_refs: Vec<&str> = before.iter().map(String::as_str).collect();
    assert_eq!(ids(s.confirmed())[2..].to_vec(), before_refs);
    assert!(s.has_more, "full page");
    assert!(!s.is_loading_older);
}

#[test]
fn short_older_page_ends_pagination() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    assert!(s.apply_older_page("c", snapshot(&[("b", 2)])));
    assert!(!s.has_more);
}

#[test]
fn empty_older_page_ends_pagination() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    assert!(s.apply_older_page("c", Vec::new()));
    assert!(!s.has_more);
    assert_eq!(s.confirmed().len(), 2);
}

#[test]
fn stale_older_page_is_dropped() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    s.is_loading_older = true;

    // The anchor was deleted and an older message slid into the window.
    s.apply_snapshot(snapshot(&[("b", 2), ("d", 4)]));
    assert!(!s.apply_older_page("c", snapshot(&[("a", 1)])));
    assert_eq!(ids(s.confirmed()), ["b", "d"]);
    assert!(!s.is_loading_older);
}

#[test]
fn older_page_ignored_once_has_more_is_false() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    s.has_more = false;
    assert!(!s.apply_older_page("c", snapshot(&[("a", 1), ("b", 2)])));
    assert_eq!(s.confirmed().len(), 2);
}

#[test]
fn older_page_messages_never_absorb_pending_locals() {
    let mut s = SessionState::new(ME, 1, ReconcileMode::Text);
    s.apply_snapshot(snapshot(&[("c", 3)]));
    s.insert_local(ROOM, "Me", "hi".into(), None);

    assert!(s.apply_older_page("c", vec![confirmed("old", ME, "hi", 1)]));
    s.apply_snapshot(snapshot(&[("c", 3)]));
    assert_eq!(s.local_len(), 1);
}

#[test]
fn failed_older_page_keeps_has_more() {
    let mut s = state(2);
    s.apply_snapshot(snapshot(&[("c", 3), ("d", 4)]));
    s.is_loading_older = true;
    s.fail_older_page(ChatError::FetchOlderFailed("down".into()));
    assert!(s.has_more);
    assert!(!s.is_loading_older);
    assert!(s.last_error.is_some());
}
