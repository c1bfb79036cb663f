use super::*;

fn msg(id: &str, sender: &str, created_at: i64) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        room_id: "athlete-1".into(),
        sender_id: sender.into(),
        sender_name: "Ann".into(),
        body: "hello".into(),
        created_at,
        status: MessageStatus::Sent,
        client_token: None,
    }
}

#[test]
fn normalize_body_trims_whitespace_and_newlines() {
    assert_eq!(normalize_body("  hi there \n").as_deref(), Some("hi there"));
}

#[test]
fn normalize_body_rejects_blank_input() {
    assert!(normalize_body("").is_none());
    assert!(normalize_body(" \t\n ").is_none());
}

#[test]
fn local_ids_carry_reserved_suffix() {
    let id = new_local_id();
    assert!(id.ends_with(LOCAL_ID_SUFFIX));
    assert!(is_local_id(&id));
    assert!(!is_local_id("m1"));
    assert_ne!(new_local_id(), id);
}

#[test]
fn client_tokens_are_hex_and_unique() {
    let a = new_client_token();
    let b = new_client_token();
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
}

#[test]
fn is_own_message_compares_sender() {
    let m = msg("m1", "u1", 1);
    assert!(m.is_own_message("u1"));
    assert!(!m.is_own_message("u2"));
    assert!(!m.is_local());
}

#[test]
fn sort_ascending_is_stable_for_equal_timestamps() {
    let mut list = vec![msg("c", "u1", 5), msg("a", "u1", 1), msg("b", "u1", 5)];
    sort_ascending(&mut list);
    let ids: Vec<_> = list.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["a", "c", "b"]);
}

#[test]
fn status_serializes_lowercase_and_token_is_optional() {
    let m = msg("m1", "u1", 7);
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["status"], "sent");
    assert!(json.get("client_token").is_none());

    let restored: ChatMessage = serde_json::from_value(json).unwrap();
    assert_eq!(restored, m);
}
