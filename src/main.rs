//! Terminal demo: one chat session over the in-memory store.
//!
//! Lines typed on stdin are sent as messages. Commands:
//! `/retry <id>`, `/discard <id>`, `/older`, `/clear`, `/quit`.

use std::sync::Arc;

use signacer_chat::message::now_ms;
use signacer_chat::{ChatConfig, ChatSession, ChatView, InMemoryStore, MessageStatus, MessageStore};
use tokio::io::{AsyncBufReadExt, BufReader};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn render(view: &ChatView) {
    println!("---");
    for m in &view.messages {
        let marker = match m.status {
            MessageStatus::Sending => " (sending)",
            MessageStatus::Failed => " (failed)",
            MessageStatus::Sent => "",
        };
        println!("[{}] {}: {}{marker}", m.id, m.sender_name, m.body);
    }
    if view.is_loading_older {
        println!("loading older messages...");
    }
    if let Some(err) = &view.last_error {
        println!("! {err}");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid chat configuration");
            std::process::exit(2);
        }
    };
    let room_id = env_or("CHAT_ROOM_ID", "demo-room");
    let user_id = env_or("CHAT_USER_ID", "demo-user");
    let user_name = env_or("CHAT_USER_NAME", "Demo User");
    let failure_rate: f64 = env_or("CHAT_DEMO_FAILURE_RATE", "0").parse().unwrap_or(0.0);

    let store = Arc::new(InMemoryStore::with_update_capacity(config.update_capacity));
    store.set_append_failure_rate(failure_rate);
    store.seed(&room_id, "coach", "Coach", "Welcome to the room!", now_ms());

    let dyn_store: Arc<dyn MessageStore> = store;
    let session = ChatSession::open(dyn_store, room_id.clone(), user_id, user_name, config);
    tracing::info!(%room_id, failure_rate, "chat demo ready");

    let mut views = session.subscribe();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            render(&view);
            if view.closed {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };

        let result = match line.trim().split_once(' ').unwrap_or((line.trim(), "")) {
            ("/quit", _) => break,
            ("/retry", id) => session.retry(id.trim()),
            ("/discard", id) => session.discard(id.trim()),
            ("/older", _) => session.load_older().map(|_| ()),
            ("/clear", _) => {
                session.clear_error();
                Ok(())
            }
            _ => session.send(&line).map(|_| ()),
        };
        if let Err(e) = result {
            println!("! {e}");
        }
    }

    session.close();
    let _ = printer.await;
}
