use super::*;
use std::sync::{Mutex, MutexGuard, PoisonError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Safety
/// Callers must hold `env_guard()` so tests in this module do not race.
unsafe fn clear_chat_env() {
    unsafe {
        std::env::remove_var("CHAT_PAGE_SIZE");
        std::env::remove_var("CHAT_RECONCILE");
        std::env::remove_var("CHAT_UPDATE_CAPACITY");
    }
}

#[test]
fn from_env_defaults() {
    let _env = env_guard();
    unsafe { clear_chat_env() };

    let cfg = ChatConfig::from_env().unwrap();
    assert_eq!(cfg, ChatConfig::default());
    assert_eq!(cfg.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(cfg.reconcile, ReconcileMode::Token);
}

#[test]
fn from_env_parses_overrides() {
    let _env = env_guard();
    unsafe {
        clear_chat_env();
        std::env::set_var("CHAT_PAGE_SIZE", "20");
        std::env::set_var("CHAT_RECONCILE", "Text");
        std::env::set_var("CHAT_UPDATE_CAPACITY", "8");
    }

    let cfg = ChatConfig::from_env().unwrap();
    assert_eq!(cfg.page_size, 20);
    assert_eq!(cfg.reconcile, ReconcileMode::Text);
    assert_eq!(cfg.update_capacity, 8);

    unsafe { clear_chat_env() };
}

#[test]
fn from_env_clamps_zero_and_ignores_garbage() {
    let _env = env_guard();
    unsafe {
        clear_chat_env();
        std::env::set_var("CHAT_PAGE_SIZE", "0");
        std::env::set_var("CHAT_UPDATE_CAPACITY", "lots");
    }

    let cfg = ChatConfig::from_env().unwrap();
    assert_eq!(cfg.page_size, 1);
    assert_eq!(cfg.update_capacity, DEFAULT_UPDATE_CAPACITY);

    unsafe { clear_chat_env() };
}

#[test]
fn from_env_unknown_reconcile_mode_errors() {
    let _env = env_guard();
    unsafe {
        clear_chat_env();
        std::env::set_var("CHAT_RECONCILE", "vibes");
    }

    let err = ChatConfig::from_env().unwrap_err();
    assert!(err.contains("unknown CHAT_RECONCILE mode"));

    unsafe { clear_chat_env() };
}

#[test]
fn builders_clamp_page_size() {
    let cfg = ChatConfig::default().with_page_size(0).with_reconcile(ReconcileMode::Text);
    assert_eq!(cfg.page_size, 1);
    assert_eq!(cfg.reconcile, ReconcileMode::Text);
}
