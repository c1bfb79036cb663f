//! Chat configuration parsed from environment variables.

use std::str::FromStr;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_UPDATE_CAPACITY: usize = 64;

/// How local messages are matched against confirmed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Attach an idempotency token to every append and match it exactly.
    /// Confirmed messages without a token fall back to the text match.
    #[default]
    Token,
    /// Match on sender and trimmed body only. No token is sent.
    Text,
}

impl FromStr for ReconcileMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown CHAT_RECONCILE mode '{other}' (expected 'token' or 'text')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatConfig {
    /// Messages per live window and per older page.
    pub page_size: usize,
    pub reconcile: ReconcileMode,
    /// Pending snapshots a subscription channel may buffer.
    pub update_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE, reconcile: ReconcileMode::Token, update_capacity: DEFAULT_UPDATE_CAPACITY }
    }
}

impl ChatConfig {
    /// Build typed chat config from environment variables.
    ///
    /// Optional:
    /// - `CHAT_PAGE_SIZE`: default 50, clamped to at least 1
    /// - `CHAT_RECONCILE`: `token` (default) or `text`
    /// - `CHAT_UPDATE_CAPACITY`: default 64, clamped to at least 1
    ///
    /// # Errors
    ///
    /// Returns an error if `CHAT_RECONCILE` names an unknown mode.
    pub fn from_env() -> Result<Self, String> {
        let reconcile = match std::env::var("CHAT_RECONCILE") {
            Ok(raw) => raw.parse()?,
            Err(_) => ReconcileMode::default(),
        };
        Ok(Self {
            page_size: env_parse("CHAT_PAGE_SIZE", DEFAULT_PAGE_SIZE).max(1),
            reconcile,
            update_capacity: env_parse("CHAT_UPDATE_CAPACITY", DEFAULT_UPDATE_CAPACITY).max(1),
        })
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_reconcile(mut self, reconcile: ReconcileMode) -> Self {
        self.reconcile = reconcile;
        self
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
