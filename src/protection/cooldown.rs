use std::time::{Duration, Instant};

use moka::sync::Cache;

/// Debounce for corrective actions, keyed by logical action
/// (`thread-name-{tid}`, `nickname-{tid}-{target}-{author}`, ...).
/// Entries expire on their own once the window has passed.
#[derive(Clone)]
pub struct Cooldowns {
    inner: Cache<String, Instant>,
}

impl Cooldowns {
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(window)
                .max_capacity(50_000)
                .build(),
        }
    }

    /// True for the first caller inside a window, false for everyone after.
    pub fn try_claim(&self, key: &str) -> bool {
        self.inner
            .entry(key.to_string())
            .or_insert_with(Instant::now)
            .is_fresh()
    }

    pub fn clear_all(&self) {
        self.inner.invalidate_all();
    }
}

/// State of a bot-issued nickname correction for one (thread, participant).
/// No entry means idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertMark {
    /// `changeNickname` issued, no answer yet.
    InFlight { nickname: String },
    /// Call succeeded; the matching log event has not been seen yet.
    AwaitingEcho { nickname: String },
}

#[derive(Clone)]
pub struct RevertGuard {
    inner: Cache<String, RevertMark>,
}

impl RevertGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().time_to_live(ttl).max_capacity(50_000).build(),
        }
    }

    pub fn key(thread_id: &str, participant_id: &str) -> String {
        format!("{thread_id}-{participant_id}")
    }

    /// Idle -> InFlight. False when a correction is already pending.
    pub fn begin(&self, key: &str, nickname: &str) -> bool {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| RevertMark::InFlight { nickname: nickname.to_string() })
            .is_fresh()
    }

    /// InFlight -> AwaitingEcho.
    pub fn complete(&self, key: &str) {
        if let Some(RevertMark::InFlight { nickname }) = self.inner.get(key) {
            self.inner
                .insert(key.to_string(), RevertMark::AwaitingEcho { nickname });
        }
    }

    /// Any -> Idle.
    pub fn clear(&self, key: &str) {
        self.inner.invalidate(key);
    }

    pub fn peek(&self, key: &str) -> Option<RevertMark> {
        self.inner.get(key)
    }

    pub fn clear_all(&self) {
        self.inner.invalidate_all();
    }
}
