//! Repeated-content detection. A user who posts the same content
//! `threshold` times in a row is removed and temp-banned.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::bans::Bans;
use crate::config::Settings;
use crate::notify;
use crate::protection::revert;
use crate::transport::{Attachment, ChatApi, IncomingEvent, MessageEvent};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_BAN_MINUTES: u64 = 60;
const MAX_BAN_DAYS: i64 = 3650;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Per (thread, user) repeat state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpamState {
    #[default]
    Idle,
    Tracking { signature: String, count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamVerdict {
    /// Message carried no content to compare.
    Ignored,
    /// Same content seen this many times in a row.
    Tracking(u32),
    /// Threshold reached; state was reset.
    Triggered,
}

#[derive(Debug, Default)]
pub struct SpamTracker {
    entries: DashMap<(String, String), SpamState>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, thread_id: &str, user_id: &str, signature: &str, threshold: u32) -> SpamVerdict {
        if signature.is_empty() {
            return SpamVerdict::Ignored;
        }
        let mut state = self
            .entries
            .entry((thread_id.to_string(), user_id.to_string()))
            .or_default();

        let count = match &*state {
            SpamState::Tracking { signature: last, count } if last == signature => count + 1,
            _ => 1,
        };
        if count >= threshold.max(1) {
            *state = SpamState::Idle;
            return SpamVerdict::Triggered;
        }
        *state = SpamState::Tracking { signature: signature.to_string(), count };
        SpamVerdict::Tracking(count)
    }

    pub fn state(&self, thread_id: &str, user_id: &str) -> SpamState {
        self.entries
            .get(&(thread_id.to_string(), user_id.to_string()))
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn clear_thread(&self, thread_id: &str) {
        self.entries.retain(|(t, _), _| t != thread_id);
    }
}

fn attachment_key(a: &Attachment) -> String {
    let kind = a.kind.trim().to_lowercase();
    let kind = if kind.is_empty() { "unknown".to_string() } else { kind };
    if a.id.is_empty() { kind } else { format!("{kind}:{}", a.id) }
}

/// Normalized body plus attachment identities; empty when there is nothing to compare.
pub fn signature(msg: &MessageEvent) -> String {
    let body = WHITESPACE
        .replace_all(msg.body.trim(), " ")
        .to_lowercase();
    let attachments = msg
        .attachments
        .iter()
        .map(attachment_key)
        .collect::<Vec<_>>()
        .join("|");
    [body, attachments]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("||")
}

pub struct AntiSpam {
    settings: Arc<Settings>,
    tracker: SpamTracker,
    bans: Arc<Bans>,
}

impl AntiSpam {
    pub fn new(settings: Arc<Settings>, bans: Arc<Bans>) -> Self {
        Self { settings, tracker: SpamTracker::new(), bans }
    }

    pub fn tracker(&self) -> &SpamTracker {
        &self.tracker
    }

    fn threshold(&self) -> u32 {
        self.settings.antispam.threshold.unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Configured ban length, capped at `MAX_BAN_DAYS`.
    fn ban_duration(&self) -> chrono::Duration {
        let minutes = self.settings.antispam.ban_minutes.unwrap_or(DEFAULT_BAN_MINUTES);
        let cap = chrono::Duration::days(MAX_BAN_DAYS);
        i64::try_from(minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .map_or(cap, |d| d.min(cap))
    }

    /// Look at every event; only group messages from ordinary users count.
    pub async fn handle_any_event(&self, api: &dyn ChatApi, ev: &IncomingEvent) -> SpamVerdict {
        let IncomingEvent::Message(msg) = ev else {
            return SpamVerdict::Ignored;
        };
        let (thread_id, user_id) = (msg.thread_id.as_str(), msg.sender_id.as_str());
        if thread_id.is_empty() || user_id.is_empty() || !msg.is_group {
            return SpamVerdict::Ignored;
        }
        if self.settings.is_bot_admin(user_id) || user_id == api.current_user_id() {
            return SpamVerdict::Ignored;
        }

        let verdict = self.tracker.observe(thread_id, user_id, &signature(msg), self.threshold());
        if verdict == SpamVerdict::Triggered {
            self.punish(api, thread_id, user_id).await;
        }
        verdict
    }

    async fn punish(&self, api: &dyn ChatApi, thread_id: &str, user_id: &str) {
        if let Err(e) = api.remove_user_from_group(user_id, thread_id).await {
            tracing::warn!(%thread_id, %user_id, error = %e, "anti-spam removal failed");
            return;
        }
        let ban = self.ban_duration();
        match self.bans.add_temp_ban(thread_id, user_id, ban).await {
            Ok(until) => tracing::info!(%thread_id, %user_id, until, "anti-spam removal and temp ban"),
            Err(e) => tracing::error!(%thread_id, %user_id, error = ?e, "could not record temp ban"),
        }
        revert::announce(api, thread_id, &notify::spam_removed(user_id, self.threshold(), ban)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str, attachments: &[(&str, &str)]) -> MessageEvent {
        MessageEvent {
            thread_id: "t".into(),
            sender_id: "u".into(),
            body: body.into(),
            attachments: attachments
                .iter()
                .map(|(kind, id)| Attachment { kind: kind.to_string(), id: id.to_string() })
                .collect(),
            is_group: true,
            ..Default::default()
        }
    }

    #[test]
    fn signature_normalizes_whitespace_and_case() {
        assert_eq!(signature(&msg("  Hello   WORLD\n", &[])), "hello world");
        assert_eq!(
            signature(&msg("hi", &[("Photo", "1"), ("sticker", "")])),
            "hi||photo:1|sticker"
        );
        assert_eq!(signature(&msg("", &[("", "9")])), "unknown:9");
        assert_eq!(signature(&msg("   ", &[])), "");
    }

    #[test]
    fn fifth_identical_message_triggers_and_resets() {
        let t = SpamTracker::new();
        for n in 1..5 {
            assert_eq!(t.observe("t", "u", "spam", 5), SpamVerdict::Tracking(n));
        }
        assert_eq!(t.observe("t", "u", "spam", 5), SpamVerdict::Triggered);
        assert_eq!(t.state("t", "u"), SpamState::Idle);
        assert_eq!(t.observe("t", "u", "spam", 5), SpamVerdict::Tracking(1));
    }

    #[test]
    fn different_content_restarts_count() {
        let t = SpamTracker::new();
        t.observe("t", "u", "a", 5);
        t.observe("t", "u", "a", 5);
        assert_eq!(t.observe("t", "u", "b", 5), SpamVerdict::Tracking(1));
        assert_eq!(
            t.state("t", "u"),
            SpamState::Tracking { signature: "b".into(), count: 1 }
        );
    }

    #[test]
    fn users_and_threads_are_tracked_separately() {
        let t = SpamTracker::new();
        for _ in 0..4 {
            t.observe("t", "u", "x", 5);
        }
        assert_eq!(t.observe("t", "other", "x", 5), SpamVerdict::Tracking(1));
        assert_eq!(t.observe("t2", "u", "x", 5), SpamVerdict::Tracking(1));
        assert_eq!(t.observe("t", "u", "x", 5), SpamVerdict::Triggered);
    }

    #[test]
    fn empty_signature_is_ignored() {
        let t = SpamTracker::new();
        assert_eq!(t.observe("t", "u", "", 5), SpamVerdict::Ignored);
        assert_eq!(t.state("t", "u"), SpamState::Idle);
    }

    #[test]
    fn clear_thread_only_touches_that_thread() {
        let t = SpamTracker::new();
        t.observe("t", "u", "x", 5);
        t.observe("t2", "u", "x", 5);
        t.clear_thread("t");
        assert_eq!(t.state("t", "u"), SpamState::Idle);
        assert_ne!(t.state("t2", "u"), SpamState::Idle);
    }
}
