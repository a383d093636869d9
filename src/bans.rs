//! Permanent and temporary bans, and enforcing them when users rejoin.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::config::Settings;
use crate::db::{ThreadSettings, ThreadStore};
use crate::notify;
use crate::protection::revert;
use crate::transport::{AddedParticipant, ChatApi, LogEvent, ThreadChange};

/// Temp bans with expired entries already dropped.
#[derive(Debug, Clone)]
pub struct TempBanSnapshot {
    pub settings: ThreadSettings,
    /// user id -> expiry, epoch milliseconds
    pub temp_bans: BTreeMap<String, i64>,
    pub now: i64,
}

impl TempBanSnapshot {
    pub fn remaining(&self, user_id: &str) -> Option<chrono::Duration> {
        self.temp_bans
            .get(user_id)
            .map(|until| chrono::Duration::milliseconds(until - self.now))
    }
}

/// Why a joining user was sent back out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinAction {
    Permanent,
    Temporary { remaining: chrono::Duration },
}

pub struct Bans {
    settings: Arc<Settings>,
    store: ThreadStore,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Bans {
    pub fn new(settings: Arc<Settings>, store: ThreadStore) -> Self {
        Self { settings, store }
    }

    /* ===== temporary ===== */

    pub async fn load_temp_bans(&self, thread_id: &str) -> Result<TempBanSnapshot> {
        self.load_temp_bans_at(thread_id, now_ms()).await
    }

    pub async fn load_temp_bans_at(&self, thread_id: &str, now: i64) -> Result<TempBanSnapshot> {
        let settings = self.store.get_settings(thread_id).await?;
        let before = settings.temp_bans.len();
        let temp_bans: BTreeMap<String, i64> = settings
            .temp_bans
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(id, until)| (id.clone(), *until))
            .collect();
        if temp_bans.len() != before {
            let mut rewritten = settings.clone();
            rewritten.temp_bans = temp_bans.clone();
            self.store.set_settings(thread_id, &rewritten).await?;
            tracing::debug!(%thread_id, dropped = before - temp_bans.len(), "expired temp bans pruned");
        }
        Ok(TempBanSnapshot { settings, temp_bans, now })
    }

    pub async fn save_temp_bans(
        &self,
        thread_id: &str,
        mut settings: ThreadSettings,
        temp_bans: BTreeMap<String, i64>,
    ) -> Result<()> {
        settings.temp_bans = temp_bans;
        self.store.set_settings(thread_id, &settings).await
    }

    /// Ban `user_id` for `duration` from now; returns the expiry.
    pub async fn add_temp_ban(
        &self,
        thread_id: &str,
        user_id: &str,
        duration: chrono::Duration,
    ) -> Result<i64> {
        let snap = self.load_temp_bans(thread_id).await?;
        let until = snap.now.saturating_add(duration.num_milliseconds());
        let mut bans = snap.temp_bans;
        bans.insert(user_id.to_string(), until);
        self.save_temp_bans(thread_id, snap.settings, bans).await?;
        Ok(until)
    }

    /// Returns whether an active ban was lifted.
    pub async fn lift_temp_ban(&self, thread_id: &str, user_id: &str) -> Result<bool> {
        let snap = self.load_temp_bans(thread_id).await?;
        let mut bans = snap.temp_bans;
        let lifted = bans.remove(user_id).is_some();
        if lifted {
            self.save_temp_bans(thread_id, snap.settings, bans).await?;
        }
        Ok(lifted)
    }

    /* ===== permanent ===== */

    pub async fn permanent_bans(&self, thread_id: &str) -> Result<Vec<String>> {
        self.store.banned_users(thread_id).await
    }

    /// Returns false when the user was already banned.
    pub async fn add_permanent_ban(&self, thread_id: &str, user_id: &str) -> Result<bool> {
        let mut list = self.store.banned_users(thread_id).await?;
        if list.iter().any(|id| id == user_id) {
            return Ok(false);
        }
        list.push(user_id.to_string());
        self.store.set_banned_users(thread_id, &list).await?;
        Ok(true)
    }

    /// Returns false when the user was not on the list.
    pub async fn remove_permanent_ban(&self, thread_id: &str, user_id: &str) -> Result<bool> {
        let mut list = self.store.banned_users(thread_id).await?;
        let before = list.len();
        list.retain(|id| id != user_id);
        if list.len() == before {
            return Ok(false);
        }
        self.store.set_banned_users(thread_id, &list).await?;
        Ok(true)
    }

    /* ===== rejoin enforcement ===== */

    /// Kick banned users as they are added. Never fails.
    pub async fn handle_event(&self, api: &dyn ChatApi, ev: &LogEvent) {
        let ThreadChange::Subscribe { added } = ev.change() else {
            return;
        };
        if let Err(e) = self.on_subscribe(api, &ev.thread_id, &added).await {
            tracing::error!(thread_id = %ev.thread_id, error = ?e, "rejoin enforcement failed");
        }
    }

    async fn on_subscribe(
        &self,
        api: &dyn ChatApi,
        thread_id: &str,
        added: &[AddedParticipant],
    ) -> Result<Vec<(String, RejoinAction)>> {
        let bot_id = api.current_user_id();
        let permanent = self.store.banned_users(thread_id).await?;
        let snap = self.load_temp_bans(thread_id).await?;

        let mut kicked = Vec::new();
        for p in added {
            if p.user_id == bot_id {
                self.on_bot_added(api, thread_id).await;
                continue;
            }
            let action = if permanent.iter().any(|id| *id == p.user_id) {
                RejoinAction::Permanent
            } else if let Some(remaining) = snap.remaining(&p.user_id) {
                RejoinAction::Temporary { remaining }
            } else {
                continue;
            };

            if let Err(e) = api.remove_user_from_group(&p.user_id, thread_id).await {
                tracing::warn!(%thread_id, user_id = %p.user_id, error = %e, "could not remove banned user");
                continue;
            }
            let name = if p.full_name.is_empty() { p.user_id.as_str() } else { p.full_name.as_str() };
            let text = match &action {
                RejoinAction::Permanent => notify::auto_kick_permanent(name, &p.user_id),
                RejoinAction::Temporary { remaining } => {
                    notify::auto_kick_temporary(name, &p.user_id, *remaining)
                }
            };
            tracing::info!(%thread_id, user_id = %p.user_id, ?action, "banned user removed on join");
            revert::announce(api, thread_id, &text).await;
            kicked.push((p.user_id.clone(), action));
        }
        Ok(kicked)
    }

    async fn on_bot_added(&self, api: &dyn ChatApi, thread_id: &str) {
        let Some(nickname) = self.settings.bot.nickname.as_deref().filter(|n| !n.is_empty()) else {
            return;
        };
        if let Err(e) = api.change_nickname(nickname, thread_id, &api.current_user_id()).await {
            tracing::warn!(%thread_id, error = %e, "could not set bot nickname");
        }
    }
}
