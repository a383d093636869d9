//! Group protection: keeps a thread's name, theme, photo and nicknames at
//! their recorded baseline unless an authorized user changes them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use moka::sync::Cache;

use crate::config::Settings;
use crate::db::ThreadStore;
use crate::notify;
use crate::permissions::{self, GroupAdmins, Role};
use crate::transport::{display_name, ChatApi, LogEvent, PhotoSource, ThreadChange, ThreadInfo};

pub mod cooldown;
pub mod nicknames;
pub mod revert;
pub mod snapshot;
pub mod targets;

pub use cooldown::{Cooldowns, RevertGuard, RevertMark};
pub use nicknames::NicknameCache;
pub use snapshot::{ReconcileReport, SnapshotOutcome};
pub use targets::{ProtectionTargets, SavedBaseline, TargetStore, TargetUpdate};

const DEFAULT_COOLDOWN_MS: u64 = 3_000;
const DEFAULT_GROUP_KIND_TTL_MS: u64 = 10 * 60 * 1000;

pub struct Protection {
    settings: Arc<Settings>,
    targets: TargetStore,
    nicknames: NicknameCache,
    cooldowns: Cooldowns,
    reverts: RevertGuard,
    admins: GroupAdmins,
    photos: Arc<dyn PhotoSource>,
    /// thread id -> enforceable group?
    groups: Cache<String, bool>,
}

impl Protection {
    pub fn new(
        settings: Arc<Settings>,
        store: ThreadStore,
        admins: GroupAdmins,
        photos: Arc<dyn PhotoSource>,
    ) -> Self {
        let window =
            Duration::from_millis(settings.protection.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS));
        let group_ttl = Duration::from_millis(
            settings.protection.group_kind_ttl_ms.unwrap_or(DEFAULT_GROUP_KIND_TTL_MS),
        );
        Self {
            targets: TargetStore::new(store, &settings.protection),
            nicknames: NicknameCache::new(),
            cooldowns: Cooldowns::new(window),
            // outlives the cooldown so a late echo is still recognised
            reverts: RevertGuard::new(window + Duration::from_secs(1)),
            admins,
            photos,
            groups: Cache::builder().time_to_live(group_ttl).max_capacity(50_000).build(),
            settings,
        }
    }

    pub fn targets(&self) -> &TargetStore {
        &self.targets
    }

    pub fn nicknames(&self) -> &NicknameCache {
        &self.nicknames
    }

    pub fn reverts(&self) -> &RevertGuard {
        &self.reverts
    }

    fn brand(&self) -> &str {
        &self.settings.app.name
    }

    /// Staff threads (by id or by name keyword) are left alone.
    pub fn is_exempt(&self, thread_id: &str, thread_name: &str) -> bool {
        let cfg = &self.settings.protection;
        if cfg.exempt_threads.iter().any(|t| t == thread_id) {
            return true;
        }
        let name = thread_name.to_lowercase();
        !name.is_empty()
            && cfg
                .exempt_keywords
                .iter()
                .any(|k| !k.is_empty() && name.contains(&k.to_lowercase()))
    }

    async fn is_authorized(&self, api: &dyn ChatApi, user_id: &str, thread_id: &str) -> bool {
        permissions::resolve_role(&self.settings, &self.admins, api, user_id, thread_id).await
            >= Role::GroupAdmin
    }

    /* ===== thread discovery ===== */

    /// Record a thread read. Nicknames already cached stay as they are.
    fn observe(&self, thread_id: &str, info: &ThreadInfo) {
        self.nicknames.absorb(thread_id, info);
        self.groups.insert(thread_id.to_string(), info.is_enforceable_group());
    }

    /// Load live state for a thread the first time it is seen and seed its
    /// baselines. Returns the info only when a fetch happened now.
    pub async fn warm(&self, api: &dyn ChatApi, thread_id: &str) -> Option<ThreadInfo> {
        if self.groups.contains_key(thread_id) {
            return None;
        }
        let info = match api.get_thread_info(thread_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(%thread_id, error = %e, "getThreadInfo failed; nickname cache left empty");
                self.nicknames.mark_empty(thread_id);
                return None;
            }
        };
        self.observe(thread_id, &info);
        if info.is_enforceable_group() {
            if let Err(e) = self.seed(thread_id, &info).await {
                tracing::error!(%thread_id, error = ?e, "seeding baseline failed");
            }
        }
        Some(info)
    }

    async fn seed(&self, thread_id: &str, info: &ThreadInfo) -> Result<()> {
        self.targets.get_protection_targets(thread_id, Some(info)).await?;
        self.targets.get_protected_nicknames(thread_id, Some(&info.nicknames)).await?;
        self.targets.get_protected_photo(thread_id, Some(info)).await?;
        Ok(())
    }

    /// Force a fresh read; the nickname cache is rebuilt from it.
    pub async fn refresh(&self, api: &dyn ChatApi, thread_id: &str) -> Option<ThreadInfo> {
        match api.get_thread_info(thread_id).await {
            Ok(info) => {
                self.nicknames.replace(thread_id, &info);
                self.groups.insert(thread_id.to_string(), info.is_enforceable_group());
                Some(info)
            }
            Err(e) => {
                tracing::warn!(%thread_id, error = %e, "getThreadInfo failed");
                None
            }
        }
    }

    /// First contact with a thread from a message: seed, then quietly
    /// correct any drift that happened while the bot was not watching.
    pub async fn first_sight(&self, api: &dyn ChatApi, thread_id: &str) {
        if let Some(info) = self.warm(api, thread_id).await {
            if info.is_enforceable_group() {
                self.reconcile_thread(api, thread_id, &info, false).await;
            }
        }
    }

    /// Unknown kind (lookup failed) counts as not enforceable and is retried next time.
    async fn is_enforceable(&self, api: &dyn ChatApi, thread_id: &str) -> bool {
        if let Some(kind) = self.groups.get(thread_id) {
            return kind;
        }
        self.warm(api, thread_id).await;
        self.groups.get(thread_id).unwrap_or(false)
    }

    pub fn clear(&self, thread_id: &str) {
        self.targets.clear(thread_id);
        self.nicknames.clear(thread_id);
        self.groups.invalidate(thread_id);
    }

    pub fn clear_all(&self) {
        self.targets.clear_all();
        self.nicknames.clear_all();
        self.cooldowns.clear_all();
        self.reverts.clear_all();
        self.groups.invalidate_all();
    }

    /* ===== change classifier ===== */

    /// Route one log event. Never fails: problems are logged and dropped.
    pub async fn handle_event(&self, api: &dyn ChatApi, ev: &LogEvent) {
        let change = ev.change();
        if matches!(
            change,
            ThreadChange::Other | ThreadChange::Subscribe { .. } | ThreadChange::Unsubscribe { .. }
        ) {
            return;
        }
        if !self.is_enforceable(api, &ev.thread_id).await {
            tracing::trace!(thread_id = %ev.thread_id, "not a protected group");
            return;
        }

        let res = match &change {
            ThreadChange::Name { name } => self.on_name_change(api, ev, name).await,
            ThreadChange::Theme { theme } => self.on_theme_change(api, ev, theme).await,
            ThreadChange::Photo { url } => self.on_photo_change(api, ev, url).await,
            ThreadChange::Nickname { participant_id, nickname } => {
                self.on_nickname_change(api, ev, participant_id, nickname).await
            }
            _ => Ok(()),
        };
        if let Err(e) = res {
            tracing::error!(
                thread_id = %ev.thread_id,
                kind = %ev.log_message_type,
                error = ?e,
                "protection handler failed"
            );
        }
    }

    async fn on_name_change(&self, api: &dyn ChatApi, ev: &LogEvent, name: &str) -> Result<()> {
        let thread_id = ev.thread_id.as_str();
        let targets = self.targets.get_protection_targets(thread_id, None).await?;
        if self.is_exempt(thread_id, &targets.name) {
            return Ok(());
        }
        if name == targets.name || ev.author == api.current_user_id() {
            return Ok(());
        }

        if self.is_authorized(api, &ev.author, thread_id).await {
            if !name.is_empty() {
                let update = TargetUpdate { name: Some(name.to_string()), ..Default::default() };
                self.targets.update_protection_targets(thread_id, update).await?;
                tracing::info!(%thread_id, author = %ev.author, %name, "group name change accepted");
            }
            return Ok(());
        }

        if !self.cooldowns.try_claim(&format!("thread-name-{thread_id}")) {
            tracing::debug!(%thread_id, "name correction suppressed by cooldown");
            return Ok(());
        }
        tracing::info!(%thread_id, author = %ev.author, attempted = %name, "unauthorized name change");
        if revert::restore_name(api, thread_id, &targets.name).await {
            revert::announce(api, thread_id, &notify::name_denied(self.brand(), &targets.name)).await;
        }
        Ok(())
    }

    async fn on_theme_change(&self, api: &dyn ChatApi, ev: &LogEvent, theme: &str) -> Result<()> {
        let thread_id = ev.thread_id.as_str();
        let targets = self.targets.get_protection_targets(thread_id, None).await?;
        if self.is_exempt(thread_id, &targets.name) {
            return Ok(());
        }
        if theme.is_empty() || same_theme(theme, &targets.theme) || ev.author == api.current_user_id()
        {
            return Ok(());
        }

        if self.is_authorized(api, &ev.author, thread_id).await {
            let update = TargetUpdate { theme: Some(theme.to_string()), ..Default::default() };
            self.targets.update_protection_targets(thread_id, update).await?;
            tracing::info!(%thread_id, author = %ev.author, %theme, "group theme change accepted");
            return Ok(());
        }

        if !self.cooldowns.try_claim(&format!("thread-theme-{thread_id}")) {
            tracing::debug!(%thread_id, "theme correction suppressed by cooldown");
            return Ok(());
        }
        tracing::info!(%thread_id, author = %ev.author, attempted = %theme, "unauthorized theme change");
        if revert::restore_theme(api, thread_id, &targets.theme).await {
            revert::announce(api, thread_id, &notify::theme_denied(self.brand())).await;
        }
        Ok(())
    }

    async fn on_photo_change(&self, api: &dyn ChatApi, ev: &LogEvent, url: &str) -> Result<()> {
        let thread_id = ev.thread_id.as_str();
        let targets = self.targets.get_protection_targets(thread_id, None).await?;
        if self.is_exempt(thread_id, &targets.name) {
            return Ok(());
        }
        // our own upload gets a fresh CDN url; track it
        if ev.author == api.current_user_id() {
            self.targets.set_protected_photo(thread_id, url).await?;
            return Ok(());
        }

        let baseline = self.targets.get_protected_photo(thread_id, None).await?;
        if baseline.as_deref().is_some_and(|b| same_photo(b, url)) {
            return Ok(());
        }

        if self.is_authorized(api, &ev.author, thread_id).await {
            if url.is_empty() {
                self.targets.clear_protected_photo(thread_id).await?;
            } else {
                self.targets.set_protected_photo(thread_id, url).await?;
            }
            tracing::info!(%thread_id, author = %ev.author, "group photo change accepted");
            return Ok(());
        }

        let Some(baseline) = baseline else {
            tracing::warn!(%thread_id, "unauthorized photo change but no baseline photo recorded");
            return Ok(());
        };
        if !self.cooldowns.try_claim(&format!("thread-icon-{thread_id}")) {
            tracing::debug!(%thread_id, "photo correction suppressed by cooldown");
            return Ok(());
        }
        tracing::info!(%thread_id, author = %ev.author, "unauthorized photo change");
        if revert::restore_photo(api, self.photos.as_ref(), thread_id, &baseline).await {
            revert::announce(api, thread_id, &notify::photo_denied(self.brand())).await;
        }
        Ok(())
    }

    async fn on_nickname_change(
        &self,
        api: &dyn ChatApi,
        ev: &LogEvent,
        participant_id: &str,
        nickname: &str,
    ) -> Result<()> {
        let thread_id = ev.thread_id.as_str();
        if participant_id.is_empty() {
            return Ok(());
        }
        let targets = self.targets.get_protection_targets(thread_id, None).await?;
        if self.is_exempt(thread_id, &targets.name) {
            return Ok(());
        }

        let mark_key = RevertGuard::key(thread_id, participant_id);
        if ev.author == participant_id || ev.author == api.current_user_id() {
            self.reverts.clear(&mark_key);
            return self.accept_nickname(thread_id, participant_id, nickname).await;
        }

        match self.reverts.peek(&mark_key) {
            Some(RevertMark::InFlight { .. }) => {
                tracing::debug!(%thread_id, %participant_id, "nickname correction in flight; ignoring");
                return Ok(());
            }
            Some(RevertMark::AwaitingEcho { nickname: expected }) if expected == nickname => {
                self.reverts.clear(&mark_key);
                return self.accept_nickname(thread_id, participant_id, nickname).await;
            }
            Some(RevertMark::AwaitingEcho { .. }) => self.reverts.clear(&mark_key),
            None => {}
        }

        let baseline = self
            .targets
            .get_protected_nicknames(thread_id, None)
            .await?
            .get(participant_id)
            .cloned();
        let restore_to = baseline.unwrap_or_else(|| self.nicknames.get(thread_id, participant_id));
        if restore_to == nickname {
            self.nicknames.set(thread_id, participant_id, nickname);
            return Ok(());
        }

        if self.is_authorized(api, &ev.author, thread_id).await {
            tracing::info!(%thread_id, author = %ev.author, %participant_id, "nickname change accepted");
            return self.accept_nickname(thread_id, participant_id, nickname).await;
        }

        let cooldown_key = format!("nickname-{thread_id}-{participant_id}-{}", ev.author);
        if !self.cooldowns.try_claim(&cooldown_key) {
            tracing::debug!(%thread_id, %participant_id, "nickname correction suppressed by cooldown");
            return Ok(());
        }
        tracing::info!(
            %thread_id,
            author = %ev.author,
            %participant_id,
            attempted = %nickname,
            "unauthorized nickname change"
        );
        if !revert::restore_nickname(api, &self.reverts, thread_id, participant_id, &restore_to).await
        {
            return Ok(());
        }
        self.nicknames.set(thread_id, participant_id, &restore_to);
        self.targets.set_protected_nickname(thread_id, participant_id, &restore_to).await?;

        let author = display_name(api, &ev.author, "Someone").await;
        let target = display_name(api, participant_id, "another user").await;
        revert::announce(api, thread_id, &notify::nickname_denied(self.brand(), &author, &target))
            .await;
        Ok(())
    }

    async fn accept_nickname(&self, thread_id: &str, participant_id: &str, nickname: &str) -> Result<()> {
        self.nicknames.set(thread_id, participant_id, nickname);
        self.targets.set_protected_nickname(thread_id, participant_id, nickname).await?;
        Ok(())
    }
}

/// Theme ids and colors compare case-insensitively.
pub fn same_theme(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// CDN photo urls carry rotating signatures in the query; the path
/// identifies the image.
pub fn same_photo(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(ua), Ok(ub)) => ua.host_str().is_some() && ua.path() != "/" && ua.path() == ub.path(),
        _ => false,
    }
}
