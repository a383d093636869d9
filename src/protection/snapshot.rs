//! Reconciliation: compare a thread's live state against its baseline and
//! correct drift. Runs at startup for every known thread and on first
//! sight of a thread afterwards.

use futures_util::StreamExt;

use super::{revert, same_photo, same_theme, Protection};
use crate::db::ThreadStore;
use crate::notify;
use crate::transport::{ChatApi, ThreadInfo};

const DEFAULT_CONCURRENCY: usize = 4;

/// Name/theme corrections from one snapshot pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub name_restored: bool,
    pub theme_restored: bool,
}

/// Corrections made for one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub name_restored: bool,
    pub theme_restored: bool,
    pub photo_restored: bool,
    pub nicknames_restored: usize,
}

impl ReconcileReport {
    pub fn any(&self) -> bool {
        self.name_restored || self.theme_restored || self.photo_restored || self.nicknames_restored > 0
    }
}

impl Protection {
    fn skip_snapshot(&self, thread_id: &str, info: &ThreadInfo, baseline_name: &str) -> bool {
        !info.is_enforceable_group() || self.is_exempt(thread_id, baseline_name)
            || self.is_exempt(thread_id, &info.name)
    }

    /// Name and theme.
    pub async fn enforce_protection_snapshot(
        &self,
        api: &dyn ChatApi,
        thread_id: &str,
        info: &ThreadInfo,
        notify: bool,
    ) -> anyhow::Result<SnapshotOutcome> {
        let targets = self.targets.get_protection_targets(thread_id, Some(info)).await?;
        if self.skip_snapshot(thread_id, info, &targets.name) {
            return Ok(SnapshotOutcome::default());
        }

        let mut outcome = SnapshotOutcome::default();
        let current_name = info.name.trim();
        if !targets.name.is_empty() && !current_name.is_empty() && current_name != targets.name {
            tracing::info!(%thread_id, current = %current_name, target = %targets.name, "name drifted");
            outcome.name_restored = revert::restore_name(api, thread_id, &targets.name).await;
            if outcome.name_restored && notify {
                revert::announce(api, thread_id, &notify::name_restored(self.brand(), &targets.name))
                    .await;
            }
        }

        if let Some(current_theme) = info.theme.as_deref() {
            if !targets.theme.is_empty() && !same_theme(current_theme, &targets.theme) {
                tracing::info!(%thread_id, current = %current_theme, target = %targets.theme, "theme drifted");
                outcome.theme_restored = revert::restore_theme(api, thread_id, &targets.theme).await;
                if outcome.theme_restored && notify {
                    revert::announce(api, thread_id, &notify::theme_restored(self.brand())).await;
                }
            }
        }

        Ok(outcome)
    }

    /// Nicknames of current participants. Returns how many were restored.
    pub async fn enforce_nickname_snapshot(
        &self,
        api: &dyn ChatApi,
        thread_id: &str,
        info: &ThreadInfo,
        notify: bool,
    ) -> anyhow::Result<usize> {
        let targets = self.targets.get_protection_targets(thread_id, Some(info)).await?;
        if self.skip_snapshot(thread_id, info, &targets.name) {
            return Ok(0);
        }

        let live = &info.nicknames;
        let mut baseline = self.targets.get_protected_nicknames(thread_id, Some(live)).await?;

        // participants never seen before join the baseline as they are
        let mut changed = false;
        for (user_id, nickname) in live {
            self.nicknames.set(thread_id, user_id, nickname);
            if !baseline.contains_key(user_id) {
                baseline.insert(user_id.clone(), nickname.clone());
                changed = true;
            }
        }
        if changed {
            self.targets.persist_nicknames(thread_id, baseline.clone()).await?;
        }

        let mut restored = 0;
        for (user_id, target) in &baseline {
            let present = info.participant_ids.is_empty() || info.participant_ids.contains(user_id);
            if !present {
                continue;
            }
            let current = live.get(user_id).map(String::as_str).unwrap_or("");
            if current == target {
                continue;
            }
            tracing::info!(%thread_id, %user_id, %current, %target, "nickname drifted");
            if revert::restore_nickname(api, &self.reverts, thread_id, user_id, target).await {
                self.nicknames.set(thread_id, user_id, target);
                restored += 1;
            }
        }

        if restored > 0 && notify {
            revert::announce(api, thread_id, &notify::nicknames_restored(self.brand(), restored))
                .await;
        }
        Ok(restored)
    }

    /// Group photo. Without a baseline the live photo becomes one.
    pub async fn enforce_photo_snapshot(
        &self,
        api: &dyn ChatApi,
        thread_id: &str,
        info: &ThreadInfo,
        notify: bool,
    ) -> anyhow::Result<bool> {
        let targets = self.targets.get_protection_targets(thread_id, Some(info)).await?;
        if self.skip_snapshot(thread_id, info, &targets.name) {
            return Ok(false);
        }

        let Some(baseline) = self.targets.get_protected_photo(thread_id, Some(info)).await? else {
            return Ok(false);
        };
        let current = info.image_url.as_deref().unwrap_or("");
        if same_photo(current, &baseline) {
            return Ok(false);
        }

        tracing::info!(%thread_id, "group photo drifted");
        let restored = revert::restore_photo(api, self.photos.as_ref(), thread_id, &baseline).await;
        if restored && notify {
            revert::announce(api, thread_id, &notify::photo_restored(self.brand())).await;
        }
        Ok(restored)
    }

    /// All three checks against one fresh read. Errors are logged per check.
    pub async fn reconcile_thread(
        &self,
        api: &dyn ChatApi,
        thread_id: &str,
        info: &ThreadInfo,
        notify: bool,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        match self.enforce_protection_snapshot(api, thread_id, info, notify).await {
            Ok(outcome) => {
                report.name_restored = outcome.name_restored;
                report.theme_restored = outcome.theme_restored;
            }
            Err(e) => tracing::error!(%thread_id, error = ?e, "name/theme reconciliation failed"),
        }
        match self.enforce_nickname_snapshot(api, thread_id, info, notify).await {
            Ok(n) => report.nicknames_restored = n,
            Err(e) => tracing::error!(%thread_id, error = ?e, "nickname reconciliation failed"),
        }
        match self.enforce_photo_snapshot(api, thread_id, info, notify).await {
            Ok(p) => report.photo_restored = p,
            Err(e) => tracing::error!(%thread_id, error = ?e, "photo reconciliation failed"),
        }

        if report.any() {
            tracing::info!(%thread_id, ?report, "thread reconciled");
        }
        report
    }

    /// Reconcile every stored thread with bounded concurrency.
    pub async fn reconcile_all(&self, api: &dyn ChatApi, store: &ThreadStore, notify: bool) -> usize {
        let ids = match store.list_thread_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = ?e, "could not list threads for reconciliation");
                return 0;
            }
        };
        let total = ids.len();
        let limit = self
            .settings
            .protection
            .reconcile_concurrency
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);
        tracing::info!(threads = total, limit, "startup reconciliation");

        let corrected = std::sync::atomic::AtomicUsize::new(0);
        futures_util::stream::iter(ids)
            .for_each_concurrent(limit, |thread_id| {
                let corrected = &corrected;
                async move {
                    let info = match api.get_thread_info(&thread_id).await {
                        Ok(info) => info,
                        Err(e) => {
                            tracing::warn!(%thread_id, error = %e, "skipping thread; getThreadInfo failed");
                            return;
                        }
                    };
                    self.observe(&thread_id, &info);
                    if self.reconcile_thread(api, &thread_id, &info, notify).await.any() {
                        corrected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            })
            .await;

        let corrected = corrected.into_inner();
        tracing::info!(threads = total, corrected, "startup reconciliation finished");
        corrected
    }
}
