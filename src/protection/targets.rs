//! Persisted protection baselines per thread.
//!
//! The first read of a thread seeds its baseline (live state when the
//! caller has it, configured defaults otherwise) and persists it, so every
//! later read agrees. Reads after that are served from memory.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use dashmap::DashMap;

use crate::config::ProtectionConfig;
use crate::db::ThreadStore;
use crate::transport::ThreadInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionTargets {
    pub name: String,
    pub theme: String,
}

/// Partial update; `None` leaves the field alone, empty strings are ignored.
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub theme: Option<String>,
}

/// What `save_snapshot` actually recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedBaseline {
    pub name: Option<String>,
    pub theme: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug)]
pub struct TargetStore {
    store: ThreadStore,
    default_name: String,
    default_theme: String,
    targets: DashMap<String, ProtectionTargets>,
    nicknames: DashMap<String, HashMap<String, String>>,
}

impl TargetStore {
    pub fn new(store: ThreadStore, cfg: &ProtectionConfig) -> Self {
        Self {
            store,
            default_name: cfg.default_name.clone(),
            default_theme: cfg.default_theme.clone(),
            targets: DashMap::new(),
            nicknames: DashMap::new(),
        }
    }

    /* ===== name / theme ===== */

    pub async fn get_protection_targets(
        &self,
        thread_id: &str,
        info: Option<&ThreadInfo>,
    ) -> Result<ProtectionTargets> {
        if let Some(cached) = self.targets.get(thread_id).map(|t| t.clone()) {
            return Ok(cached);
        }

        let mut settings = self.store.get_settings(thread_id).await?;
        let mut dirty = false;

        let name = match settings.protected_name.clone() {
            Some(n) => n,
            None => {
                let n = info
                    .map(|i| i.name.trim())
                    .filter(|n| !n.is_empty())
                    .unwrap_or(&self.default_name)
                    .to_string();
                settings.protected_name = Some(n.clone());
                dirty = true;
                n
            }
        };
        let theme = match settings.protected_theme.clone() {
            Some(t) => t,
            None => {
                let t = info
                    .and_then(|i| i.theme.as_deref())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(&self.default_theme)
                    .to_string();
                settings.protected_theme = Some(t.clone());
                dirty = true;
                t
            }
        };

        if dirty {
            self.store.set_settings(thread_id, &settings).await?;
            tracing::debug!(%thread_id, %name, %theme, "seeded protection baseline");
        }

        let targets = ProtectionTargets { name, theme };
        self.targets.insert(thread_id.to_string(), targets.clone());
        Ok(targets)
    }

    pub async fn update_protection_targets(
        &self,
        thread_id: &str,
        update: TargetUpdate,
    ) -> Result<ProtectionTargets> {
        let current = self.get_protection_targets(thread_id, None).await?;
        let name = update.name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let theme = update.theme.as_deref().map(str::trim).filter(|s| !s.is_empty());

        let next = ProtectionTargets {
            name: name.map(str::to_string).unwrap_or_else(|| current.name.clone()),
            theme: theme.map(str::to_string).unwrap_or_else(|| current.theme.clone()),
        };
        if next == current {
            return Ok(current);
        }

        let mut settings = self.store.get_settings(thread_id).await?;
        settings.protected_name = Some(next.name.clone());
        settings.protected_theme = Some(next.theme.clone());
        self.store.set_settings(thread_id, &settings).await?;
        self.targets.insert(thread_id.to_string(), next.clone());
        Ok(next)
    }

    /* ===== nicknames ===== */

    /// Baseline nicknames; the first read seeds from `seed` when storage has none.
    pub async fn get_protected_nicknames(
        &self,
        thread_id: &str,
        seed: Option<&HashMap<String, String>>,
    ) -> Result<HashMap<String, String>> {
        if let Some(cached) = self.nicknames.get(thread_id).map(|m| m.clone()) {
            return Ok(cached);
        }

        let mut settings = self.store.get_settings(thread_id).await?;
        let map: HashMap<String, String> = if !settings.protected_nicknames.is_empty() {
            settings.protected_nicknames.clone().into_iter().collect()
        } else if let Some(seed) = seed.filter(|s| !s.is_empty()) {
            settings.protected_nicknames = seed
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>();
            self.store.set_settings(thread_id, &settings).await?;
            seed.clone()
        } else {
            HashMap::new()
        };

        self.nicknames.insert(thread_id.to_string(), map.clone());
        Ok(map)
    }

    /// Record one participant's baseline; returns false when nothing changed.
    pub async fn set_protected_nickname(
        &self,
        thread_id: &str,
        participant_id: &str,
        nickname: &str,
    ) -> Result<bool> {
        let mut map = self.get_protected_nicknames(thread_id, None).await?;
        let nickname = nickname.trim();
        if map.get(participant_id).map(String::as_str) == Some(nickname) {
            return Ok(false);
        }
        map.insert(participant_id.to_string(), nickname.to_string());
        self.persist_nicknames(thread_id, map).await?;
        Ok(true)
    }

    pub async fn persist_nicknames(
        &self,
        thread_id: &str,
        map: HashMap<String, String>,
    ) -> Result<()> {
        let mut settings = self.store.get_settings(thread_id).await?;
        settings.protected_nicknames = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.store.set_settings(thread_id, &settings).await?;
        self.nicknames.insert(thread_id.to_string(), map);
        Ok(())
    }

    /* ===== photo ===== */

    /// Baseline photo URL; seeded from live info when absent.
    pub async fn get_protected_photo(
        &self,
        thread_id: &str,
        info: Option<&ThreadInfo>,
    ) -> Result<Option<String>> {
        let mut settings = self.store.get_settings(thread_id).await?;
        if settings.protected_photo.is_some() {
            return Ok(settings.protected_photo);
        }
        let seed = info
            .and_then(|i| i.image_url.as_deref())
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if let Some(url) = seed {
            settings.protected_photo = Some(url.to_string());
            self.store.set_settings(thread_id, &settings).await?;
        }
        Ok(settings.protected_photo)
    }

    pub async fn set_protected_photo(&self, thread_id: &str, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(());
        }
        let mut settings = self.store.get_settings(thread_id).await?;
        if settings.protected_photo.as_deref() == Some(url) {
            return Ok(());
        }
        settings.protected_photo = Some(url.to_string());
        self.store.set_settings(thread_id, &settings).await
    }

    pub async fn clear_protected_photo(&self, thread_id: &str) -> Result<()> {
        let mut settings = self.store.get_settings(thread_id).await?;
        if settings.protected_photo.take().is_some() {
            self.store.set_settings(thread_id, &settings).await?;
        }
        Ok(())
    }

    /* ===== explicit save ===== */

    /// Overwrite the baseline with the live state (the `savethread` command).
    pub async fn save_snapshot(&self, thread_id: &str, info: &ThreadInfo) -> Result<SavedBaseline> {
        let mut settings = self.store.get_settings(thread_id).await?;
        let mut saved = SavedBaseline::default();

        let name = info.name.trim();
        if !name.is_empty() {
            settings.protected_name = Some(name.to_string());
            saved.name = Some(name.to_string());
        }
        if let Some(theme) = info.theme.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            settings.protected_theme = Some(theme.to_string());
            saved.theme = Some(theme.to_string());
        }
        if let Some(url) = info.image_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            settings.protected_photo = Some(url.to_string());
            saved.photo = Some(url.to_string());
        }

        self.store.set_settings(thread_id, &settings).await?;
        self.targets.remove(thread_id);
        Ok(saved)
    }

    pub fn clear(&self, thread_id: &str) {
        self.targets.remove(thread_id);
        self.nicknames.remove(thread_id);
    }

    pub fn clear_all(&self) {
        self.targets.clear();
        self.nicknames.clear();
    }
}
