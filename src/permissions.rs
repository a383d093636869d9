use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use once_cell::sync::Lazy;

use crate::config::Settings;
use crate::transport::ChatApi;

const ADMIN_LIST_TTL: Duration = Duration::from_secs(5 * 60);

/// Ordered: a higher role can do everything a lower one can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Member,
    GroupAdmin,
    BotAdmin,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    SaveThread,
    Ban,
    Unban,
    BanList,
}

pub static PERMISSIONS: Lazy<HashMap<Permission, Vec<Role>>> = Lazy::new(|| {
    use Permission::*;
    use Role::*;
    HashMap::from([
        (SaveThread, vec![GroupAdmin, BotAdmin, Owner]),
        (Ban, vec![GroupAdmin, BotAdmin, Owner]),
        (Unban, vec![GroupAdmin, BotAdmin, Owner]),
        (BanList, vec![GroupAdmin, BotAdmin, Owner]),
    ])
});

pub fn role_has_permission(role: Role, permission: Permission) -> bool {
    PERMISSIONS
        .get(&permission)
        .map(|roles| roles.contains(&role))
        .unwrap_or(false)
}

/// Group admin lists per thread, refreshed at most every five minutes.
#[derive(Clone)]
pub struct GroupAdmins {
    cache: Cache<String, Arc<Vec<String>>>,
}

impl GroupAdmins {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .time_to_live(ADMIN_LIST_TTL)
                .max_capacity(10_000)
                .build(),
        }
    }

    /// A failed lookup counts as "not an admin" and is not cached.
    pub async fn is_group_admin(&self, api: &dyn ChatApi, user_id: &str, thread_id: &str) -> bool {
        if let Some(admins) = self.cache.get(thread_id).await {
            return admins.iter().any(|id| id == user_id);
        }
        match api.get_thread_info(thread_id).await {
            Ok(info) => {
                let hit = info.is_admin(user_id);
                self.cache
                    .insert(thread_id.to_string(), Arc::new(info.admin_ids))
                    .await;
                hit
            }
            Err(e) => {
                tracing::debug!(%thread_id, error = %e, "admin lookup failed");
                false
            }
        }
    }

    pub async fn clear(&self, thread_id: &str) {
        self.cache.invalidate(thread_id).await;
    }

    pub fn clear_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for GroupAdmins {
    fn default() -> Self {
        Self::new()
    }
}

/// Highest role `user_id` holds in `thread_id`.
pub async fn resolve_role(
    settings: &Settings,
    admins: &GroupAdmins,
    api: &dyn ChatApi,
    user_id: &str,
    thread_id: &str,
) -> Role {
    if settings.is_owner(user_id) {
        Role::Owner
    } else if settings.is_bot_admin(user_id) {
        Role::BotAdmin
    } else if admins.is_group_admin(api, user_id, thread_id).await {
        Role::GroupAdmin
    } else {
        Role::Member
    }
}
