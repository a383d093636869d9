//! Prefix commands for group admins: `savethread`, `ban`, `unban`, `banlist`.

use std::sync::Arc;

use anyhow::Result;

use crate::bans::{now_ms, Bans};
use crate::config::Settings;
use crate::notify::human_duration;
use crate::permissions::{self, GroupAdmins, Permission};
use crate::protection::Protection;
use crate::transport::{ChatApi, MessageEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SaveThread,
    Ban { target: Option<String> },
    Unban { target: Option<String> },
    BanList,
}

impl Command {
    pub fn permission(&self) -> Permission {
        match self {
            Command::SaveThread => Permission::SaveThread,
            Command::Ban { .. } => Permission::Ban,
            Command::Unban { .. } => Permission::Unban,
            Command::BanList => Permission::BanList,
        }
    }
}

/// `!ban @Name` resolves through the mention map; bare ids pass through.
fn resolve_target(arg: Option<&str>, msg: &MessageEvent) -> Option<String> {
    let arg = arg?.trim();
    if arg.starts_with('@') {
        if let Some(id) = msg.mentions.keys().next() {
            return Some(id.clone());
        }
        let bare = arg.trim_start_matches('@');
        return bare.chars().all(|c| c.is_ascii_digit()).then(|| bare.to_string()).filter(|s| !s.is_empty());
    }
    (!arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit())).then(|| arg.to_string())
}

pub fn parse(prefix: &str, msg: &MessageEvent) -> Option<Command> {
    let rest = msg.body.trim().strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let name = words.next()?.to_lowercase();
    let arg = words.next();
    match name.as_str() {
        "savethread" => Some(Command::SaveThread),
        "ban" => Some(Command::Ban { target: resolve_target(arg, msg) }),
        "unban" => Some(Command::Unban { target: resolve_target(arg, msg) }),
        "banlist" => Some(Command::BanList),
        _ => None,
    }
}

pub struct Commands {
    settings: Arc<Settings>,
    admins: GroupAdmins,
    protection: Arc<Protection>,
    bans: Arc<Bans>,
}

impl Commands {
    pub fn new(
        settings: Arc<Settings>,
        admins: GroupAdmins,
        protection: Arc<Protection>,
        bans: Arc<Bans>,
    ) -> Self {
        Self { settings, admins, protection, bans }
    }

    /// Run the command in `msg`, if any. Returns what was recognised.
    pub async fn handle_message(&self, api: &dyn ChatApi, msg: &MessageEvent) -> Option<Command> {
        let cmd = parse(&self.settings.bot.prefix, msg)?;
        let thread_id = msg.thread_id.as_str();

        if !msg.is_group {
            self.reply(api, thread_id, "This command can only be used in groups!").await;
            return Some(cmd);
        }

        let role = permissions::resolve_role(&self.settings, &self.admins, api, &msg.sender_id, thread_id).await;
        if !permissions::role_has_permission(role, cmd.permission()) {
            tracing::info!(%thread_id, user_id = %msg.sender_id, ?cmd, ?role, "command denied");
            self.reply(api, thread_id, "🚫 Only group admins can use this command.").await;
            return Some(cmd);
        }

        let res = match &cmd {
            Command::SaveThread => self.save_thread(api, thread_id).await,
            Command::Ban { target } => self.ban(api, thread_id, target.as_deref()).await,
            Command::Unban { target } => self.unban(api, thread_id, target.as_deref()).await,
            Command::BanList => self.ban_list(api, thread_id).await,
        };
        if let Err(e) = res {
            tracing::error!(%thread_id, ?cmd, error = ?e, "command failed");
            self.reply(api, thread_id, "❌ Something went wrong. Try again later.").await;
        }
        Some(cmd)
    }

    async fn reply(&self, api: &dyn ChatApi, thread_id: &str, text: &str) {
        if let Err(e) = api.send_message(text, thread_id).await {
            tracing::warn!(%thread_id, error = %e, "could not send command reply");
        }
    }

    async fn save_thread(&self, api: &dyn ChatApi, thread_id: &str) -> Result<()> {
        let Some(info) = self.protection.refresh(api, thread_id).await else {
            self.reply(api, thread_id, "❌ Could not fetch thread info. Try again.").await;
            return Ok(());
        };
        let saved = self.protection.targets().save_snapshot(thread_id, &info).await?;
        self.protection.targets().clear(thread_id);

        let line = |saved: bool, icon: &str, what: &str| {
            format!("{icon} {what} {}", if saved { "saved" } else { "missing" })
        };
        let text = format!(
            "✅ Thread protection updated:\n{}\n{}\n{}",
            line(saved.name.is_some(), "📝", "Name"),
            line(saved.theme.is_some(), "🎨", "Theme"),
            line(saved.photo.is_some(), "🖼️", "Photo"),
        );
        tracing::info!(%thread_id, ?saved, "protection baseline saved");
        self.reply(api, thread_id, &text).await;
        Ok(())
    }

    async fn ban(&self, api: &dyn ChatApi, thread_id: &str, target: Option<&str>) -> Result<()> {
        let Some(user_id) = target else {
            self.reply(api, thread_id, "Please mention the user to ban or enter their user ID.").await;
            return Ok(());
        };
        if user_id == api.current_user_id() || self.settings.is_bot_admin(user_id) {
            self.reply(api, thread_id, "🚫 That user cannot be banned.").await;
            return Ok(());
        }

        let added = self.bans.add_permanent_ban(thread_id, user_id).await?;
        let text = match api.remove_user_from_group(user_id, thread_id).await {
            Ok(()) => format!("✅ Banned user {user_id} from this group."),
            Err(e) => {
                tracing::warn!(%thread_id, %user_id, error = %e, "ban: removal failed");
                format!("✅ User {user_id} is banned and will be removed if they rejoin. (Removal failed: {e})")
            }
        };
        if !added {
            tracing::debug!(%thread_id, %user_id, "user was already on the ban list");
        }
        self.reply(api, thread_id, &text).await;
        Ok(())
    }

    async fn unban(&self, api: &dyn ChatApi, thread_id: &str, target: Option<&str>) -> Result<()> {
        let Some(user_id) = target else {
            self.reply(api, thread_id, "Please enter the user ID to unban.").await;
            return Ok(());
        };
        let permanent = self.bans.remove_permanent_ban(thread_id, user_id).await?;
        let temporary = self.bans.lift_temp_ban(thread_id, user_id).await?;
        let text = if permanent || temporary {
            format!("✅ User {user_id} has been unbanned.")
        } else {
            format!("ℹ️ User {user_id} is not banned in this group.")
        };
        self.reply(api, thread_id, &text).await;
        Ok(())
    }

    async fn ban_list(&self, api: &dyn ChatApi, thread_id: &str) -> Result<()> {
        let permanent = self.bans.permanent_bans(thread_id).await?;
        let temp = self.bans.load_temp_bans(thread_id).await?;
        if permanent.is_empty() && temp.temp_bans.is_empty() {
            self.reply(api, thread_id, "✅ There are no banned members in this group.").await;
            return Ok(());
        }

        let mut ids: Vec<String> = permanent.clone();
        ids.extend(temp.temp_bans.keys().cloned());
        let names = match api.get_user_info(&ids).await {
            Ok(map) => map,
            Err(e) => {
                tracing::debug!(%thread_id, error = %e, "banlist: getUserInfo failed");
                Default::default()
            }
        };
        let label = |id: &str| {
            names
                .get(id)
                .map(|u| u.name.trim())
                .filter(|n| !n.is_empty())
                .unwrap_or(id)
                .to_string()
        };

        let mut lines = vec![format!("🚫 Banned members: {}", permanent.len())];
        for (i, id) in permanent.iter().enumerate() {
            lines.push(format!("{}. {} ({id})", i + 1, label(id)));
        }
        if !temp.temp_bans.is_empty() {
            lines.push(format!("⏳ Temporarily banned: {}", temp.temp_bans.len()));
            let now = now_ms();
            for (i, (id, until)) in temp.temp_bans.iter().enumerate() {
                let left = human_duration(chrono::Duration::milliseconds(until - now));
                lines.push(format!("{}. {} ({id}) - {left} left", i + 1, label(id)));
            }
        }
        lines.push(format!("Use {}unban <userID> to remove a user.", self.settings.bot.prefix));
        self.reply(api, thread_id, &lines.join("\n")).await;
        Ok(())
    }
}
