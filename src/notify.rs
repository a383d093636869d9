//! Messages the bot posts into threads.

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━";

fn banner(brand: &str, body: &str) -> String {
    format!("{RULE}\n⚠️ {brand}\n{RULE}\n\n{body}\n\n{RULE}")
}

fn denied(brand: &str, body: &str) -> String {
    banner(brand, &format!("🚫 Action Denied!\n{body}"))
}

/* ===== unauthorized change reverted ===== */

pub fn name_denied(brand: &str, restored_to: &str) -> String {
    denied(
        brand,
        &format!(
            "Only group admins can change the group name.\n\n✅ Group name has been restored to:\n{restored_to}"
        ),
    )
}

pub fn theme_denied(brand: &str) -> String {
    denied(brand, "Only group admins can change the group theme.\n\n✅ Theme has been restored.")
}

pub fn photo_denied(brand: &str) -> String {
    denied(brand, "Only group admins can change the group photo.\n\n✅ Photo has been restored.")
}

pub fn nickname_denied(brand: &str, author: &str, target: &str) -> String {
    denied(
        brand,
        &format!(
            "@{author}, you can only change your own nickname, not {target}'s!\n\n✅ Nickname has been restored."
        ),
    )
}

/* ===== drift corrected during reconciliation ===== */

pub fn name_restored(brand: &str, restored_to: &str) -> String {
    banner(brand, &format!("✅ Group name has been restored to:\n{restored_to}"))
}

pub fn theme_restored(brand: &str) -> String {
    banner(brand, "✅ Group theme has been restored.")
}

pub fn photo_restored(brand: &str) -> String {
    banner(brand, "✅ Group photo has been restored.")
}

pub fn nicknames_restored(brand: &str, count: usize) -> String {
    if count == 1 {
        banner(brand, "✅ Nickname has been restored.")
    } else {
        banner(brand, &format!("✅ {count} nicknames have been restored."))
    }
}

/* ===== abuse ===== */

pub fn spam_removed(user: &str, repeats: u32, ban: chrono::Duration) -> String {
    format!(
        "🚫 Anti-spam: Removed user {user} for sending the same content {repeats} times. Temporary ban: {}.",
        human_duration(ban)
    )
}

pub fn auto_kick_permanent(full_name: &str, user_id: &str) -> String {
    format!("🚫 Auto-kick: User {full_name} ({user_id}) is permanently banned from this group.")
}

pub fn auto_kick_temporary(full_name: &str, user_id: &str, remaining: chrono::Duration) -> String {
    format!(
        "🚫 Auto-kick: User {full_name} ({user_id}) is temporarily banned from this group. Time remaining: {}.",
        human_duration(remaining)
    )
}

/// "1 hour", "59 minutes", "2 hours 5 minutes". Rounds up to whole minutes.
pub fn human_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let minutes = (secs + 59) / 60;
    let (h, m) = (minutes / 60, minutes % 60);
    let unit = |n: i64, one: &str, many: &str| format!("{n} {}", if n == 1 { one } else { many });
    match (h, m) {
        (0, 0) => "less than a minute".to_string(),
        (0, m) => unit(m, "minute", "minutes"),
        (h, 0) => unit(h, "hour", "hours"),
        (h, m) => format!("{} {}", unit(h, "hour", "hours"), unit(m, "minute", "minutes")),
    }
}
