use anyhow::Result;
use serde::{Deserialize, Serialize};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub bot: Bot,
    pub bridge: Bridge,
    pub database: Database,
    pub logging: Logging,
    #[serde(default)]
    pub protection: ProtectionConfig,
    #[serde(default)]
    pub antispam: AntiSpamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bot {
    /// Facebook user id of the owner; empty disables owner checks.
    pub owner_id: String,
    #[serde(default)]
    pub admin_ids: Vec<String>,
    pub prefix: String,
    /// Nickname the bot gives itself when added to a group.
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bridge {
    pub base_url: String,
    pub listen_addr: String,
    pub token: Option<String>,
    pub min_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub json: Option<bool>,
    pub level: Option<String>,
}

pub const DEFAULT_GROUP_NAME: &str = "Protected Group";
pub const DEFAULT_THEME: &str = "#0084ff";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtectionConfig {
    pub default_name: String,
    pub default_theme: String,
    #[serde(default)]
    pub exempt_keywords: Vec<String>,
    #[serde(default)]
    pub exempt_threads: Vec<String>,
    pub cooldown_ms: Option<u64>,
    pub reconcile_on_startup: Option<bool>,
    pub reconcile_concurrency: Option<usize>,
    /// How long a thread's group/direct classification is trusted.
    pub group_kind_ttl_ms: Option<u64>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            default_name: DEFAULT_GROUP_NAME.into(),
            default_theme: DEFAULT_THEME.into(),
            exempt_keywords: ["staff", "staff's", "staffs", "staff gc", "staffs gc"]
                .into_iter()
                .map(String::from)
                .collect(),
            exempt_threads: vec![],
            cooldown_ms: None,
            reconcile_on_startup: None,
            reconcile_concurrency: None,
            group_kind_ttl_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AntiSpamConfig {
    pub threshold: Option<u32>,
    pub ban_minutes: Option<u64>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env = std::env::var("THREADGUARD_ENV").unwrap_or_else(|_| "development".to_string());

        // .env.<env> first, then .env
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        let defaults = Self::defaults(env.clone());

        // defaults -> config/<env>.toml -> THREADGUARD_* (THREADGUARD_BOT__OWNER_ID => bot.owner_id)
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            .merge(Env::prefixed("THREADGUARD_").split("__"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        if s.database.max_connections.is_none() {
            s.database.max_connections = Some(5);
        }

        Ok(s)
    }

    pub fn defaults(env: String) -> Self {
        Self {
            env,
            app: App {
                name: "ThreadGuard Security".into(),
            },
            bot: Bot {
                owner_id: String::new(),
                admin_ids: vec![],
                prefix: "!".into(),
                nickname: None,
            },
            bridge: Bridge {
                base_url: "http://127.0.0.1:3000".into(),
                listen_addr: "127.0.0.1:8088".into(),
                token: None,
                min_delay_ms: Some(100),
                timeout_secs: Some(15),
            },
            database: Database {
                url: "sqlite://data/threadguard.db".into(),
                max_connections: Some(5),
            },
            logging: Logging {
                json: Some(false),
                level: Some("info".into()),
            },
            protection: ProtectionConfig::default(),
            antispam: AntiSpamConfig::default(),
        }
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        !self.bot.owner_id.is_empty() && self.bot.owner_id == user_id
    }

    /// Owner counts as a bot admin.
    pub fn is_bot_admin(&self, user_id: &str) -> bool {
        self.is_owner(user_id) || self.bot.admin_ids.iter().any(|id| id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_also_admin() {
        let mut s = Settings::defaults("test".into());
        s.bot.owner_id = "100".into();
        s.bot.admin_ids = vec!["200".into()];
        assert!(s.is_owner("100"));
        assert!(s.is_bot_admin("100"));
        assert!(s.is_bot_admin("200"));
        assert!(!s.is_owner("200"));
        assert!(!s.is_bot_admin("300"));
    }

    #[test]
    fn empty_owner_matches_nobody() {
        let s = Settings::defaults("test".into());
        assert!(!s.is_owner(""));
        assert!(!s.is_bot_admin(""));
    }

    #[test]
    fn defaults_carry_staff_keywords() {
        let p = ProtectionConfig::default();
        assert!(p.exempt_keywords.iter().any(|k| k == "staff gc"));
        assert_eq!(p.default_theme, DEFAULT_THEME);
    }
}
