use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

mod settings;

pub use settings::ThreadSettings;

pub type Db = Pool<Sqlite>;

pub async fn connect(url: &str, max: Option<u32>) -> Result<Db> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max.unwrap_or(5))
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory pool that never recycles its connection
/// (a new connection would be a new, empty database).
pub async fn connect_in_memory() -> Result<Db> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &Db) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Row of the `threads` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub name: String,
    pub prefix: String,
    pub banned_users: String,
    pub settings: Option<String>,
}

impl ThreadRecord {
    /// Permanent ban list; malformed JSON reads as empty.
    pub fn banned_list(&self) -> Vec<String> {
        match serde_json::from_str::<Vec<serde_json::Value>>(&self.banned_users) {
            Ok(list) => list
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(thread_id = %self.thread_id, error = %e, "malformed banned_users");
                Vec::new()
            }
        }
    }
}

/// Per-thread persistence: settings blob and permanent ban list.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    db: Db,
}

impl ThreadStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find-or-create the thread row.
    pub async fn get_data(&self, thread_id: &str) -> Result<ThreadRecord> {
        sqlx::query("INSERT INTO threads (thread_id) VALUES (?) ON CONFLICT(thread_id) DO NOTHING")
            .bind(thread_id)
            .execute(&self.db)
            .await?;
        let rec = sqlx::query_as::<_, ThreadRecord>(
            "SELECT thread_id, name, prefix, banned_users, settings FROM threads WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_one(&self.db)
        .await?;
        Ok(rec)
    }

    pub async fn get_settings(&self, thread_id: &str) -> Result<ThreadSettings> {
        let rec = self.get_data(thread_id).await?;
        Ok(ThreadSettings::parse(rec.settings.as_deref()))
    }

    pub async fn set_settings(&self, thread_id: &str, settings: &ThreadSettings) -> Result<()> {
        self.get_data(thread_id).await?;
        sqlx::query(
            "UPDATE threads SET settings = ?, updated_at = CURRENT_TIMESTAMP WHERE thread_id = ?",
        )
        .bind(settings.to_json())
        .bind(thread_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn banned_users(&self, thread_id: &str) -> Result<Vec<String>> {
        Ok(self.get_data(thread_id).await?.banned_list())
    }

    pub async fn set_banned_users(&self, thread_id: &str, users: &[String]) -> Result<()> {
        self.get_data(thread_id).await?;
        sqlx::query(
            "UPDATE threads SET banned_users = ?, updated_at = CURRENT_TIMESTAMP WHERE thread_id = ?",
        )
        .bind(serde_json::to_string(users)?)
        .bind(thread_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Every thread the bot has stored anything for.
    pub async fn list_thread_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT thread_id FROM threads ORDER BY thread_id")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
