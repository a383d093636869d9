#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use threadguard::config::Settings;
use threadguard::db;
use threadguard::transport::{
    ChatApi, IncomingEvent, LogEvent, MessageEvent, PhotoSource, ThreadInfo, TransportError,
    TransportResult, UserInfo,
};
use threadguard::AppContext;

pub const BOT: &str = "100";
pub const OWNER: &str = "1";
pub const BOT_ADMIN: &str = "2";
pub const GROUP_ADMIN: &str = "10";

/// Minimal PNG header; enough for format sniffing.
pub const PNG: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SendMessage { thread: String, text: String },
    SetTitle { thread: String, name: String },
    ChangeThreadColor { thread: String, color: String },
    ChangeGroupImage { thread: String, bytes: usize },
    ChangeNickname { thread: String, user: String, nickname: String },
    RemoveUser { thread: String, user: String },
    GetThreadInfo { thread: String },
    GetUserInfo,
}

/// Recording transport. Mutating calls also update the stored thread info,
/// so follow-up reads see the bot's own corrections.
pub struct MockApi {
    bot_id: String,
    threads: Mutex<HashMap<String, ThreadInfo>>,
    users: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    pub supports_theme: bool,
    pub supports_image: bool,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            bot_id: BOT.to_string(),
            threads: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            supports_theme: true,
            supports_image: true,
        }
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_thread(self, info: ThreadInfo) -> Self {
        self.put_thread(info).await;
        self
    }

    pub async fn put_thread(&self, info: ThreadInfo) {
        self.threads.lock().await.insert(info.thread_id.clone(), info);
    }

    pub async fn edit_thread(&self, thread: &str, f: impl FnOnce(&mut ThreadInfo)) {
        if let Some(info) = self.threads.lock().await.get_mut(thread) {
            f(info);
        }
    }

    pub async fn thread(&self, thread: &str) -> Option<ThreadInfo> {
        self.threads.lock().await.get(thread).cloned()
    }

    pub async fn name_user(&self, id: &str, name: &str) {
        self.users.lock().await.insert(id.to_string(), name.to_string());
    }

    pub async fn fail(&self, action: &'static str) {
        self.failing.lock().await.insert(action);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Calls that change something (lookups excluded).
    pub async fn actions(&self) -> Vec<Call> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c, Call::GetThreadInfo { .. } | Call::GetUserInfo))
            .collect()
    }

    pub async fn sent(&self, thread: &str) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::SendMessage { thread: t, text } if t == thread => Some(text),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    async fn check(&self, action: &'static str) -> TransportResult<()> {
        if self.failing.lock().await.contains(action) {
            return Err(TransportError::Rejected { action, message: "mock failure".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for MockApi {
    fn current_user_id(&self) -> String {
        self.bot_id.clone()
    }

    async fn send_message(&self, text: &str, thread_id: &str) -> TransportResult<()> {
        self.record(Call::SendMessage { thread: thread_id.into(), text: text.into() }).await;
        self.check("sendMessage").await
    }

    async fn set_title(&self, name: &str, thread_id: &str) -> TransportResult<()> {
        self.record(Call::SetTitle { thread: thread_id.into(), name: name.into() }).await;
        self.check("setTitle").await?;
        self.edit_thread(thread_id, |i| i.name = name.to_string()).await;
        Ok(())
    }

    async fn change_thread_color(&self, color: &str, thread_id: &str) -> TransportResult<()> {
        if !self.supports_theme {
            return Err(TransportError::Unsupported("changeThreadColor"));
        }
        self.record(Call::ChangeThreadColor { thread: thread_id.into(), color: color.into() }).await;
        self.check("changeThreadColor").await?;
        self.edit_thread(thread_id, |i| i.theme = Some(color.to_string())).await;
        Ok(())
    }

    async fn change_group_image(&self, image: Vec<u8>, thread_id: &str) -> TransportResult<()> {
        if !self.supports_image {
            return Err(TransportError::Unsupported("changeGroupImage"));
        }
        self.record(Call::ChangeGroupImage { thread: thread_id.into(), bytes: image.len() }).await;
        self.check("changeGroupImage").await
    }

    async fn change_nickname(
        &self,
        nickname: &str,
        thread_id: &str,
        user_id: &str,
    ) -> TransportResult<()> {
        self.record(Call::ChangeNickname {
            thread: thread_id.into(),
            user: user_id.into(),
            nickname: nickname.into(),
        })
        .await;
        self.check("changeNickname").await?;
        self.edit_thread(thread_id, |i| {
            i.nicknames.insert(user_id.to_string(), nickname.to_string());
        })
        .await;
        Ok(())
    }

    async fn remove_user_from_group(&self, user_id: &str, thread_id: &str) -> TransportResult<()> {
        self.record(Call::RemoveUser { thread: thread_id.into(), user: user_id.into() }).await;
        self.check("removeUserFromGroup").await?;
        self.edit_thread(thread_id, |i| i.participant_ids.retain(|p| p != user_id)).await;
        Ok(())
    }

    async fn get_thread_info(&self, thread_id: &str) -> TransportResult<ThreadInfo> {
        self.record(Call::GetThreadInfo { thread: thread_id.into() }).await;
        self.check("getThreadInfo").await?;
        self.thread(thread_id).await.ok_or_else(|| TransportError::Rejected {
            action: "getThreadInfo",
            message: "no such thread".into(),
        })
    }

    async fn get_user_info(&self, user_ids: &[String]) -> TransportResult<HashMap<String, UserInfo>> {
        self.record(Call::GetUserInfo).await;
        self.check("getUserInfo").await?;
        let users = self.users.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| users.get(id).map(|n| (id.clone(), UserInfo { name: n.clone() })))
            .collect())
    }
}

/// Serves PNG bytes for any url except ones containing "broken".
#[derive(Default)]
pub struct StubPhotos {
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl PhotoSource for StubPhotos {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.fetched.lock().await.push(url.to_string());
        if url.contains("broken") {
            anyhow::bail!("404 from cdn");
        }
        Ok(PNG.to_vec())
    }
}

pub fn settings() -> Settings {
    let mut s = Settings::defaults("test".into());
    s.app.name = "Guard".into();
    s.bot.owner_id = OWNER.into();
    s.bot.admin_ids = vec![BOT_ADMIN.into()];
    s
}

pub async fn app_with(settings: Settings) -> Arc<AppContext> {
    let pool = db::connect_in_memory().await.unwrap();
    db::migrate(&pool).await.unwrap();
    AppContext::new_testing(settings, pool, Arc::new(StubPhotos::default()))
}

pub async fn app() -> Arc<AppContext> {
    app_with(settings()).await
}

/// Group thread with `members` (plus the bot) and one group admin.
pub fn group(thread: &str, name: &str, members: &[&str]) -> ThreadInfo {
    let mut participant_ids: Vec<String> = members.iter().map(|m| m.to_string()).collect();
    participant_ids.push(BOT.into());
    participant_ids.push(GROUP_ADMIN.into());
    ThreadInfo {
        thread_id: thread.into(),
        name: name.into(),
        theme: Some("#FF0000".into()),
        image_url: None,
        nicknames: HashMap::new(),
        participant_ids,
        admin_ids: vec![GROUP_ADMIN.into()],
        is_group: Some(true),
        is_canonical_user: false,
    }
}

pub fn dm(thread: &str, other: &str) -> ThreadInfo {
    ThreadInfo {
        thread_id: thread.into(),
        participant_ids: vec![other.into(), BOT.into()],
        is_group: Some(false),
        is_canonical_user: true,
        ..Default::default()
    }
}

pub fn log(thread: &str, author: &str, kind: &str, data: Value) -> LogEvent {
    LogEvent {
        thread_id: thread.into(),
        author: author.into(),
        log_message_type: kind.into(),
        log_message_data: data,
    }
}

pub fn name_event(thread: &str, author: &str, name: &str) -> LogEvent {
    log(thread, author, "log:thread-name", json!({ "name": name }))
}

pub fn theme_event(thread: &str, author: &str, color: &str) -> LogEvent {
    log(thread, author, "log:thread-color", json!({ "theme_color": color }))
}

pub fn photo_event(thread: &str, author: &str, url: &str) -> LogEvent {
    log(thread, author, "log:thread-icon", json!({ "profile_picture": url }))
}

pub fn nickname_event(thread: &str, author: &str, participant: &str, nickname: &str) -> LogEvent {
    log(
        thread,
        author,
        "log:user-nickname",
        json!({ "participant_id": participant, "nickname": nickname }),
    )
}

pub fn join_event(thread: &str, added: &[(&str, &str)]) -> LogEvent {
    let added: Vec<Value> = added
        .iter()
        .map(|(id, name)| json!({ "userFbId": id, "fullName": name }))
        .collect();
    log(thread, GROUP_ADMIN, "log:subscribe", json!({ "addedParticipants": added }))
}

pub fn message(thread: &str, sender: &str, body: &str) -> MessageEvent {
    MessageEvent {
        thread_id: thread.into(),
        sender_id: sender.into(),
        body: body.into(),
        is_group: true,
        ..Default::default()
    }
}

pub fn incoming(msg: MessageEvent) -> IncomingEvent {
    IncomingEvent::Message(msg)
}
