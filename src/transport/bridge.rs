//! [`ChatApi`] over HTTP to the sidecar that owns the Messenger session.
//!
//! Every action is `POST {base_url}/api/{action}` with a JSON body; the
//! sidecar answers `{"ok": bool, "data": ..., "error": "..."}`. Calls are
//! throttled so bursts of reverts do not trip Messenger's rate limits.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::events::id_from_value;
use super::{ChatApi, ThreadInfo, TransportError, TransportResult, UserInfo};
use crate::config;

#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    data: Value,
    error: Option<String>,
}

pub struct HttpBridge {
    http: Client,
    base: Url,
    token: Option<String>,
    limiter: DefaultDirectRateLimiter,
    bot_id: String,
}

impl HttpBridge {
    /// Build the client and ask the sidecar who we are logged in as.
    pub async fn connect(cfg: &config::Bridge) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.unwrap_or(15)))
            .build()?;
        let mut base = Url::parse(&cfg.base_url).context("bridge.base_url")?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let period = Duration::from_millis(cfg.min_delay_ms.unwrap_or(100).max(1));
        let quota = Quota::with_period(period).context("bridge.min_delay_ms")?;

        let mut bridge = Self {
            http,
            base,
            token: cfg.token.clone(),
            limiter: RateLimiter::direct(quota),
            bot_id: String::new(),
        };
        let me = bridge.call("getCurrentUserID", json!({})).await?;
        bridge.bot_id = id_from_value(&me);
        if bridge.bot_id.is_empty() {
            anyhow::bail!("bridge returned an empty current user id");
        }
        tracing::info!(bot_id = %bridge.bot_id, base = %bridge.base, "bridge connected");
        Ok(bridge)
    }

    fn request(&self, action: &'static str) -> TransportResult<RequestBuilder> {
        let url = self
            .base
            .join(&format!("api/{action}"))
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let mut req = self.http.post(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn send(&self, action: &'static str, req: RequestBuilder) -> TransportResult<Value> {
        self.limiter.until_ready().await;
        let reply: BridgeReply = req.send().await?.error_for_status()?.json().await?;
        if reply.ok {
            return Ok(reply.data);
        }
        let message = reply.error.unwrap_or_else(|| "unknown error".into());
        if message.eq_ignore_ascii_case("unsupported") {
            return Err(TransportError::Unsupported(action));
        }
        Err(TransportError::Rejected { action, message })
    }

    async fn call(&self, action: &'static str, body: Value) -> TransportResult<Value> {
        let req = self.request(action)?.json(&body);
        self.send(action, req).await
    }
}

#[async_trait]
impl ChatApi for HttpBridge {
    fn current_user_id(&self) -> String {
        self.bot_id.clone()
    }

    async fn send_message(&self, text: &str, thread_id: &str) -> TransportResult<()> {
        self.call("sendMessage", json!({ "body": text, "threadID": thread_id }))
            .await
            .map(drop)
    }

    async fn set_title(&self, name: &str, thread_id: &str) -> TransportResult<()> {
        self.call("setTitle", json!({ "title": name, "threadID": thread_id }))
            .await
            .map(drop)
    }

    async fn change_thread_color(&self, color: &str, thread_id: &str) -> TransportResult<()> {
        self.call("changeThreadColor", json!({ "color": color, "threadID": thread_id }))
            .await
            .map(drop)
    }

    async fn change_group_image(&self, image: Vec<u8>, thread_id: &str) -> TransportResult<()> {
        let form = Form::new()
            .text("threadID", thread_id.to_string())
            .part("image", Part::bytes(image).file_name("group.jpg"));
        let req = self.request("changeGroupImage")?.multipart(form);
        self.send("changeGroupImage", req).await.map(drop)
    }

    async fn change_nickname(
        &self,
        nickname: &str,
        thread_id: &str,
        user_id: &str,
    ) -> TransportResult<()> {
        self.call(
            "changeNickname",
            json!({ "nickname": nickname, "threadID": thread_id, "participantID": user_id }),
        )
        .await
        .map(drop)
    }

    async fn remove_user_from_group(&self, user_id: &str, thread_id: &str) -> TransportResult<()> {
        self.call("removeUserFromGroup", json!({ "userID": user_id, "threadID": thread_id }))
            .await
            .map(drop)
    }

    async fn get_thread_info(&self, thread_id: &str) -> TransportResult<ThreadInfo> {
        let data = self.call("getThreadInfo", json!({ "threadID": thread_id })).await?;
        if !data.is_object() {
            return Err(TransportError::Decode("getThreadInfo returned no object".into()));
        }
        let mut info = ThreadInfo::from_value(&data);
        if info.thread_id.is_empty() {
            info.thread_id = thread_id.to_string();
        }
        Ok(info)
    }

    async fn get_user_info(&self, user_ids: &[String]) -> TransportResult<HashMap<String, UserInfo>> {
        let data = self.call("getUserInfo", json!({ "ids": user_ids })).await?;
        serde_json::from_value(data).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
