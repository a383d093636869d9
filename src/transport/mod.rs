//! Boundary to the Messenger chat transport.
//!
//! The unofficial Messenger client is callback based and lives outside this
//! crate. Everything here talks to it through [`ChatApi`], a uniform async
//! contract returning `Result`, so the protection logic never sees callbacks.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod bridge;
pub mod events;
pub mod info;
pub mod photo;

pub use bridge::HttpBridge;
pub use events::{AddedParticipant, Attachment, IncomingEvent, LogEvent, MessageEvent, ThreadChange};
pub use info::{ThreadInfo, UserInfo};
pub use photo::{HttpPhotoSource, PhotoSource};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("{action} rejected: {message}")]
    Rejected { action: &'static str, message: String },
    #[error("bridge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed bridge response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Messenger refuses title changes on one-to-one threads.
    pub fn is_single_user_chat(&self) -> bool {
        match self {
            TransportError::Rejected { message, .. } => {
                message.to_lowercase().contains("single-user chat")
            }
            _ => false,
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Actions the bot can take on Messenger, plus the lookups it needs.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// User id the bot is logged in as.
    fn current_user_id(&self) -> String;

    async fn send_message(&self, text: &str, thread_id: &str) -> TransportResult<()>;

    async fn set_title(&self, name: &str, thread_id: &str) -> TransportResult<()>;

    async fn change_thread_color(&self, _color: &str, _thread_id: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("changeThreadColor"))
    }

    async fn change_group_image(&self, _image: Vec<u8>, _thread_id: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("changeGroupImage"))
    }

    async fn change_nickname(
        &self,
        nickname: &str,
        thread_id: &str,
        user_id: &str,
    ) -> TransportResult<()>;

    async fn remove_user_from_group(&self, user_id: &str, thread_id: &str) -> TransportResult<()>;

    async fn get_thread_info(&self, thread_id: &str) -> TransportResult<ThreadInfo>;

    async fn get_user_info(&self, user_ids: &[String]) -> TransportResult<HashMap<String, UserInfo>>;
}

/// Display name for a user, falling back to `fallback` when unknown.
pub async fn display_name(api: &dyn ChatApi, user_id: &str, fallback: &str) -> String {
    match api.get_user_info(&[user_id.to_string()]).await {
        Ok(map) => map
            .get(user_id)
            .map(|u| u.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback.to_string()),
        Err(e) => {
            tracing::debug!(%user_id, error = %e, "getUserInfo failed");
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_user_chat_detection() {
        let e = TransportError::Rejected {
            action: "setTitle",
            message: "Cannot change title of a Single-User Chat".into(),
        };
        assert!(e.is_single_user_chat());
        assert!(!TransportError::Unsupported("setTitle").is_single_user_chat());
    }
}
