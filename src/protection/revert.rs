//! Corrective writes. Each returns whether the correction landed; failures
//! are logged here and never propagate, so callers only decide whether to
//! announce.

use crate::transport::{ChatApi, PhotoSource, TransportError};

use super::cooldown::RevertGuard;

fn log_failure(action: &str, thread_id: &str, e: &TransportError) {
    match e {
        TransportError::Unsupported(_) => {
            tracing::warn!(%thread_id, action, "transport cannot perform this correction")
        }
        e if e.is_single_user_chat() => {
            tracing::warn!(%thread_id, action, "thread is a one-to-one chat; skipping")
        }
        e => tracing::error!(%thread_id, action, error = %e, "correction failed"),
    }
}

pub async fn restore_name(api: &dyn ChatApi, thread_id: &str, name: &str) -> bool {
    match api.set_title(name, thread_id).await {
        Ok(()) => {
            tracing::info!(%thread_id, %name, "group name restored");
            true
        }
        Err(e) => {
            log_failure("setTitle", thread_id, &e);
            false
        }
    }
}

pub async fn restore_theme(api: &dyn ChatApi, thread_id: &str, theme: &str) -> bool {
    match api.change_thread_color(theme, thread_id).await {
        Ok(()) => {
            tracing::info!(%thread_id, %theme, "group theme restored");
            true
        }
        Err(e) => {
            log_failure("changeThreadColor", thread_id, &e);
            false
        }
    }
}

pub async fn restore_photo(
    api: &dyn ChatApi,
    photos: &dyn PhotoSource,
    thread_id: &str,
    url: &str,
) -> bool {
    let bytes = match photos.fetch(url).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(%thread_id, %url, error = %e, "could not load baseline photo");
            return false;
        }
    };
    match api.change_group_image(bytes, thread_id).await {
        Ok(()) => {
            tracing::info!(%thread_id, "group photo restored");
            true
        }
        Err(e) => {
            log_failure("changeGroupImage", thread_id, &e);
            false
        }
    }
}

/// Set a participant's nickname back, tracking the bot's own echo.
/// Returns false without calling out when a correction is already pending.
pub async fn restore_nickname(
    api: &dyn ChatApi,
    guard: &RevertGuard,
    thread_id: &str,
    participant_id: &str,
    nickname: &str,
) -> bool {
    let key = RevertGuard::key(thread_id, participant_id);
    if !guard.begin(&key, nickname) {
        tracing::debug!(%thread_id, %participant_id, "nickname correction already pending");
        return false;
    }
    match api.change_nickname(nickname, thread_id, participant_id).await {
        Ok(()) => {
            guard.complete(&key);
            tracing::info!(%thread_id, %participant_id, %nickname, "nickname restored");
            true
        }
        Err(e) => {
            guard.clear(&key);
            log_failure("changeNickname", thread_id, &e);
            false
        }
    }
}

/// Post a notice; a failed send is only logged.
pub async fn announce(api: &dyn ChatApi, thread_id: &str, text: &str) {
    if let Err(e) = api.send_message(text, thread_id).await {
        tracing::warn!(%thread_id, error = %e, "could not post notice");
    }
}
