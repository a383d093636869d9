mod common;

use std::sync::Arc;

use common::*;
use threadguard::AppContext;

const BASE: &str = "https://scontent.xx.fbcdn.net/v/t1/base_n.jpg?oh=1&oe=2";

async fn setup(photo: &str) -> (MockApi, Arc<AppContext>) {
    let mut info = group("t1", "Alpha", &["20", "21"]);
    info.image_url = Some(photo.to_string());
    let api = MockApi::new().with_thread(info).await;
    let app = app().await;
    app.protection().warm(&api, "t1").await;
    api.clear_calls().await;
    (api, app)
}

#[tokio::test]
async fn first_sight_records_live_photo_as_baseline() {
    let (_api, app) = setup(BASE).await;
    let stored = app.store.get_settings("t1").await.unwrap();
    assert_eq!(stored.protected_photo.as_deref(), Some(BASE));
}

#[tokio::test]
async fn unauthorized_photo_is_reuploaded() {
    let (api, app) = setup(BASE).await;
    app.protection()
        .handle_event(&api, &photo_event("t1", "20", "https://cdn.example/evil.jpg"))
        .await;

    let actions = api.actions().await;
    assert_eq!(actions[0], Call::ChangeGroupImage { thread: "t1".into(), bytes: PNG.len() });
    let sent = api.sent("t1").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Only group admins can change the group photo."));
}

#[tokio::test]
async fn rotated_cdn_signature_is_not_a_change() {
    let (api, app) = setup(BASE).await;
    let same = "https://scontent-b.xx.fbcdn.net/v/t1/base_n.jpg?oh=9&oe=9";
    app.protection().handle_event(&api, &photo_event("t1", "20", same)).await;
    assert!(api.actions().await.is_empty());
}

#[tokio::test]
async fn bot_upload_refreshes_baseline_url() {
    let (api, app) = setup(BASE).await;
    let fresh = "https://scontent.xx.fbcdn.net/v/t1/reupload_n.jpg";
    app.protection().handle_event(&api, &photo_event("t1", BOT, fresh)).await;

    assert!(api.actions().await.is_empty());
    let stored = app.store.get_settings("t1").await.unwrap();
    assert_eq!(stored.protected_photo.as_deref(), Some(fresh));
}

#[tokio::test]
async fn admin_photo_change_is_kept() {
    let (api, app) = setup(BASE).await;
    let new = "https://cdn.example/new.jpg";
    app.protection().handle_event(&api, &photo_event("t1", GROUP_ADMIN, new)).await;

    assert!(api.actions().await.is_empty());
    let stored = app.store.get_settings("t1").await.unwrap();
    assert_eq!(stored.protected_photo.as_deref(), Some(new));
}

#[tokio::test]
async fn unreachable_baseline_photo_means_no_notice() {
    let (api, app) = setup("https://cdn.example/broken.jpg").await;
    app.protection()
        .handle_event(&api, &photo_event("t1", "20", "https://cdn.example/evil.jpg"))
        .await;
    assert!(api.actions().await.is_empty());
}

#[tokio::test]
async fn unsupported_upload_means_no_notice() {
    let mut info = group("t1", "Alpha", &["20", "21"]);
    info.image_url = Some(BASE.into());
    let mut api = MockApi::new().with_thread(info).await;
    api.supports_image = false;
    let app = app().await;
    app.protection().warm(&api, "t1").await;

    app.protection()
        .handle_event(&api, &photo_event("t1", "20", "https://cdn.example/evil.jpg"))
        .await;
    assert!(api.sent("t1").await.is_empty());
}

#[tokio::test]
async fn no_baseline_photo_means_nothing_to_restore() {
    let api = MockApi::new().with_thread(group("t1", "Alpha", &["20", "21"])).await;
    let app = app().await;
    app.protection().warm(&api, "t1").await;
    api.clear_calls().await;

    app.protection()
        .handle_event(&api, &photo_event("t1", "20", "https://cdn.example/evil.jpg"))
        .await;
    assert!(api.actions().await.is_empty());
}
