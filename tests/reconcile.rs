mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use threadguard::db::ThreadSettings;
use threadguard::AppContext;

const PHOTO: &str = "https://cdn.example/v/t1/base.jpg";

/// Seed "t1" as Alpha / #FF0000 / base photo / Bob, then let it drift while
/// the bot is "offline" (caches dropped).
async fn drifted() -> (MockApi, Arc<AppContext>) {
    let mut info = group("t1", "Alpha", &["20", "21"]);
    info.image_url = Some(PHOTO.into());
    info.nicknames = HashMap::from([("20".to_string(), "Bob".to_string())]);
    let api = MockApi::new().with_thread(info).await;
    let app = app().await;
    app.protection().warm(&api, "t1").await;

    api.edit_thread("t1", |i| {
        i.name = "Hijacked".into();
        i.theme = Some("#00FF00".into());
        i.image_url = Some("https://cdn.example/v/t1/other.jpg".into());
        i.nicknames.insert("20".into(), "Clown".into());
        i.nicknames.insert("21".into(), "Newbie".into());
    })
    .await;
    app.clear_caches();
    api.clear_calls().await;
    (api, app)
}

#[tokio::test]
async fn startup_pass_corrects_every_kind_of_drift_quietly() {
    let (api, app) = drifted().await;

    let corrected = app.protection().reconcile_all(&api, &app.store, false).await;
    assert_eq!(corrected, 1);

    let actions = api.actions().await;
    assert!(actions.contains(&Call::SetTitle { thread: "t1".into(), name: "Alpha".into() }));
    assert!(actions.contains(&Call::ChangeThreadColor { thread: "t1".into(), color: "#FF0000".into() }));
    assert!(actions.contains(&Call::ChangeNickname {
        thread: "t1".into(),
        user: "20".into(),
        nickname: "Bob".into()
    }));
    assert!(actions.contains(&Call::ChangeGroupImage { thread: "t1".into(), bytes: PNG.len() }));
    assert!(api.sent("t1").await.is_empty());

    // the newcomer keeps their nickname and joins the baseline
    assert!(!actions.iter().any(|c| matches!(c, Call::ChangeNickname { user, .. } if user == "21")));
    let stored = app.store.get_settings("t1").await.unwrap();
    assert_eq!(stored.protected_nicknames["21"], "Newbie");
}

#[tokio::test]
async fn reconcile_thread_with_notify_announces_each_fix() {
    let (api, app) = drifted().await;
    let info = api.thread("t1").await.unwrap();

    let report = app.protection().reconcile_thread(&api, "t1", &info, true).await;
    assert!(report.name_restored && report.theme_restored && report.photo_restored);
    assert_eq!(report.nicknames_restored, 1);

    let sent = api.sent("t1").await;
    assert_eq!(sent.len(), 4);
    assert!(sent.iter().any(|m| m.contains("Alpha")));
    assert!(sent.iter().any(|m| m.contains("Nickname has been restored.")));
}

#[tokio::test]
async fn settled_thread_needs_no_work() {
    let (api, app) = drifted().await;
    app.protection().reconcile_all(&api, &app.store, false).await;
    app.clear_caches();
    api.clear_calls().await;

    // image_url in the mock is untouched by uploads, so line it up by hand
    api.edit_thread("t1", |i| i.image_url = Some(PHOTO.into())).await;
    let corrected = app.protection().reconcile_all(&api, &app.store, false).await;
    assert_eq!(corrected, 0);
    assert!(api.actions().await.is_empty());
}

#[tokio::test]
async fn direct_and_unreachable_threads_are_skipped() {
    let api = MockApi::new().with_thread(dm("d1", "20")).await;
    let app = app().await;
    let mut s = ThreadSettings::default();
    s.protected_name = Some("Alpha".into());
    app.store.set_settings("d1", &s).await.unwrap();
    app.store.set_settings("gone", &s).await.unwrap();

    let corrected = app.protection().reconcile_all(&api, &app.store, true).await;
    assert_eq!(corrected, 0);
    assert!(api.actions().await.is_empty());
}

#[tokio::test]
async fn exempt_thread_is_not_reconciled() {
    let api = MockApi::new().with_thread(group("t1", "Staff GC", &["20"])).await;
    let app = app().await;
    app.protection().warm(&api, "t1").await;
    api.edit_thread("t1", |i| i.theme = Some("#00FF00".into())).await;
    app.clear_caches();
    api.clear_calls().await;

    assert_eq!(app.protection().reconcile_all(&api, &app.store, false).await, 0);
    assert!(api.actions().await.is_empty());
}

#[tokio::test]
async fn first_sight_reconciles_once() {
    let (api, app) = drifted().await;

    app.protection().first_sight(&api, "t1").await;
    assert!(api.actions().await.contains(&Call::SetTitle { thread: "t1".into(), name: "Alpha".into() }));
    assert!(api.sent("t1").await.is_empty());

    api.clear_calls().await;
    app.protection().first_sight(&api, "t1").await;
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn failed_correction_is_not_counted() {
    let (api, app) = drifted().await;
    for action in ["setTitle", "changeThreadColor", "changeNickname", "changeGroupImage"] {
        api.fail(action).await;
    }
    let info = api.thread("t1").await.unwrap();
    let report = app.protection().reconcile_thread(&api, "t1", &info, true).await;
    assert!(!report.any());
    assert!(api.sent("t1").await.is_empty());
}
