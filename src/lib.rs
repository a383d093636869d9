// src/lib.rs

pub mod antispam;
pub mod bans;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod logging;
pub mod notify;
pub mod permissions;
pub mod protection;
pub mod server;
pub mod transport;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use config::Settings;
use db::{Db, ThreadStore};
use transport::{ChatApi, HttpBridge, HttpPhotoSource, PhotoSource};

const EVENT_QUEUE: usize = 1024;

/// Application context: settings, database and the services built on them.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub db: Db,
    pub store: ThreadStore,
    pub admins: permissions::GroupAdmins,
    protection: Arc<protection::Protection>,
    antispam: Arc<antispam::AntiSpam>,
    bans: Arc<bans::Bans>,
    commands: Arc<commands::Commands>,
}

impl AppContext {
    /// Logging, database + migrations, then the services.
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        logging::init(&settings);

        let db = db::connect(&settings.database.url, settings.database.max_connections).await?;
        db::migrate(&db).await?;

        let photos: Arc<dyn PhotoSource> = Arc::new(HttpPhotoSource::new()?);
        Ok(Self::assemble(settings, db, photos))
    }

    /// Context over an already migrated pool, with a caller-supplied photo source.
    pub fn new_testing(settings: Settings, db: Db, photos: Arc<dyn PhotoSource>) -> Arc<Self> {
        Self::assemble(settings, db, photos)
    }

    fn assemble(settings: Settings, db: Db, photos: Arc<dyn PhotoSource>) -> Arc<Self> {
        let settings = Arc::new(settings);
        let store = ThreadStore::new(db.clone());
        let admins = permissions::GroupAdmins::new();

        let protection = Arc::new(protection::Protection::new(
            settings.clone(),
            store.clone(),
            admins.clone(),
            photos,
        ));
        let bans = Arc::new(bans::Bans::new(settings.clone(), store.clone()));
        let antispam = Arc::new(antispam::AntiSpam::new(settings.clone(), bans.clone()));
        let commands = Arc::new(commands::Commands::new(
            settings.clone(),
            admins.clone(),
            protection.clone(),
            bans.clone(),
        ));

        Arc::new(Self {
            settings,
            db,
            store,
            admins,
            protection,
            antispam,
            bans,
            commands,
        })
    }

    pub fn protection(&self) -> Arc<protection::Protection> {
        self.protection.clone()
    }

    pub fn antispam(&self) -> Arc<antispam::AntiSpam> {
        self.antispam.clone()
    }

    pub fn bans(&self) -> Arc<bans::Bans> {
        self.bans.clone()
    }

    pub fn commands(&self) -> Arc<commands::Commands> {
        self.commands.clone()
    }

    /// The bot left or was removed from `thread_id`: drop what is cached
    /// for it. Persisted baselines and bans stay.
    pub async fn forget_thread(&self, thread_id: &str) {
        self.protection.clear(thread_id);
        self.admins.clear(thread_id).await;
        self.antispam.tracker().clear_thread(thread_id);
        tracing::info!(%thread_id, "bot removed from thread; caches dropped");
    }

    /// Drop every in-memory cache (baselines, nicknames, admin lists).
    pub fn clear_caches(&self) {
        self.protection.clear_all();
        self.admins.clear_all();
    }
}

/// Connect to the bridge, reconcile known threads, then serve events.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let api: Arc<dyn ChatApi> = Arc::new(HttpBridge::connect(&ctx.settings.bridge).await?);

    if ctx.settings.protection.reconcile_on_startup.unwrap_or(true) {
        let (ctx, api) = (ctx.clone(), api.clone());
        tokio::spawn(async move {
            ctx.protection()
                .reconcile_all(api.as_ref(), &ctx.store, false)
                .await;
        });
    }

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let dispatcher = dispatch::Dispatcher::new(ctx.clone(), api);
    tokio::spawn(dispatcher.run(rx));

    let addr: SocketAddr = ctx
        .settings
        .bridge
        .listen_addr
        .parse()
        .context("bridge.listen_addr")?;
    server::serve(addr, server::router(tx, ctx.settings.bridge.token.clone())).await
}
