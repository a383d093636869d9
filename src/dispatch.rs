use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::transport::{ChatApi, IncomingEvent, ThreadChange};
use crate::AppContext;

/// Fans incoming events out to the handlers, one task per event.
#[derive(Clone)]
pub struct Dispatcher {
    app: Arc<AppContext>,
    api: Arc<dyn ChatApi>,
}

impl Dispatcher {
    pub fn new(app: Arc<AppContext>, api: Arc<dyn ChatApi>) -> Self {
        Self { app, api }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<IncomingEvent>) {
        while let Some(event) = rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move { this.dispatch(event).await });
        }
        tracing::info!("event channel closed; dispatcher stopping");
    }

    /// Handle one event; a panicking handler is logged and contained.
    pub async fn dispatch(&self, event: IncomingEvent) {
        let thread_id = event.thread_id().unwrap_or_default().to_string();
        let result = AssertUnwindSafe(self.route(&event)).catch_unwind().await;
        if result.is_err() {
            tracing::error!(%thread_id, "event handler panicked");
        }
    }

    async fn route(&self, event: &IncomingEvent) {
        let api = self.api.as_ref();
        self.app.antispam().handle_any_event(api, event).await;

        match event {
            IncomingEvent::Message(msg) => {
                if msg.is_group {
                    self.app.protection().first_sight(api, &msg.thread_id).await;
                }
                self.app.commands().handle_message(api, msg).await;
            }
            IncomingEvent::Event(log) => {
                if let ThreadChange::Unsubscribe { left } = log.change() {
                    if left == api.current_user_id() {
                        self.app.forget_thread(&log.thread_id).await;
                        return;
                    }
                }
                self.app.protection().handle_event(api, log).await;
                self.app.bans().handle_event(api, log).await;
            }
            IncomingEvent::Other => {}
        }
    }
}
