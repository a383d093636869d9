//! HTTP ingest: the sidecar posts every Messenger event to `/events`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use crate::transport::IncomingEvent;

#[derive(Clone)]
struct Ingest {
    tx: mpsc::Sender<IncomingEvent>,
    token: Option<Arc<str>>,
}

impl Ingest {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        presented.as_bytes().ct_eq(expected.as_bytes()).into()
    }
}

pub fn router(tx: mpsc::Sender<IncomingEvent>, token: Option<String>) -> Router {
    let state = Ingest {
        tx,
        token: token.filter(|t| !t.is_empty()).map(Arc::from),
    };
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/events", post(ingest))
        .with_state(state)
}

async fn ingest(
    State(state): State<Ingest>,
    headers: HeaderMap,
    Json(event): Json<IncomingEvent>,
) -> StatusCode {
    if !state.authorized(&headers) {
        tracing::warn!("rejected event with bad or missing token");
        return StatusCode::UNAUTHORIZED;
    }
    if matches!(event, IncomingEvent::Other) {
        return StatusCode::ACCEPTED;
    }
    match state.tx.send(event).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            tracing::error!("dispatcher is gone; dropping event");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serve until ctrl-c.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "event ingest listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
