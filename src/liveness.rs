//! Liveness HTTP responder for hosting platforms that expect a bound port

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared between the bot and the HTTP handlers
#[derive(Debug, Clone)]
pub struct LivenessState {
    started_at: DateTime<Utc>,
    connected: Arc<AtomicBool>,
}

impl LivenessState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record whether the bot currently holds a live API connection
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected: bool,
    pub uptime_seconds: i64,
}

async fn root() -> &'static str {
    "deriv_trader is running"
}

async fn health(State(state): State<LivenessState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connected: state.is_connected(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

pub fn router(state: LivenessState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind the liveness port and serve in a background task
///
/// Returns the bound address, useful when `port` is 0.
pub async fn spawn(port: u16, state: LivenessState) -> std::io::Result<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Liveness endpoint listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state)).await {
            error!("Liveness server stopped: {}", e);
        }
    });
    Ok(local_addr)
}
