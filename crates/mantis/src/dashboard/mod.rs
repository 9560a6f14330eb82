// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard backend: the HTTP API, the WebSocket broadcaster, and the auth
//! middleware in front of both.

pub mod auth;
pub mod handlers;
pub mod ws;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::middleware;
use axum::response::Html;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::config::DashboardConfig;
use crate::geo::GeoLocator;
use crate::orchestrator::Orchestrator;
use crate::storage::Storage;

/// Embedded dashboard pages.
const DASHBOARD_HTML: &str = include_str!("../../web/dashboard.html");
const LOGIN_HTML: &str = include_str!("../../web/login.html");

pub struct DashboardState {
    pub storage: Arc<Storage>,
    pub geo: Arc<GeoLocator>,
    pub orchestrator: Arc<Orchestrator>,
    pub auth_token: Option<String>,
    /// Pre-encoded JSON frames for non-storage broadcasts (`config_change`,
    /// `ip_blocked`, `ip_unblocked`, `database_reset`).
    pub control_tx: broadcast::Sender<String>,
    pub blocked_ips: Mutex<BTreeSet<String>>,
    pub iptables_available: bool,
}

impl DashboardState {
    pub fn new(orchestrator: Arc<Orchestrator>, auth_token: Option<String>) -> Arc<Self> {
        let (control_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            storage: Arc::clone(&orchestrator.storage),
            geo: Arc::clone(&orchestrator.geo),
            orchestrator,
            auth_token,
            control_tx,
            blocked_ips: Mutex::new(BTreeSet::new()),
            iptables_available: handlers::iptables_available(),
        })
    }

    /// Broadcast a control frame to every connected WebSocket client.
    pub fn broadcast_control(&self, frame: &serde_json::Value) {
        let _ = self.control_tx.send(frame.to_string());
    }

    pub fn lock_blocked(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        match self.blocked_ips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Build the axum `Router` with every dashboard route.
pub fn build_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        // Static pages
        .route("/", get(|| async { Html(DASHBOARD_HTML) }))
        .route("/login", get(|| async { Html(LOGIN_HTML) }))
        // Auth + live stream
        .route("/api/auth", post(handlers::authenticate))
        .route("/ws", get(ws::ws_handler))
        // Queries
        .route("/api/stats", get(handlers::stats))
        .route("/api/events", get(handlers::events))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/alerts", get(handlers::alerts))
        .route("/api/geo/{ip}", get(handlers::geo_lookup))
        .route("/api/map", get(handlers::map_data))
        .route("/api/ips", get(handlers::unique_ips))
        .route("/api/sessions/{id}/events", get(handlers::session_events))
        .route("/api/attackers", get(handlers::attackers))
        .route("/api/payloads/stats", get(handlers::payload_stats))
        .route("/api/export", get(handlers::export))
        // Mutations
        .route("/api/alerts/{id}/ack", post(handlers::acknowledge_alert))
        .route("/api/config", get(handlers::get_config))
        .route("/api/config/service/{name}", put(handlers::update_service_config))
        .route("/api/database/reset", post(handlers::database_reset))
        // Firewall
        .route("/api/firewall/blocked", get(handlers::blocked_ips))
        .route("/api/firewall/block", post(handlers::block_ip))
        .route("/api/firewall/unblock", post(handlers::unblock_ip))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A running dashboard server.
pub struct DashboardHandle {
    pub addr: SocketAddr,
    pub state: Arc<DashboardState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DashboardHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        tracing::info!("dashboard stopped");
    }
}

/// Bind and serve the dashboard until cancellation.
pub async fn start(
    orchestrator: Arc<Orchestrator>,
    config: &DashboardConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<DashboardHandle> {
    let state = DashboardState::new(orchestrator, config.auth_token.clone());
    let router = build_router(Arc::clone(&state));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "dashboard listening");

    let cancel = shutdown.child_token();
    let cancel_for_serve = cancel.clone();
    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(cancel_for_serve.cancelled_owned());
        if let Err(e) = serve.await {
            tracing::error!(err = %e, "dashboard server error");
        }
    });

    Ok(DashboardHandle { addr, state, cancel, task })
}
