// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers for the dashboard API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::dashboard::{auth, DashboardState};
use crate::error::ApiError;
use crate::storage::{EventQuery, SessionQuery};

const MAX_PAGE: i64 = 1000;

fn internal(e: impl std::fmt::Display) -> Response {
    ApiError::Internal.to_response(e.to_string()).into_response()
}

// -- Auth ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub token: String,
}

/// `POST /api/auth` — exchange the operator token for the session cookie
/// (HttpOnly, SameSite=Strict, 7 days).
pub async fn authenticate(
    State(state): State<Arc<DashboardState>>,
    Json(req): Json<AuthRequest>,
) -> Response {
    let Some(ref expected) = state.auth_token else {
        return Json(json!({"status": "ok"})).into_response();
    };
    if !auth::constant_time_eq(&req.token, expected) {
        return ApiError::Forbidden.to_response("invalid token").into_response();
    }
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Max-Age={}; Path=/",
        auth::TOKEN_COOKIE,
        req.token,
        7 * 86400,
    );
    ([(header::SET_COOKIE, cookie)], Json(json!({"status": "ok"}))).into_response()
}

// -- Queries ------------------------------------------------------------------

pub async fn stats(State(state): State<Arc<DashboardState>>) -> Response {
    match state.storage.get_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub service: Option<String>,
    pub services: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub types: Option<String>,
    pub ip: Option<String>,
    pub search: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub paginated: Option<String>,
}

fn csv_list(raw: &Option<String>) -> Option<Vec<String>> {
    raw.as_ref().map(|s| s.split(',').map(|part| part.trim().to_owned()).collect())
}

fn truthy(raw: &Option<String>) -> bool {
    matches!(raw.as_deref(), Some("1") | Some("true") | Some("yes"))
}

pub async fn events(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<EventsParams>,
) -> Response {
    let query = EventQuery {
        limit: params.limit.unwrap_or(100).min(MAX_PAGE),
        offset: params.offset.unwrap_or(0),
        service: params.service.clone(),
        services: csv_list(&params.services),
        event_type: params.event_type.clone(),
        event_types: csv_list(&params.types),
        src_ip: params.ip.clone(),
        search: params.search.clone(),
        time_from: params.from.clone(),
        time_to: params.to.clone(),
    };
    if truthy(&params.paginated) {
        match state.storage.get_events_paginated(&query) {
            Ok((events, total)) => Json(json!({"events": events, "total": total})).into_response(),
            Err(e) => internal(e),
        }
    } else {
        match state.storage.get_events(&query) {
            Ok(events) => Json(events).into_response(),
            Err(e) => internal(e),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub ip: Option<String>,
    pub service: Option<String>,
    pub services: Option<String>,
}

pub async fn sessions(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<SessionsParams>,
) -> Response {
    let query = SessionQuery {
        limit: params.limit.unwrap_or(100).min(MAX_PAGE),
        offset: params.offset.unwrap_or(0),
        src_ip: params.ip.clone(),
        service: params.service.clone(),
        services: csv_list(&params.services),
    };
    match state.storage.get_sessions(&query) {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsParams {
    pub limit: Option<i64>,
    pub unacknowledged: Option<String>,
}

pub async fn alerts(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<AlertsParams>,
) -> Response {
    let limit = params.limit.unwrap_or(100).min(MAX_PAGE);
    match state.storage.get_alerts(limit, truthy(&params.unacknowledged)) {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn geo_lookup(
    State(state): State<Arc<DashboardState>>,
    Path(ip): Path<String>,
) -> Response {
    Json(state.geo.lookup(&ip).await).into_response()
}

pub async fn map_data(State(state): State<Arc<DashboardState>>) -> Response {
    match state.storage.get_map_data() {
        Ok(points) => Json(points).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn unique_ips(State(state): State<Arc<DashboardState>>) -> Response {
    match state.storage.get_unique_ips() {
        Ok(ips) => Json(ips).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn session_events(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.get_events_for_session(&id) {
        Ok(events) => Json(events).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn attackers(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<PageParams>,
) -> Response {
    let limit = params.limit.unwrap_or(100).min(MAX_PAGE);
    match state.storage.get_attackers(limit, params.offset.unwrap_or(0)) {
        Ok(page) => Json(page).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn payload_stats(State(state): State<Arc<DashboardState>>) -> Response {
    match state.storage.get_payload_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal(e),
    }
}

// -- Export -------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub table: Option<String>,
    pub format: Option<String>,
}

/// `GET /api/export?table=…&format=json|csv` — full table dump download.
pub async fn export(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<ExportParams>,
) -> Response {
    let table = params.table.as_deref().unwrap_or("events");
    if !matches!(table, "events" | "sessions" | "alerts" | "attackers") {
        return ApiError::BadRequest.to_response("invalid table").into_response();
    }
    let rows = match state.storage.export_all(table) {
        Ok(rows) => rows,
        Err(e) => return internal(e),
    };

    if params.format.as_deref() == Some("csv") {
        let body = rows_to_csv(&rows);
        return (
            [
                (header::CONTENT_TYPE, "text/csv".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=mantis_{table}.csv"),
                ),
            ],
            body,
        )
            .into_response();
    }

    let body = serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_owned());
    (
        [
            (header::CONTENT_TYPE, "application/json".to_owned()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=mantis_{table}.json")),
        ],
        body,
    )
        .into_response()
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Flatten JSON rows to CSV; nested values are JSON-encoded into their cell.
pub fn rows_to_csv(rows: &[serde_json::Value]) -> String {
    let Some(first) = rows.first().and_then(|r| r.as_object()) else {
        return String::new();
    };
    let columns: Vec<&String> = first.keys().collect();
    let mut out = String::new();
    out.push_str(&columns.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
    out.push('\n');

    for row in rows {
        let Some(obj) = row.as_object() else { continue };
        let cells: Vec<String> = columns
            .iter()
            .map(|column| {
                let cell = match obj.get(*column) {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                };
                csv_escape(&cell)
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

// -- Mutations ----------------------------------------------------------------

pub async fn acknowledge_alert(
    State(state): State<Arc<DashboardState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.storage.acknowledge_alert(id) {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_config(State(state): State<Arc<DashboardState>>) -> Response {
    Json(state.orchestrator.config_dict()).into_response()
}

/// `PUT /api/config/service/{name}` — apply a patch, hot-restart the
/// service, and notify WebSocket clients.
pub async fn update_service_config(
    State(state): State<Arc<DashboardState>>,
    Path(name): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    match state.orchestrator.update_service_config(&name, &patch).await {
        Ok(config) => {
            state.broadcast_control(&json!({"type": "config_change", "data": config}));
            Json(config).into_response()
        }
        Err(e) => ApiError::BadRequest.to_response(e.to_string()).into_response(),
    }
}

pub async fn database_reset(State(state): State<Arc<DashboardState>>) -> Response {
    match state.orchestrator.reset_database() {
        Ok(()) => {
            state.broadcast_control(&json!({"type": "database_reset"}));
            Json(json!({"status": "ok", "message": "Database reset complete"})).into_response()
        }
        Err(e) => internal(e),
    }
}

// -- Firewall -----------------------------------------------------------------

/// Whether an `iptables` binary is reachable on PATH.
pub fn iptables_available() -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join("iptables").is_file())
}

/// Best-effort system-firewall shell-out. `action` is `-A` (add) or `-D`
/// (delete).
async fn run_iptables(action: &str, ip: &str) -> (bool, String) {
    let output = tokio::process::Command::new("iptables")
        .args([action, "INPUT", "-s", ip, "-j", "DROP"])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => (true, String::new()),
        Ok(output) => (false, String::from_utf8_lossy(&output.stderr).trim().to_owned()),
        Err(e) => (false, e.to_string()),
    }
}

pub async fn blocked_ips(State(state): State<Arc<DashboardState>>) -> Response {
    let blocked: Vec<String> = state.lock_blocked().iter().cloned().collect();
    Json(json!({"blocked": blocked, "iptables_available": state.iptables_available}))
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct FirewallRequest {
    #[serde(default)]
    pub ip: String,
}

pub async fn block_ip(
    State(state): State<Arc<DashboardState>>,
    Json(req): Json<FirewallRequest>,
) -> Response {
    let ip = req.ip.trim().to_owned();
    if ip.is_empty() {
        return ApiError::BadRequest.to_response("ip is required").into_response();
    }
    if state.lock_blocked().contains(&ip) {
        return Json(json!({"status": "already_blocked", "ip": ip})).into_response();
    }
    let (applied, err) = if state.iptables_available {
        run_iptables("-A", &ip).await
    } else {
        (false, "iptables not available on this system".to_owned())
    };
    if !applied && state.iptables_available {
        return internal(format!("iptables failed: {err}"));
    }
    state.lock_blocked().insert(ip.clone());
    tracing::info!(%ip, iptables = applied, "blocked IP");
    state.broadcast_control(&json!({"type": "ip_blocked", "data": {"ip": ip}}));
    Json(json!({
        "status": "blocked",
        "ip": ip,
        "iptables_applied": applied,
        "note": if applied { String::new() } else { err },
    }))
    .into_response()
}

pub async fn unblock_ip(
    State(state): State<Arc<DashboardState>>,
    Json(req): Json<FirewallRequest>,
) -> Response {
    let ip = req.ip.trim().to_owned();
    if ip.is_empty() {
        return ApiError::BadRequest.to_response("ip is required").into_response();
    }
    if !state.lock_blocked().contains(&ip) {
        return Json(json!({"status": "not_blocked", "ip": ip})).into_response();
    }
    let (applied, err) = if state.iptables_available {
        run_iptables("-D", &ip).await
    } else {
        (false, String::new())
    };
    state.lock_blocked().remove(&ip);
    tracing::info!(%ip, iptables = applied, "unblocked IP");
    state.broadcast_control(&json!({"type": "ip_unblocked", "data": {"ip": ip}}));
    Json(json!({
        "status": "unblocked",
        "ip": ip,
        "iptables_applied": applied,
        "note": err,
    }))
    .into_response()
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
