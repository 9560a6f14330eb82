// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP emulator: a believable admin login page. Every GET is logged as a
//! `request` with the threat pre-screen embedded, `POST /login` captures
//! credentials, any other POST is logged (body capped at 4 KB) and 404s.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::alerts::{http_corpus, patterns};
use crate::models::EventKind;
use crate::services::{ServiceContext, ServiceHandle};

const LOGIN_PAGE: &str = include_str!("../../web/honeypot_login.html");

pub async fn start(
    ctx: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<ServiceHandle> {
    let cancel = shutdown.child_token();
    let mut handle = ServiceHandle::new(ctx.service, cancel.clone());

    let app = Router::new()
        .route("/login", post(handle_login))
        .fallback(handle_any)
        .with_state(Arc::clone(&ctx));

    let listener = TcpListener::bind(("0.0.0.0", ctx.config.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(service = %ctx.service, %addr, "listening");

    let cancel_for_serve = cancel.clone();
    let task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel_for_serve.cancelled_owned());
        if let Err(e) = serve.await {
            tracing::debug!(err = %e, "http emulator server error");
        }
    });
    handle.push(addr, task);
    Ok(handle)
}

fn headers_to_json(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
        })
        .collect()
}

/// Query parameters, percent-decoded so the threat scan sees what the
/// attacker actually sent.
fn query_to_json(uri: &Uri) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            out.insert(url_decode(key), url_decode(value));
        }
    }
    out
}

/// Run the threat library over the request corpus and embed matches for the
/// UI (best-effort pre-screen; the alert rule re-scans on its own).
fn embed_threats(data: &mut serde_json::Value) {
    let corpus = http_corpus(data);
    let matches = patterns::scan(&patterns::HTTP_THREAT_PATTERNS, &corpus);
    if matches.is_empty() {
        return;
    }
    if let Some(map) = data.as_object_mut() {
        map.insert("threats".to_owned(), serde_json::json!(patterns::matches_to_json(&matches)));
    }
}

/// `POST /login` — capture the offered credentials, bounce back with an
/// error flag so the page invites another try.
async fn handle_login(
    State(ctx): State<Arc<ServiceContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session =
        ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));

    let mut username = String::new();
    let mut password = String::new();
    for pair in String::from_utf8_lossy(&body).split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decoded = url_decode(value);
        match key {
            "username" => username = decoded,
            "password" => password = decoded,
            _ => {}
        }
    }

    let user_agent = headers
        .get("user-agent")
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
    let mut data = serde_json::json!({
        "username": username,
        "password": password,
        "headers": headers_to_json(&headers),
        "user_agent": user_agent,
    });
    embed_threats(&mut data);
    ctx.log(&session, EventKind::AuthAttempt, data);
    ctx.end_session(&mut session);

    // Always bounce back with the error flag so the page invites a retry.
    (StatusCode::FOUND, [(header::LOCATION, "/?error=1")]).into_response()
}

/// Fallback for everything else: GET serves the login page, other methods
/// get a JSON 404. Both are logged with the threat pre-screen.
async fn handle_any(
    State(ctx): State<Arc<ServiceContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session =
        ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));

    let user_agent = headers
        .get("user-agent")
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();

    let response = if method == Method::GET {
        let mut data = serde_json::json!({
            "method": "GET",
            "path": url_decode(uri.path()),
            "headers": headers_to_json(&headers),
            "query": query_to_json(&uri),
            "user_agent": user_agent,
        });
        embed_threats(&mut data);
        ctx.log(&session, EventKind::Request, data);
        Html(LOGIN_PAGE).into_response()
    } else {
        let body_text: String = String::from_utf8_lossy(&body).chars().take(4096).collect();
        let mut data = serde_json::json!({
            "method": method.as_str(),
            "path": url_decode(uri.path()),
            "headers": headers_to_json(&headers),
            "body": body_text,
            "user_agent": user_agent,
        });
        embed_threats(&mut data);
        ctx.log(&session, EventKind::Request, data);
        (StatusCode::NOT_FOUND, r#"{"error": "not found"}"#).into_response()
    };

    ctx.end_session(&mut session);
    response
}

/// Percent-decoding for form fields. Works on raw bytes so hostile input
/// can never split a UTF-8 boundary.
fn url_decode(text: &str) -> String {
    fn hex_val(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
