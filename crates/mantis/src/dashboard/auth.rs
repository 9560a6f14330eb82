// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard auth middleware. When a token is configured it may arrive as
//! the `mantis_token` cookie, an `Authorization: Bearer` header, or (for
//! the WebSocket upgrade only) a `?token=` query parameter. HTML requests
//! without a valid token are redirected to `/login`; API and WebSocket
//! requests get a 401.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::dashboard::DashboardState;
use crate::error::ApiError;

pub const TOKEN_COOKIE: &str = "mantis_token";

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Extract the `mantis_token` cookie value from a Cookie header.
pub fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;
    for pair in cookies.split(';') {
        let (name, value) = pair.trim().split_once('=')?;
        if name == TOKEN_COOKIE {
            return Some(value.to_owned());
        }
    }
    None
}

/// Extract a Bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Extract `token=` from a raw query string.
pub fn query_token(query: Option<&str>) -> Option<String> {
    for pair in query?.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_owned());
        }
    }
    None
}

/// Whether the request presents the expected token in any accepted place.
pub fn request_is_authorized(
    expected: &str,
    headers: &HeaderMap,
    path: &str,
    query: Option<&str>,
) -> bool {
    if let Some(token) = cookie_token(headers) {
        if constant_time_eq(&token, expected) {
            return true;
        }
    }
    if let Some(token) = bearer_token(headers) {
        if constant_time_eq(&token, expected) {
            return true;
        }
    }
    // WebSocket clients cannot always set headers; accept ?token= there.
    if path == "/ws" {
        if let Some(token) = query_token(query) {
            if constant_time_eq(&token, expected) {
                return true;
            }
        }
    }
    false
}

/// Axum middleware guarding every route except `/login` and `POST /api/auth`.
pub async fn auth_layer(
    State(state): State<Arc<DashboardState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(ref expected) = state.auth_token else {
        return next.run(req).await;
    };

    let path = req.uri().path().to_owned();
    if path == "/login" || path == "/api/auth" {
        return next.run(req).await;
    }

    if request_is_authorized(expected, req.headers(), &path, req.uri().query()) {
        return next.run(req).await;
    }

    if path.starts_with("/api") || path == "/ws" {
        return ApiError::Unauthorized.to_response("unauthorized").into_response();
    }
    (StatusCode::FOUND, [(header::LOCATION, "/login")]).into_response()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
