// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telnet emulator: login capture with IAC echo-suppression around the
//! password, then the same fake shell the SSH emulator exposes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::shell::{bash_response, TELNET_RESPONSES};
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

// IAC negotiation bytes.
const IAC: u8 = 255;
const WILL: u8 = 251;
const WONT: u8 = 252;
const ECHO: u8 = 1;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const SHELL_TIMEOUT: Duration = Duration::from_secs(120);

const PROMPT: &str = "root@gateway-01:~$ ";

pub async fn start(
    ctx: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<ServiceHandle> {
    let cancel = shutdown.child_token();
    let mut handle = ServiceHandle::new(ctx.service, cancel.clone());
    let (addr, task) =
        spawn_listener(ctx.clone(), ctx.config.port, cancel.clone(), handle_client).await?;
    handle.push(addr, task);

    // Optional extra listeners (e.g. real port 23 alongside 2323). A port
    // that cannot bind is reported and skipped.
    for extra_port in ctx.config.additional_ports() {
        match spawn_listener(ctx.clone(), extra_port, cancel.clone(), handle_client).await {
            Ok((addr, task)) => handle.push(addr, task),
            Err(e) => {
                tracing::warn!(service = %ctx.service, port = extra_port, err = %e, "extra port bind failed");
            }
        }
    }
    Ok(handle)
}

/// Strip Telnet IAC sequences (3-byte negotiation form, escaped 0xFF) from a
/// raw line.
pub fn strip_iac(raw: &[u8]) -> Vec<u8> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == IAC && i + 2 < raw.len() && (251..=254).contains(&raw[i + 1]) {
            i += 3;
        } else if raw[i] == IAC && i + 1 < raw.len() && raw[i + 1] == IAC {
            cleaned.push(IAC);
            i += 2;
        } else {
            cleaned.push(raw[i]);
            i += 1;
        }
    }
    cleaned
}

/// Read one line, strip IAC negotiation, decode lossily, trim.
async fn read_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    timeout: Duration,
) -> Option<String> {
    let mut raw = Vec::new();
    match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut raw)).await {
        Ok(Ok(0)) | Ok(Err(_)) | Err(_) => None,
        Ok(Ok(_)) => {
            let cleaned = strip_iac(&raw);
            Some(String::from_utf8_lossy(&cleaned).trim().to_owned())
        }
    }
}

async fn handle_client(
    ctx: Arc<ServiceContext>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let mut session = ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let banner =
        if ctx.config.banner.is_empty() { "gateway-01 login: " } else { ctx.config.banner.as_str() };
    let result = dialogue(&ctx, &mut reader, &mut writer, &mut session, banner).await;
    ctx.end_session(&mut session);
    result
}

async fn dialogue(
    ctx: &ServiceContext,
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    session: &mut crate::models::Session,
    banner: &str,
) -> anyhow::Result<()> {
    writer.write_all(b"\r\nUbuntu 22.04.3 LTS\r\n\r\n").await?;

    // Login phase.
    writer.write_all(banner.as_bytes()).await?;
    let Some(username) = read_line(reader, LOGIN_TIMEOUT).await else {
        return Ok(());
    };

    writer.write_all(&[IAC, WILL, ECHO]).await?;
    writer.write_all(b"Password: ").await?;
    let password = read_line(reader, LOGIN_TIMEOUT).await.unwrap_or_default();
    writer.write_all(&[IAC, WONT, ECHO]).await?;
    writer.write_all(b"\r\n").await?;

    ctx.log(
        session,
        EventKind::AuthAttempt,
        serde_json::json!({"username": username, "password": password}),
    );

    // Shell phase.
    writer.write_all(b"Last login: Mon Jan 15 08:45:12 2024 from 10.0.1.1\r\n").await?;
    writer.write_all(PROMPT.as_bytes()).await?;

    loop {
        let Some(line) = read_line(reader, SHELL_TIMEOUT).await else {
            break;
        };
        if line.is_empty() {
            writer.write_all(PROMPT.as_bytes()).await?;
            continue;
        }

        ctx.log(
            session,
            EventKind::Command,
            serde_json::json!({"command": line, "username": username}),
        );

        if matches!(line.as_str(), "exit" | "quit" | "logout") {
            writer.write_all(b"logout\r\n").await?;
            break;
        }

        let response = bash_response(TELNET_RESPONSES, &line);
        if !response.is_empty() {
            for resp_line in response.split('\n') {
                writer.write_all(format!("{resp_line}\r\n").as_bytes()).await?;
            }
        }
        writer.write_all(PROMPT.as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "telnet_tests.rs"]
mod tests;
