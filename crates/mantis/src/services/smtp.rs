// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SMTP emulator: ESMTP handshake, AUTH LOGIN/PLAIN credential capture,
//! envelope commands, and message-body capture.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// AUTH LOGIN runs a little state machine across lines.
enum AuthState {
    Idle,
    WaitUser,
    WaitPass { username: String },
}

fn b64_decode_lossy(text: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| text.to_owned())
}

pub async fn start(
    ctx: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<ServiceHandle> {
    let cancel = shutdown.child_token();
    let mut handle = ServiceHandle::new(ctx.service, cancel.clone());
    let (addr, task) = spawn_listener(ctx.clone(), ctx.config.port, cancel, handle_client).await?;
    handle.push(addr, task);
    Ok(handle)
}

async fn handle_client(
    ctx: Arc<ServiceContext>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let mut session = ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let banner = if ctx.config.banner.is_empty() {
        "220 mail.example.com ESMTP Postfix (Ubuntu)"
    } else {
        ctx.config.banner.as_str()
    };
    let result = dialogue(&ctx, &mut reader, &mut writer, &mut session, banner).await;
    ctx.end_session(&mut session);
    result
}

async fn read_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    timeout: Duration,
) -> Option<String> {
    let mut raw = Vec::new();
    match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut raw)).await {
        Ok(Ok(0)) | Ok(Err(_)) | Err(_) => None,
        Ok(Ok(_)) => Some(String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_owned()),
    }
}

async fn dialogue(
    ctx: &ServiceContext,
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    session: &mut crate::models::Session,
    banner: &str,
) -> anyhow::Result<()> {
    writer.write_all(format!("{banner}\r\n").as_bytes()).await?;

    let mut mail_from = String::new();
    let mut rcpt_to: Vec<String> = Vec::new();
    let mut auth_state = AuthState::Idle;

    loop {
        let Some(line) = read_line(reader, COMMAND_TIMEOUT).await else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // AUTH LOGIN continuation lines are base64, not commands.
        match std::mem::replace(&mut auth_state, AuthState::Idle) {
            AuthState::WaitUser => {
                let username = b64_decode_lossy(trimmed);
                writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                auth_state = AuthState::WaitPass { username };
                continue;
            }
            AuthState::WaitPass { username } => {
                let password = b64_decode_lossy(trimmed);
                ctx.log(
                    session,
                    EventKind::AuthAttempt,
                    serde_json::json!({
                        "username": username,
                        "password": password,
                        "mechanism": "LOGIN",
                    }),
                );
                writer.write_all(b"235 2.7.0 Authentication successful\r\n").await?;
                continue;
            }
            AuthState::Idle => {}
        }

        let (cmd, arg) = match trimmed.split_once(' ') {
            Some((c, a)) => (c.to_ascii_uppercase(), a.trim().to_owned()),
            None => (trimmed.to_ascii_uppercase(), String::new()),
        };
        let upper = trimmed.to_ascii_uppercase();

        if cmd == "HELO" {
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "HELO", "hostname": arg}),
            );
            writer.write_all(format!("250 mail.example.com Hello {arg}\r\n").as_bytes()).await?;
        } else if cmd == "EHLO" {
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "EHLO", "hostname": arg}),
            );
            writer
                .write_all(
                    format!(
                        "250-mail.example.com Hello {arg}\r\n\
                         250-SIZE 52428800\r\n\
                         250-8BITMIME\r\n\
                         250-STARTTLS\r\n\
                         250-AUTH LOGIN PLAIN CRAM-MD5\r\n\
                         250-ENHANCEDSTATUSCODES\r\n\
                         250-PIPELINING\r\n\
                         250-CHUNKING\r\n\
                         250 SMTPUTF8\r\n"
                    )
                    .as_bytes(),
                )
                .await?;
        } else if cmd == "STARTTLS" {
            writer.write_all(b"454 4.7.0 TLS not available\r\n").await?;
        } else if cmd == "AUTH" {
            let (mechanism, inline) = match arg.split_once(' ') {
                Some((m, rest)) => (m.to_ascii_uppercase(), rest.trim().to_owned()),
                None => (arg.to_ascii_uppercase(), String::new()),
            };
            match mechanism.as_str() {
                "LOGIN" => {
                    if inline.is_empty() {
                        writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                        auth_state = AuthState::WaitUser;
                    } else {
                        let username = b64_decode_lossy(&inline);
                        writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                        auth_state = AuthState::WaitPass { username };
                    }
                }
                "PLAIN" => {
                    if inline.is_empty() {
                        writer.write_all(b"334\r\n").await?;
                        auth_state = AuthState::WaitUser;
                    } else {
                        // authzid \0 authcid \0 password
                        let decoded = b64_decode_lossy(&inline);
                        let mut parts = decoded.split('\0');
                        let _authzid = parts.next().unwrap_or("");
                        let username = parts.next().unwrap_or("").to_owned();
                        let password = parts.next().unwrap_or("").to_owned();
                        ctx.log(
                            session,
                            EventKind::AuthAttempt,
                            serde_json::json!({
                                "username": username,
                                "password": password,
                                "mechanism": "PLAIN",
                            }),
                        );
                        writer.write_all(b"235 2.7.0 Authentication successful\r\n").await?;
                    }
                }
                other => {
                    ctx.log(
                        session,
                        EventKind::AuthAttempt,
                        serde_json::json!({"mechanism": other, "raw": arg}),
                    );
                    writer.write_all(b"235 2.7.0 Authentication successful\r\n").await?;
                }
            }
        } else if upper.starts_with("MAIL FROM:") {
            mail_from = trimmed[10..].trim().trim_matches(['<', '>']).to_owned();
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "MAIL FROM", "sender": mail_from}),
            );
            writer.write_all(b"250 2.1.0 Ok\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            let recipient = trimmed[8..].trim().trim_matches(['<', '>']).to_owned();
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "RCPT TO", "recipient": recipient}),
            );
            rcpt_to.push(recipient);
            writer.write_all(b"250 2.1.5 Ok\r\n").await?;
        } else if cmd == "DATA" {
            writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;

            let mut body_lines: Vec<String> = Vec::new();
            loop {
                let Some(body_line) = read_line(reader, DATA_TIMEOUT).await else {
                    break;
                };
                if body_line == "." {
                    break;
                }
                body_lines.push(body_line);
                if body_lines.len() > 500 {
                    break;
                }
            }
            let preview: String =
                body_lines.iter().take(100).cloned().collect::<Vec<_>>().join("\n");
            let preview: String = preview.chars().take(4096).collect();
            ctx.log(
                session,
                EventKind::Request,
                serde_json::json!({
                    "command": "DATA",
                    "sender": mail_from,
                    "recipients": rcpt_to,
                    "body_preview": preview,
                    "body_lines": body_lines.len(),
                }),
            );
            writer.write_all(b"250 2.0.0 Ok: queued as FAKE1234\r\n").await?;
        } else if cmd == "RSET" {
            mail_from.clear();
            rcpt_to.clear();
            writer.write_all(b"250 2.0.0 Ok\r\n").await?;
        } else if cmd == "NOOP" {
            writer.write_all(b"250 2.0.0 Ok\r\n").await?;
        } else if cmd == "VRFY" {
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "VRFY", "address": arg}),
            );
            writer.write_all(b"252 2.0.0 Cannot VRFY user\r\n").await?;
        } else if cmd == "EXPN" {
            ctx.log(
                session,
                EventKind::Command,
                serde_json::json!({"command": "EXPN", "list": arg}),
            );
            writer.write_all(b"252 2.0.0 Cannot EXPN\r\n").await?;
        } else if cmd == "QUIT" {
            writer.write_all(b"221 2.0.0 Bye\r\n").await?;
            break;
        } else {
            ctx.log(session, EventKind::Command, serde_json::json!({"command": trimmed}));
            writer.write_all(b"502 5.5.2 Error: command not recognized\r\n").await?;
        }
    }
    Ok(())
}
