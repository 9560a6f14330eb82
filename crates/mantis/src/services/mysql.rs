// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MySQL emulator: protocol-v10 handshake with a 21-byte scramble, accepts
//! every login, captures query text, and answers a handful of well-known
//! statements with canned result sets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const BODY_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_VERSION: &str = "5.7.42-0ubuntu0.18.04.1";

/// One MySQL packet: 3-byte little-endian length + sequence byte + payload.
fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() as u32).to_le_bytes();
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len[..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

/// Initial handshake (protocol version 10) advertising
/// `mysql_native_password`.
pub fn build_handshake(version: &str) -> Vec<u8> {
    let mut salt1 = [0u8; 8];
    let mut salt2 = [0u8; 12];
    rand::rng().fill_bytes(&mut salt1);
    rand::rng().fill_bytes(&mut salt2);

    let mut payload = Vec::new();
    payload.push(0x0a); // protocol version
    payload.extend_from_slice(version.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&1u32.to_le_bytes()); // connection id
    payload.extend_from_slice(&salt1); // auth plugin data part 1
    payload.push(0); // filler
    payload.extend_from_slice(&0xF7FFu16.to_le_bytes()); // capabilities (low)
    payload.push(0x21); // charset: utf8
    payload.extend_from_slice(&0x0002u16.to_le_bytes()); // status
    payload.extend_from_slice(&0x0081u16.to_le_bytes()); // capabilities (high)
    payload.push(21); // auth plugin data length
    payload.extend_from_slice(&[0u8; 10]); // reserved
    payload.extend_from_slice(&salt2); // auth plugin data part 2
    payload.push(0);
    payload.extend_from_slice(b"mysql_native_password\0");

    packet(0, &payload)
}

pub fn build_ok(seq: u8) -> Vec<u8> {
    packet(seq, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00])
}

/// Text-protocol result set: column count, column definitions, EOF, rows,
/// EOF.
pub fn build_result_set(mut seq: u8, columns: &[&str], rows: &[Vec<String>]) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&packet(seq, &[columns.len() as u8]));
    seq = seq.wrapping_add(1);

    for name in columns {
        let mut def = Vec::new();
        def.extend_from_slice(b"\x03def"); // catalog
        def.push(0); // schema
        def.push(0); // table
        def.push(0); // org_table
        def.push(name.len() as u8);
        def.extend_from_slice(name.as_bytes());
        def.push(0); // org_name
        def.push(0x0c); // fixed-length fields marker
        def.extend_from_slice(&[0x21, 0x00]); // charset
        def.extend_from_slice(&255u32.to_le_bytes()); // column length
        def.push(0xfd); // type: VARCHAR
        def.extend_from_slice(&[0x01, 0x00]); // flags
        def.push(0); // decimals
        def.extend_from_slice(&[0x00, 0x00]); // filler
        out.extend_from_slice(&packet(seq, &def));
        seq = seq.wrapping_add(1);
    }

    out.extend_from_slice(&packet(seq, &[0xfe, 0x00, 0x00, 0x02, 0x00]));
    seq = seq.wrapping_add(1);

    for row in rows {
        let mut data = Vec::new();
        for value in row {
            data.push(value.len() as u8);
            data.extend_from_slice(value.as_bytes());
        }
        out.extend_from_slice(&packet(seq, &data));
        seq = seq.wrapping_add(1);
    }

    out.extend_from_slice(&packet(seq, &[0xfe, 0x00, 0x00, 0x02, 0x00]));
    out
}

/// Best-effort username parse out of a HandshakeResponse41.
pub fn parse_username(auth_packet: &[u8]) -> String {
    // 4 header + 4 capabilities + 4 max packet + 1 charset + 23 reserved.
    let offset = 4 + 4 + 4 + 1 + 23;
    if offset >= auth_packet.len() {
        return "<parse_error>".to_owned();
    }
    match auth_packet[offset..].iter().position(|b| *b == 0) {
        Some(end) => String::from_utf8_lossy(&auth_packet[offset..offset + end]).into_owned(),
        None => "<parse_error>".to_owned(),
    }
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
    mut stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let mut session = ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));
    let result = dialogue(&ctx, &mut stream, &mut session).await;
    ctx.end_session(&mut session);
    result
}

async fn dialogue(
    ctx: &ServiceContext,
    stream: &mut TcpStream,
    session: &mut crate::models::Session,
) -> anyhow::Result<()> {
    let version =
        if ctx.config.banner.is_empty() { DEFAULT_VERSION } else { ctx.config.banner.as_str() };
    stream.write_all(&build_handshake(version)).await?;

    // Login response; parse the username best-effort and accept.
    let mut auth_buf = vec![0u8; 4096];
    let n = match tokio::time::timeout(AUTH_TIMEOUT, stream.read(&mut auth_buf)).await {
        Ok(Ok(n)) if n >= 4 => n,
        _ => return Ok(()),
    };
    let username = parse_username(&auth_buf[..n]);
    ctx.log(
        session,
        EventKind::AuthAttempt,
        serde_json::json!({"username": username, "auth_data_len": n}),
    );
    stream.write_all(&build_ok(2)).await?;

    // COM packet loop.
    loop {
        let mut header = [0u8; 4];
        match tokio::time::timeout(COMMAND_TIMEOUT, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }
        let pkt_len =
            u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let seq = header[3];
        if pkt_len == 0 {
            break;
        }
        let mut body = vec![0u8; pkt_len];
        match tokio::time::timeout(BODY_TIMEOUT, stream.read_exact(&mut body)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }

        match body[0] {
            0x01 => break, // COM_QUIT
            0x03 => {
                // COM_QUERY
                let query = String::from_utf8_lossy(&body[1..]).into_owned();
                ctx.log(
                    session,
                    EventKind::Query,
                    serde_json::json!({"query": query, "username": username}),
                );

                let upper = query.trim().to_ascii_uppercase();
                let response = if upper.starts_with("SELECT @@VERSION") {
                    build_result_set(seq.wrapping_add(1), &["@@version"], &[vec![version.to_owned()]])
                } else if upper.starts_with("SELECT DATABASE") {
                    build_result_set(seq.wrapping_add(1), &["database()"], &[vec!["mysql".to_owned()]])
                } else if upper.starts_with("SHOW DATABASES") {
                    build_result_set(
                        seq + 1,
                        &["Database"],
                        &[
                            vec!["information_schema".to_owned()],
                            vec!["mysql".to_owned()],
                            vec!["performance_schema".to_owned()],
                            vec!["production_db".to_owned()],
                            vec!["user_data".to_owned()],
                        ],
                    )
                } else if upper.starts_with("SHOW TABLES") {
                    build_result_set(
                        seq + 1,
                        &["Tables_in_production_db"],
                        &[
                            vec!["users".to_owned()],
                            vec!["orders".to_owned()],
                            vec!["payments".to_owned()],
                            vec!["sessions".to_owned()],
                            vec!["api_keys".to_owned()],
                        ],
                    )
                } else if upper.starts_with("SELECT") || upper.starts_with("DESCRIBE") {
                    build_result_set(seq.wrapping_add(1), &["result"], &[])
                } else {
                    build_ok(seq.wrapping_add(1))
                };
                stream.write_all(&response).await?;
            }
            0x02 => {
                // COM_INIT_DB
                let db_name = String::from_utf8_lossy(&body[1..]).into_owned();
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"command": format!("USE {db_name}")}),
                );
                stream.write_all(&build_ok(seq.wrapping_add(1))).await?;
            }
            0x0e => {
                // COM_PING
                stream.write_all(&build_ok(seq.wrapping_add(1))).await?;
            }
            other => {
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"command": format!("COM_{other:#04x}")}),
                );
                stream.write_all(&build_ok(seq.wrapping_add(1))).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "mysql_tests.rs"]
mod tests;
