// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MongoDB emulator: drains isMaster/hello, SASL and legacy authenticate,
//! listDatabases, find/aggregate, ping, buildInfo, and serverStatus over
//! both OP_QUERY (2004) and OP_MSG (2013) framings.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::{bson, spawn_listener, ServiceContext, ServiceHandle};

const OP_REPLY: i32 = 1;
const OP_QUERY: i32 = 2004;
const OP_MSG: i32 = 2013;

const HEADER_TIMEOUT: Duration = Duration::from_secs(60);
const BODY_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_VERSION: &str = "6.0.12";

/// OP_REPLY envelope around one BSON document (legacy framing).
pub fn build_op_reply(request_id: i32, doc: &serde_json::Value) -> Vec<u8> {
    let bson_doc = bson::encode(doc);
    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // responseFlags
    body.extend_from_slice(&0i64.to_le_bytes()); // cursorID
    body.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
    body.extend_from_slice(&1i32.to_le_bytes()); // numberReturned
    body.extend_from_slice(&bson_doc);

    let mut out = Vec::new();
    out.extend_from_slice(&((16 + body.len()) as i32).to_le_bytes());
    out.extend_from_slice(&(request_id.wrapping_add(1)).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes()); // responseTo
    out.extend_from_slice(&OP_REPLY.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// OP_MSG envelope: flagBits + one kind-0 body section.
pub fn build_op_msg(request_id: i32, doc: &serde_json::Value) -> Vec<u8> {
    let bson_doc = bson::encode(doc);
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // flagBits
    body.push(0); // section kind 0
    body.extend_from_slice(&bson_doc);

    let mut out = Vec::new();
    out.extend_from_slice(&((16 + body.len()) as i32).to_le_bytes());
    out.extend_from_slice(&(request_id.wrapping_add(1)).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&OP_MSG.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn ismaster_response(version: &str) -> serde_json::Value {
    serde_json::json!({
        "ismaster": true,
        "maxBsonObjectSize": 16777216,
        "maxMessageSizeBytes": 48000000,
        "maxWriteBatchSize": 100000,
        "localTime": chrono::Utc::now().timestamp(),
        "minWireVersion": 0,
        "maxWireVersion": 21,
        "readOnly": false,
        "version": version,
        "ok": 1.0,
    })
}

fn has_key(doc: &serde_json::Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| doc.get(*k).is_some())
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

    loop {
        let mut header = [0u8; 16];
        match tokio::time::timeout(HEADER_TIMEOUT, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }
        let msg_len = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let request_id = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let opcode = i32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        let body_len = msg_len as i64 - 16;
        if !(1..=65536).contains(&body_len) {
            break;
        }
        let mut body = vec![0u8; body_len as usize];
        match tokio::time::timeout(BODY_TIMEOUT, stream.read_exact(&mut body)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }

        match opcode {
            OP_QUERY => handle_op_query(ctx, stream, session, request_id, &body, version).await?,
            OP_MSG => handle_op_msg(ctx, stream, session, request_id, &body, version).await?,
            other => {
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"opcode": other, "body_len": body_len}),
                );
            }
        }
    }
    Ok(())
}

/// Legacy OP_QUERY: flags(4) + collection cstring + skip(4) + return(4) +
/// query document. Old drivers still use it for isMaster.
async fn handle_op_query(
    ctx: &ServiceContext,
    stream: &mut TcpStream,
    session: &mut crate::models::Session,
    request_id: i32,
    body: &[u8],
    version: &str,
) -> anyhow::Result<()> {
    let (collection, query_doc) = match body[4..].iter().position(|b| *b == 0) {
        Some(end) => {
            let collection = String::from_utf8_lossy(&body[4..4 + end]).into_owned();
            let doc_start = 4 + end + 1 + 8;
            let doc = if doc_start < body.len() {
                bson::decode(&body[doc_start..])
            } else {
                serde_json::json!({})
            };
            (collection, doc)
        }
        None => (String::new(), serde_json::json!({})),
    };

    let query_text: String = query_doc.to_string().chars().take(2048).collect();
    ctx.log(
        session,
        EventKind::Query,
        serde_json::json!({
            "protocol": "OP_QUERY",
            "collection": collection,
            "query": query_text,
        }),
    );

    let reply = if has_key(&query_doc, &["isMaster", "ismaster", "hello"]) {
        ismaster_response(version)
    } else {
        serde_json::json!({"ok": 1.0})
    };
    stream.write_all(&build_op_reply(request_id, &reply)).await?;
    Ok(())
}

async fn handle_op_msg(
    ctx: &ServiceContext,
    stream: &mut TcpStream,
    session: &mut crate::models::Session,
    request_id: i32,
    body: &[u8],
    version: &str,
) -> anyhow::Result<()> {
    // flagBits(4) + section kind byte; only kind 0 carries the command doc.
    let doc = if body.len() > 5 && body[4] == 0 {
        bson::decode(&body[5..])
    } else {
        serde_json::json!({})
    };

    let command_text: String = doc.to_string().chars().take(2048).collect();
    ctx.log(
        session,
        EventKind::Query,
        serde_json::json!({"protocol": "OP_MSG", "command": command_text}),
    );

    let reply = if has_key(&doc, &["isMaster", "ismaster", "hello"]) {
        ismaster_response(version)
    } else if doc.get("saslStart").is_some() {
        ctx.log(
            session,
            EventKind::AuthAttempt,
            serde_json::json!({
                "stage": "saslStart",
                "mechanism": doc.get("mechanism").and_then(|m| m.as_str()).unwrap_or(""),
                "db": doc.get("$db").and_then(|d| d.as_str()).unwrap_or(""),
            }),
        );
        serde_json::json!({"conversationId": 1, "done": false, "payload": "", "ok": 1.0})
    } else if doc.get("saslContinue").is_some() {
        ctx.log(
            session,
            EventKind::AuthAttempt,
            serde_json::json!({
                "stage": "saslContinue",
                "conversationId": doc.get("conversationId").and_then(|c| c.as_i64()).unwrap_or(0),
            }),
        );
        serde_json::json!({"conversationId": 1, "done": true, "payload": "", "ok": 1.0})
    } else if doc.get("authenticate").is_some() {
        ctx.log(
            session,
            EventKind::AuthAttempt,
            serde_json::json!({
                "username": doc.get("user").and_then(|u| u.as_str()).unwrap_or(""),
                "mechanism": doc.get("mechanism").and_then(|m| m.as_str()).unwrap_or(""),
                "db": doc.get("$db").and_then(|d| d.as_str()).unwrap_or(""),
            }),
        );
        serde_json::json!({"ok": 1.0})
    } else if doc.get("listDatabases").is_some() {
        serde_json::json!({
            "databases": [
                {"name": "admin", "sizeOnDisk": 40960, "empty": false},
                {"name": "config", "sizeOnDisk": 36864, "empty": false},
                {"name": "local", "sizeOnDisk": 73728, "empty": false},
                {"name": "production", "sizeOnDisk": 2621440, "empty": false},
                {"name": "users", "sizeOnDisk": 524288, "empty": false},
            ],
            "totalSize": 3297280,
            "ok": 1.0,
        })
    } else if doc.get("listCollections").is_some() {
        serde_json::json!({"ok": 1.0})
    } else if has_key(&doc, &["find", "aggregate"]) {
        serde_json::json!({
            "cursor": {"firstBatch": [], "id": 0, "ns": "test.collection"},
            "ok": 1.0,
        })
    } else if doc.get("ping").is_some() {
        serde_json::json!({"ok": 1.0})
    } else if has_key(&doc, &["buildInfo", "buildinfo"]) {
        serde_json::json!({
            "version": version,
            "gitVersion": "abc123",
            "modules": [],
            "sysInfo": "deprecated",
            "ok": 1.0,
        })
    } else if doc.get("serverStatus").is_some() {
        serde_json::json!({
            "host": "db-prod-01:27017",
            "version": version,
            "uptime": 432000,
            "connections": {"current": 42, "available": 51158, "totalCreated": 18234},
            "ok": 1.0,
        })
    } else {
        serde_json::json!({"ok": 1.0})
    };

    stream.write_all(&build_op_msg(request_id, &reply)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "mongodb_tests.rs"]
mod tests;
