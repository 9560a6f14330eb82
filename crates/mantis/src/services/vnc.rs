// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VNC emulator: RFB 3.8 handshake offering VNC Authentication, captures
//! the DES challenge/response pair, then fakes a 1024×768 desktop and logs
//! key presses and clipboard pastes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::smb::hex_encode;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const RFB_VERSION_38: &[u8] = b"RFB 003.008\n";

const SEC_NONE: u8 = 1;
const SEC_VNC_AUTH: u8 = 2;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const SHORT_TIMEOUT: Duration = Duration::from_secs(15);
const CLIENT_MSG_TIMEOUT: Duration = Duration::from_secs(120);

const FB_WIDTH: u16 = 1024;
const FB_HEIGHT: u16 = 768;

/// ServerInit: framebuffer geometry, pixel format, and desktop name.
pub fn build_server_init(desktop_name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FB_WIDTH.to_be_bytes());
    out.extend_from_slice(&FB_HEIGHT.to_be_bytes());
    // Pixel format: 32 bpp, depth 24, little-endian, true-colour,
    // 8 bits per channel shifted 16/8/0.
    out.push(32);
    out.push(24);
    out.push(0);
    out.push(1);
    out.extend_from_slice(&255u16.to_be_bytes()); // red-max
    out.extend_from_slice(&255u16.to_be_bytes()); // green-max
    out.extend_from_slice(&255u16.to_be_bytes()); // blue-max
    out.push(16); // red-shift
    out.push(8); // green-shift
    out.push(0); // blue-shift
    out.extend_from_slice(&[0, 0, 0]); // padding
    out.extend_from_slice(&(desktop_name.len() as u32).to_be_bytes());
    out.extend_from_slice(desktop_name.as_bytes());
    out
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

async fn read_exact_timeout(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> Option<()> {
    match tokio::time::timeout(timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Some(()),
        _ => None,
    }
}

async fn dialogue(
    ctx: &ServiceContext,
    stream: &mut TcpStream,
    session: &mut crate::models::Session,
) -> anyhow::Result<()> {
    // ProtocolVersion exchange.
    stream.write_all(RFB_VERSION_38).await?;
    let mut client_version = [0u8; 12];
    if read_exact_timeout(stream, &mut client_version, HANDSHAKE_TIMEOUT).await.is_none() {
        return Ok(());
    }
    ctx.log(
        session,
        EventKind::Request,
        serde_json::json!({
            "client_rfb_version": String::from_utf8_lossy(&client_version).trim(),
        }),
    );

    // Security types: offer VNC Authentication only.
    stream.write_all(&[1, SEC_VNC_AUTH]).await?;
    let mut selected = [0u8; 1];
    if read_exact_timeout(stream, &mut selected, SHORT_TIMEOUT).await.is_none() {
        return Ok(());
    }
    let sec_type = selected[0];
    ctx.log(
        session,
        EventKind::Request,
        serde_json::json!({"selected_security_type": sec_type}),
    );

    match sec_type {
        SEC_VNC_AUTH => {}
        SEC_NONE => {
            stream.write_all(&0u32.to_be_bytes()).await?;
            ctx.log(
                session,
                EventKind::AuthAttempt,
                serde_json::json!({"message": "Client connected with no authentication"}),
            );
            return Ok(());
        }
        other => {
            ctx.log(
                session,
                EventKind::Request,
                serde_json::json!({"message": format!("Unknown security type selected: {other}")}),
            );
            return Ok(());
        }
    }

    // VNC Authentication: random 16-byte challenge, capture the encrypted
    // response, accept regardless.
    let mut challenge = [0u8; 16];
    rand::rng().fill_bytes(&mut challenge);
    stream.write_all(&challenge).await?;

    let mut response = [0u8; 16];
    if read_exact_timeout(stream, &mut response, HANDSHAKE_TIMEOUT).await.is_none() {
        return Ok(());
    }
    ctx.log(
        session,
        EventKind::AuthAttempt,
        serde_json::json!({
            "challenge": hex_encode(&challenge),
            "response": hex_encode(&response),
            "message": "VNC auth challenge/response captured (DES-encrypted password)",
        }),
    );
    stream.write_all(&0u32.to_be_bytes()).await?; // SecurityResult: OK

    // ClientInit / ServerInit.
    let mut client_init = [0u8; 1];
    if read_exact_timeout(stream, &mut client_init, SHORT_TIMEOUT).await.is_none() {
        return Ok(());
    }
    let desktop_name =
        if ctx.config.banner.is_empty() { "prod-workstation:0" } else { ctx.config.banner.as_str() };
    stream.write_all(&build_server_init(desktop_name)).await?;
    ctx.log(
        session,
        EventKind::Command,
        serde_json::json!({
            "stage": "connected",
            "shared_flag": client_init[0],
            "desktop_name": desktop_name,
            "framebuffer": format!("{FB_WIDTH}x{FB_HEIGHT}"),
        }),
    );

    // Client message loop.
    loop {
        let mut msg_type = [0u8; 1];
        if read_exact_timeout(stream, &mut msg_type, CLIENT_MSG_TIMEOUT).await.is_none() {
            break;
        }
        match msg_type[0] {
            0 => {
                // SetPixelFormat: padding(3) + pixel-format(16).
                let mut drain = [0u8; 19];
                if read_exact_timeout(stream, &mut drain, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
            }
            2 => {
                // SetEncodings: padding(1) + count(2) + 4·count.
                let mut head = [0u8; 3];
                if read_exact_timeout(stream, &mut head, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
                let count = u16::from_be_bytes([head[1], head[2]]) as usize;
                let mut encodings = vec![0u8; count * 4];
                if read_exact_timeout(stream, &mut encodings, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
            }
            3 => {
                // FramebufferUpdateRequest: drain 9, answer an empty update.
                let mut drain = [0u8; 9];
                if read_exact_timeout(stream, &mut drain, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
                stream.write_all(&[0, 0, 0, 0]).await?; // type, pad, 0 rects
            }
            4 => {
                // KeyEvent: down(1) + padding(2) + keysym(4).
                let mut key = [0u8; 7];
                if read_exact_timeout(stream, &mut key, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
                let key_sym = u32::from_be_bytes([key[3], key[4], key[5], key[6]]);
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({
                        "input_type": "key",
                        "key_sym": key_sym,
                        "down": key[0] != 0,
                    }),
                );
            }
            5 => {
                // PointerEvent: button-mask(1) + x(2) + y(2).
                let mut drain = [0u8; 5];
                if read_exact_timeout(stream, &mut drain, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
            }
            6 => {
                // ClientCutText: padding(3) + length(4) + text.
                let mut head = [0u8; 7];
                if read_exact_timeout(stream, &mut head, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
                let text_len = u32::from_be_bytes([head[3], head[4], head[5], head[6]]) as usize;
                if text_len == 0 || text_len >= 65536 {
                    continue;
                }
                let mut text = vec![0u8; text_len];
                if read_exact_timeout(stream, &mut text, SHORT_TIMEOUT).await.is_none() {
                    break;
                }
                let clipboard: String =
                    text.iter().map(|b| *b as char).take(4096).collect();
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"input_type": "clipboard", "text": clipboard}),
                );
            }
            _ => {
                // Unknown message type; drain whatever is pending.
                let mut sink = [0u8; 1024];
                match tokio::time::timeout(SHORT_TIMEOUT, stream.read(&mut sink)).await {
                    Ok(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "vnc_tests.rs"]
mod tests;
