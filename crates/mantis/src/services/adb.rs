// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ADB emulator: speaks the six-u32 message frame, accepts any AUTH,
//! presents a fake Pixel device, and captures shell commands from both
//! one-shot `shell:<cmd>` opens and the interactive stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::shell::android_response;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

pub const ADB_AUTH: u32 = u32::from_le_bytes(*b"AUTH");
pub const ADB_CNXN: u32 = u32::from_le_bytes(*b"CNXN");
pub const ADB_OPEN: u32 = u32::from_le_bytes(*b"OPEN");
pub const ADB_OKAY: u32 = u32::from_le_bytes(*b"OKAY");
pub const ADB_WRTE: u32 = u32::from_le_bytes(*b"WRTE");
pub const ADB_CLSE: u32 = u32::from_le_bytes(*b"CLSE");

const ADB_VERSION: u32 = 0x0100_0000;
const ADB_MAXDATA: u32 = 4096;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(120);
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(10);

const DEVICE_BANNER: &str = "device::ro.product.model=Pixel 7;ro.product.device=panther;ro.build.version.release=14;ro.build.display.id=UP1A.231005.007";

const PROMPT: &str = "panther:/ # ";

/// A parsed 24-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdbHeader {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub data_len: u32,
}

/// Frame a message: command, args, length, checksum, and magic
/// (command XOR 0xFFFFFFFF), then the payload.
pub fn build_message(command: u32, arg0: u32, arg1: u32, data: &[u8]) -> Vec<u8> {
    let checksum = data.iter().fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
    let magic = command ^ 0xFFFF_FFFF;
    let mut out = Vec::with_capacity(24 + data.len());
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&arg0.to_le_bytes());
    out.extend_from_slice(&arg1.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Parse a header; rejects frames whose magic does not match the command.
pub fn parse_header(data: &[u8]) -> Option<AdbHeader> {
    if data.len() < 24 {
        return None;
    }
    let word = |i: usize| {
        u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
    };
    let command = word(0);
    let magic = word(5);
    if command ^ 0xFFFF_FFFF != magic {
        return None;
    }
    Some(AdbHeader { command, arg0: word(1), arg1: word(2), data_len: word(3) })
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

async fn read_message(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Option<(AdbHeader, Vec<u8>)> {
    let mut header_buf = [0u8; 24];
    match tokio::time::timeout(timeout, stream.read_exact(&mut header_buf)).await {
        Ok(Ok(_)) => {}
        _ => return None,
    }
    let header = parse_header(&header_buf)?;
    let mut payload = Vec::new();
    if header.data_len > 0 && header.data_len < 65536 {
        payload = vec![0u8; header.data_len as usize];
        match tokio::time::timeout(PAYLOAD_TIMEOUT, stream.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            _ => return None,
        }
    }
    Some((header, payload))
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
    let banner = if ctx.config.banner.is_empty() || ctx.config.banner == "device::Pixel 7" {
        DEVICE_BANNER
    } else {
        ctx.config.banner.as_str()
    };

    // First frame: CNXN or AUTH. Either way we present the device banner.
    let Some((header, payload)) = read_message(stream, CONNECT_TIMEOUT).await else {
        return Ok(());
    };
    ctx.log(
        session,
        EventKind::Request,
        serde_json::json!({
            "stage": "connect",
            "client_command": format!("{:#x}", header.command),
            "client_banner": String::from_utf8_lossy(&payload).trim_end_matches('\0'),
        }),
    );
    if header.command != ADB_CNXN && header.command != ADB_AUTH {
        return Ok(());
    }
    let mut banner_data = banner.as_bytes().to_vec();
    banner_data.push(0);
    stream.write_all(&build_message(ADB_CNXN, ADB_VERSION, ADB_MAXDATA, &banner_data)).await?;

    let mut local_id: u32 = 1;
    loop {
        let Some((header, payload)) = read_message(stream, MESSAGE_TIMEOUT).await else {
            break;
        };
        match header.command {
            ADB_OPEN => {
                let dest = String::from_utf8_lossy(&payload).trim_end_matches('\0').to_owned();
                let remote_id = header.arg0;
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"command": "OPEN", "destination": dest}),
                );
                stream.write_all(&build_message(ADB_OKAY, local_id, remote_id, &[])).await?;

                if let Some(shell_cmd) = dest.strip_prefix("shell:") {
                    let shell_cmd = shell_cmd.trim();
                    if shell_cmd.is_empty() {
                        // Interactive shell: just present a prompt.
                        stream
                            .write_all(&build_message(
                                ADB_WRTE,
                                local_id,
                                remote_id,
                                PROMPT.as_bytes(),
                            ))
                            .await?;
                    } else {
                        // One-shot execution.
                        ctx.log(
                            session,
                            EventKind::Command,
                            serde_json::json!({"command": shell_cmd, "mode": "exec"}),
                        );
                        let response = format!("{}\n", android_response(shell_cmd));
                        stream
                            .write_all(&build_message(
                                ADB_WRTE,
                                local_id,
                                remote_id,
                                response.as_bytes(),
                            ))
                            .await?;
                        stream.write_all(&build_message(ADB_CLSE, local_id, remote_id, &[])).await?;
                    }
                }
                local_id = local_id.wrapping_add(1);
            }
            ADB_WRTE => {
                let remote_id = header.arg0;
                let text = String::from_utf8_lossy(&payload).trim().to_owned();
                let stream_id = local_id.wrapping_sub(1);
                stream.write_all(&build_message(ADB_OKAY, stream_id, remote_id, &[])).await?;

                if text.is_empty() {
                    continue;
                }
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"command": text, "mode": "interactive"}),
                );
                if text == "exit" || text == "quit" {
                    stream.write_all(&build_message(ADB_CLSE, stream_id, remote_id, &[])).await?;
                    break;
                }
                let response = format!("{}\n{PROMPT}", android_response(&text));
                stream
                    .write_all(&build_message(ADB_WRTE, stream_id, remote_id, response.as_bytes()))
                    .await?;
            }
            ADB_CLSE => break,
            ADB_OKAY => {}
            other => {
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({
                        "unknown_command": format!("{other:#x}"),
                        "payload_len": header.data_len,
                    }),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "adb_tests.rs"]
mod tests;
