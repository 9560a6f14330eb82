// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FTP emulator (RFC 959 text dialogue): captures credentials and
//! upload/download attempts, answers enough of the command surface to keep
//! clients engaged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

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
        "220 FTP Server ready."
    } else {
        ctx.config.banner.as_str()
    };
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
    writer.write_all(format!("{banner}\r\n").as_bytes()).await?;

    let mut username = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(COMMAND_TIMEOUT, reader.read_line(&mut line)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => break,
        };
        if n == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (cmd, arg) = match trimmed.split_once(' ') {
            Some((c, a)) => (c.to_ascii_uppercase(), a.to_owned()),
            None => (trimmed.to_ascii_uppercase(), String::new()),
        };

        match cmd.as_str() {
            "USER" => {
                username = arg.clone();
                writer.write_all(format!("331 Password required for {arg}.\r\n").as_bytes()).await?;
                ctx.log(
                    session,
                    EventKind::AuthAttempt,
                    serde_json::json!({"username": arg, "stage": "user"}),
                );
            }
            "PASS" => {
                ctx.log(
                    session,
                    EventKind::AuthAttempt,
                    serde_json::json!({"username": username, "password": arg, "stage": "password"}),
                );
                writer.write_all(b"230 Login successful.\r\n").await?;
            }
            "SYST" => writer.write_all(b"215 UNIX Type: L8\r\n").await?,
            "PWD" => {
                writer.write_all(b"257 \"/home/admin\" is current directory.\r\n").await?;
            }
            "TYPE" => writer.write_all(b"200 Type set.\r\n").await?,
            "PASV" => {
                writer.write_all(b"227 Entering Passive Mode (127,0,0,1,0,0).\r\n").await?;
            }
            "LIST" | "NLST" => {
                writer.write_all(b"150 Opening data connection.\r\n").await?;
                ctx.log(
                    session,
                    EventKind::Command,
                    serde_json::json!({"command": trimmed, "response": "directory listing"}),
                );
                tokio::time::sleep(Duration::from_millis(200)).await;
                writer.write_all(b"226 Transfer complete.\r\n").await?;
            }
            "RETR" => {
                ctx.log(
                    session,
                    EventKind::FileTransfer,
                    serde_json::json!({"direction": "download", "filename": arg}),
                );
                writer.write_all(b"550 File not available.\r\n").await?;
            }
            "STOR" => {
                ctx.log(
                    session,
                    EventKind::FileTransfer,
                    serde_json::json!({"direction": "upload", "filename": arg}),
                );
                writer.write_all(b"150 Ok to send data.\r\n").await?;
                // Drain (and discard) up to 64 KB of whatever they try to drop.
                let mut sink = vec![0u8; 65536];
                let _ = tokio::time::timeout(Duration::from_secs(5), reader.read(&mut sink)).await;
                writer.write_all(b"226 Transfer complete.\r\n").await?;
            }
            "CWD" => {
                ctx.log(session, EventKind::Command, serde_json::json!({"command": trimmed}));
                writer.write_all(b"250 Directory changed.\r\n").await?;
            }
            "MKD" => {
                ctx.log(session, EventKind::Command, serde_json::json!({"command": trimmed}));
                writer.write_all(format!("257 \"{arg}\" created.\r\n").as_bytes()).await?;
            }
            "QUIT" => {
                writer.write_all(b"221 Goodbye.\r\n").await?;
                break;
            }
            "FEAT" => writer.write_all(b"211-Features:\r\n UTF8\r\n211 End\r\n").await?,
            "OPTS" => writer.write_all(b"200 OK.\r\n").await?,
            _ => {
                ctx.log(session, EventKind::Command, serde_json::json!({"command": trimmed}));
                writer
                    .write_all(format!("502 Command '{cmd}' not implemented.\r\n").as_bytes())
                    .await?;
            }
        }
    }
    Ok(())
}
