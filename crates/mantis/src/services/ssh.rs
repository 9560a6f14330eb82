// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH emulator: a russh-based SSH-2 server that accepts every password and
//! public-key offer, grants a PTY, and runs the canned root shell. The host
//! key is generated on first run and persisted next to the database.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{decode_secret_key, Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::models::EventKind;
use crate::services::shell::{bash_response, SSH_RESPONSES};
use crate::services::{spawn_listener, ServiceContext, ServiceHandle};

const DEFAULT_BANNER: &str = "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6";
const DEFAULT_HOST_KEY_PATH: &str = ".mantis_ssh_host_key";

const WELCOME: &str =
    "Welcome to Ubuntu 22.04.3 LTS (GNU/Linux 5.15.0-91-generic x86_64)\r\n\r\n";
const LAST_LOGIN: &str = "Last login: Mon Jan 15 08:45:12 2024 from 10.0.1.1\r\n";
const PROMPT: &str = "root@prod-web-01:~# ";

/// Load the persisted host key, generating an ed25519 key on first run.
pub fn load_or_create_host_key(path: &Path) -> anyhow::Result<PrivateKey> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        return Ok(decode_secret_key(&contents, None)?);
    }
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
    let pem = key.to_openssh(russh::keys::ssh_key::LineEnding::LF)?;
    std::fs::write(path, pem.as_bytes())?;
    tracing::info!(path = %path.display(), "generated new SSH host key");
    Ok(key)
}

fn host_key_path(ctx: &ServiceContext) -> PathBuf {
    ctx.config
        .extra
        .get("host_key_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_KEY_PATH))
}

pub async fn start(
    ctx: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<ServiceHandle> {
    let host_key = load_or_create_host_key(&host_key_path(&ctx))?;
    let banner =
        if ctx.config.banner.is_empty() { DEFAULT_BANNER } else { ctx.config.banner.as_str() };

    let config = Arc::new(russh::server::Config {
        server_id: russh::SshId::Standard(banner.to_owned()),
        keys: vec![host_key],
        inactivity_timeout: Some(Duration::from_secs(120)),
        auth_rejection_time: Duration::from_secs(0),
        ..Default::default()
    });

    let cancel = shutdown.child_token();
    let mut handle = ServiceHandle::new(ctx.service, cancel.clone());
    let (addr, task) = spawn_listener(
        Arc::clone(&ctx),
        ctx.config.port,
        cancel,
        move |ctx, stream, peer| handle_client(Arc::clone(&config), ctx, stream, peer),
    )
    .await?;
    handle.push(addr, task);
    Ok(handle)
}

async fn handle_client(
    config: Arc<russh::server::Config>,
    ctx: Arc<ServiceContext>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let session = ctx.create_session(&peer.ip().to_string(), peer.port(), serde_json::json!({}));
    let mut end_copy = session.clone();

    let handler = SshConnection {
        ctx: Arc::clone(&ctx),
        session,
        username: String::new(),
        line: Vec::new(),
        closed: false,
    };

    let result = async {
        let running = russh::server::run_stream(config, stream, handler).await?;
        running.await?;
        Ok::<_, russh::Error>(())
    }
    .await;

    ctx.end_session(&mut end_copy);
    if let Err(e) = result {
        tracing::debug!(service = %ctx.service, peer = %peer, err = %e, "ssh transport error");
    }
    Ok(())
}

struct SshConnection {
    ctx: Arc<ServiceContext>,
    session: crate::models::Session,
    username: String,
    line: Vec<u8>,
    closed: bool,
}

impl SshConnection {
    fn send(&self, session: &mut Session, channel: ChannelId, text: &str) {
        let _ = session.data(channel, CryptoVec::from(text.as_bytes().to_vec()));
    }

    /// Run one submitted line through the canned shell. Returns `false` when
    /// the command terminates the session.
    fn run_command(&mut self, session: &mut Session, channel: ChannelId, command: &str) -> bool {
        self.ctx.log(
            &self.session,
            EventKind::Command,
            serde_json::json!({"command": command, "username": self.username}),
        );

        if matches!(command, "exit" | "quit" | "logout") {
            self.send(session, channel, "logout\r\n");
            let _ = session.close(channel);
            return false;
        }

        let response = bash_response(SSH_RESPONSES, command);
        if !response.is_empty() {
            let crlf = response.replace('\n', "\r\n");
            self.send(session, channel, &crlf);
            self.send(session, channel, "\r\n");
        }
        true
    }
}

impl Handler for SshConnection {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.username = user.to_owned();
        self.ctx.log(
            &self.session,
            EventKind::AuthAttempt,
            serde_json::json!({"username": user, "password": password}),
        );
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.username = user.to_owned();
        self.ctx.log(
            &self.session,
            EventKind::AuthAttempt,
            serde_json::json!({
                "username": user,
                "key_type": public_key.algorithm().to_string(),
                "key_fingerprint": public_key.fingerprint(HashAlg::Sha256).to_string(),
            }),
        );
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        self.send(session, channel, WELCOME);
        self.send(session, channel, LAST_LOGIN);
        self.send(session, channel, PROMPT);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let command = String::from_utf8_lossy(data).trim().to_owned();
        if !command.is_empty() {
            self.ctx.log(
                &self.session,
                EventKind::Command,
                serde_json::json!({"command": command, "username": self.username, "mode": "exec"}),
            );
            let response = bash_response(SSH_RESPONSES, &command);
            if !response.is_empty() {
                let crlf = response.replace('\n', "\r\n");
                self.send(session, channel, &crlf);
                self.send(session, channel, "\r\n");
            }
        }
        let _ = session.exit_status_request(channel, 0);
        let _ = session.close(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.closed {
            return Ok(());
        }
        for byte in data {
            match byte {
                b'\r' | b'\n' => {
                    self.send(session, channel, "\r\n");
                    let command =
                        String::from_utf8_lossy(&self.line).trim().to_owned();
                    self.line.clear();
                    if !command.is_empty() && !self.run_command(session, channel, &command) {
                        self.closed = true;
                        return Ok(());
                    }
                    self.send(session, channel, PROMPT);
                }
                0x7f | 0x08 => {
                    if self.line.pop().is_some() {
                        self.send(session, channel, "\u{8} \u{8}");
                    }
                }
                0x03 => {
                    // Ctrl-C: discard the line, reprint the prompt.
                    self.line.clear();
                    self.send(session, channel, "^C\r\n");
                    self.send(session, channel, PROMPT);
                }
                0x04 => {
                    // Ctrl-D: end the session.
                    let _ = session.close(channel);
                    self.closed = true;
                    return Ok(());
                }
                byte if *byte >= 0x20 => {
                    self.line.push(*byte);
                    let echo = [*byte];
                    let _ = session.data(channel, CryptoVec::from(echo.to_vec()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
