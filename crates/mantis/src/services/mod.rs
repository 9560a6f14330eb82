// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared emulator skeleton: session lifecycle + event logging helpers and
//! the per-service listener wiring.
//!
//! Every emulator receives a [`ServiceContext`] — the capability record that
//! persists sessions, logs events (feeding the detection engine
//! synchronously), and kicks off background geo lookups — plus a
//! cancellation token for cooperative shutdown.

pub mod adb;
pub mod bson;
pub mod ftp;
pub mod http;
pub mod mongodb;
pub mod mysql;
pub mod redis;
pub mod shell;
pub mod smb;
pub mod smtp;
pub mod ssh;
pub mod telnet;
pub mod vnc;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertEngine;
use crate::config::ServiceConfig;
use crate::geo::GeoLocator;
use crate::models::{now_iso, Event, EventKind, ServiceKind, Session};
use crate::storage::Storage;

/// Capabilities every emulator closes over.
pub struct ServiceContext {
    pub service: ServiceKind,
    pub config: ServiceConfig,
    pub storage: Arc<Storage>,
    pub alerts: Arc<AlertEngine>,
    pub geo: Arc<GeoLocator>,
}

impl ServiceContext {
    pub fn new(
        service: ServiceKind,
        config: ServiceConfig,
        storage: Arc<Storage>,
        alerts: Arc<AlertEngine>,
        geo: Arc<GeoLocator>,
    ) -> Arc<Self> {
        Arc::new(Self { service, config, storage, alerts, geo })
    }

    /// Persist a new session, emit its `connection` event, and start a
    /// background geo lookup for the source address.
    pub fn create_session(
        &self,
        src_ip: &str,
        src_port: u16,
        metadata: serde_json::Value,
    ) -> Session {
        let session = Session::new(self.service, src_ip, src_port, self.config.port, metadata);
        if let Err(e) = self.storage.save_session(&session) {
            tracing::error!(service = %self.service, err = %e, "failed to persist session");
        }
        tracing::info!(
            service = %self.service,
            session = %&session.id[..8],
            src = %format!("{src_ip}:{src_port}"),
            "new session"
        );
        self.log(
            &session,
            EventKind::Connection,
            serde_json::json!({
                "message": format!("New {} connection", self.service.as_str().to_uppercase()),
            }),
        );

        let geo = Arc::clone(&self.geo);
        let ip = src_ip.to_owned();
        tokio::spawn(async move {
            geo.lookup(&ip).await;
        });

        session
    }

    /// Persist an event and feed it synchronously through the detection
    /// engine. Storage failures are logged, never propagated to the wire
    /// loop.
    pub fn log(&self, session: &Session, kind: EventKind, data: serde_json::Value) -> Event {
        let event = Event::new(session, kind, data);
        let event = match self.storage.save_event(event.clone()) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(service = %self.service, err = %e, "failed to persist event");
                event
            }
        };
        self.alerts.process_event(&event);
        event
    }

    /// Stamp the end timestamp, persist, and emit the `disconnect` event.
    pub fn end_session(&self, session: &mut Session) {
        session.ended_at = Some(now_iso());
        if let Err(e) = self.storage.save_session(session) {
            tracing::error!(service = %self.service, err = %e, "failed to persist session end");
        }
        self.log(
            session,
            EventKind::Disconnect,
            serde_json::json!({
                "message": format!("{} session ended", self.service.as_str().to_uppercase()),
            }),
        );
    }
}

/// A running service instance: its bound addresses and the accept tasks.
pub struct ServiceHandle {
    pub service: ServiceKind,
    pub addrs: Vec<SocketAddr>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn new(service: ServiceKind, cancel: CancellationToken) -> Self {
        Self { service, addrs: Vec::new(), cancel, tasks: Vec::new() }
    }

    /// The primary bound address (first listener).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }

    pub fn push(&mut self, addr: SocketAddr, task: JoinHandle<()>) {
        self.addrs.push(addr);
        self.tasks.push(task);
    }

    /// Stop accepting, cancel in-flight handlers, and wait for the listener
    /// tasks to drain.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!(service = %self.service, "service stopped");
    }
}

/// Bind `0.0.0.0:<port>` and run an accept loop until cancellation. Each
/// connection gets its own task; a handler error is logged at debug and
/// closes only that connection.
pub async fn spawn_listener<F, Fut>(
    ctx: Arc<ServiceContext>,
    port: u16,
    cancel: CancellationToken,
    handler: F,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)>
where
    F: Fn(Arc<ServiceContext>, TcpStream, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    let service = ctx.service;
    tracing::info!(service = %service, %addr, "listening");

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::debug!(service = %service, err = %e, "accept failed");
                            continue;
                        }
                    };
                    let ctx = Arc::clone(&ctx);
                    let handler = handler.clone();
                    let conn_cancel = cancel.clone();
                    tokio::spawn(async move {
                        let dialogue = handler(ctx, stream, peer);
                        tokio::select! {
                            _ = conn_cancel.cancelled() => {}
                            result = dialogue => {
                                if let Err(e) = result {
                                    tracing::debug!(service = %service, peer = %peer, err = %e, "connection handler error");
                                }
                            }
                        }
                    });
                }
            }
        }
    });
    Ok((addr, task))
}
