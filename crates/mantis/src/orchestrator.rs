// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator: wires storage, the detection engine, the geo locator, and
//! every enabled emulator; owns hot reconfiguration and graceful shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::alerts::AlertEngine;
use crate::config::MantisConfig;
use crate::geo::GeoLocator;
use crate::models::ServiceKind;
use crate::services::{self, ServiceContext, ServiceHandle};
use crate::storage::Storage;

/// Outcome of bring-up, for the CLI checklist.
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<(ServiceKind, SocketAddr)>,
    pub failed: Vec<(ServiceKind, String)>,
}

pub struct Orchestrator {
    config: Mutex<MantisConfig>,
    pub storage: Arc<Storage>,
    pub alerts: Arc<AlertEngine>,
    pub geo: Arc<GeoLocator>,
    services: tokio::sync::Mutex<Vec<ServiceHandle>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Open storage and construct the detection engine and geo locator.
    pub fn new(config: MantisConfig) -> anyhow::Result<Arc<Self>> {
        let storage = Arc::new(Storage::open(&config.database_path)?);
        let alerts = Arc::new(AlertEngine::new(Arc::clone(&storage), &config.alerts));
        let geo = Arc::new(GeoLocator::new(Arc::clone(&storage), config.geo_api_url.clone()));
        Ok(Arc::new(Self {
            config: Mutex::new(config),
            storage,
            alerts,
            geo,
            services: tokio::sync::Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    /// In-memory construction for tests.
    pub fn new_in_memory(config: MantisConfig) -> anyhow::Result<Arc<Self>> {
        let storage = Arc::new(Storage::open_in_memory()?);
        let alerts = Arc::new(AlertEngine::new(Arc::clone(&storage), &config.alerts));
        let geo = Arc::new(GeoLocator::new(Arc::clone(&storage), config.geo_api_url.clone()));
        Ok(Arc::new(Self {
            config: Mutex::new(config),
            storage,
            alerts,
            geo,
            services: tokio::sync::Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn lock_config(&self) -> std::sync::MutexGuard<'_, MantisConfig> {
        match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn config_dict(&self) -> serde_json::Value {
        self.lock_config().to_dict()
    }

    pub fn dashboard_config(&self) -> crate::config::DashboardConfig {
        self.lock_config().dashboard.clone()
    }

    /// Bring up every enabled service. Bind failures are reported and do not
    /// abort the run.
    pub async fn start_services(self: &Arc<Self>) -> StartReport {
        let mut report = StartReport::default();
        let enabled = self.lock_config().enabled_services();
        for kind in enabled {
            match self.spawn_service(kind).await {
                Ok(addr) => report.started.push((kind, addr)),
                Err(e) => {
                    tracing::error!(service = %kind, err = %e, "failed to start service");
                    report.failed.push((kind, e.to_string()));
                }
            }
        }
        report
    }

    async fn spawn_service(self: &Arc<Self>, kind: ServiceKind) -> anyhow::Result<SocketAddr> {
        let config = self.lock_config().service(kind).clone();
        let ctx = ServiceContext::new(
            kind,
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.alerts),
            Arc::clone(&self.geo),
        );
        let shutdown = self.shutdown.clone();
        let handle = match kind {
            ServiceKind::Ssh => services::ssh::start(ctx, shutdown).await?,
            ServiceKind::Http => services::http::start(ctx, shutdown).await?,
            ServiceKind::Ftp => services::ftp::start(ctx, shutdown).await?,
            ServiceKind::Smb => services::smb::start(ctx, shutdown).await?,
            ServiceKind::Mysql => services::mysql::start(ctx, shutdown).await?,
            ServiceKind::Telnet => services::telnet::start(ctx, shutdown).await?,
            ServiceKind::Smtp => services::smtp::start(ctx, shutdown).await?,
            ServiceKind::Mongodb => services::mongodb::start(ctx, shutdown).await?,
            ServiceKind::Vnc => services::vnc::start(ctx, shutdown).await?,
            ServiceKind::Redis => services::redis::start(ctx, shutdown).await?,
            ServiceKind::Adb => services::adb::start(ctx, shutdown).await?,
        };
        let addr = handle
            .local_addr()
            .ok_or_else(|| anyhow::anyhow!("service bound no listener"))?;
        self.services.lock().await.push(handle);
        Ok(addr)
    }

    /// The bound address of a running service, if any (tests use this to
    /// reach listeners bound to port 0).
    pub async fn service_addr(&self, kind: ServiceKind) -> Option<SocketAddr> {
        let services = self.services.lock().await;
        services.iter().find(|h| h.service == kind).and_then(|h| h.local_addr())
    }

    /// Apply a config patch to one service: stop the running instance,
    /// mutate the config record, start a new instance if enabled. Errors
    /// during restart are reported and the config is left as patched.
    pub async fn update_service_config(
        self: &Arc<Self>,
        name: &str,
        patch: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let kind = ServiceKind::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown service: {name}"))?;
        self.lock_config().apply_service_patch(kind, patch)?;

        let existing = {
            let mut services = self.services.lock().await;
            services.iter().position(|h| h.service == kind).map(|pos| services.remove(pos))
        };
        if let Some(handle) = existing {
            handle.stop().await;
        }

        let enabled = self.lock_config().service(kind).enabled;
        if enabled {
            match self.spawn_service(kind).await {
                Ok(addr) => tracing::info!(service = %kind, %addr, "service restarted"),
                Err(e) => tracing::error!(service = %kind, err = %e, "service restart failed"),
            }
        }
        Ok(self.config_dict())
    }

    /// Wipe all captured data and the stateful rule windows together.
    pub fn reset_database(&self) -> anyhow::Result<()> {
        self.storage.reset_database()?;
        self.alerts.reset_stateful_rules();
        Ok(())
    }

    /// Stop every service, then close the storage. The dashboard (if any)
    /// is stopped by the caller before this.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut services = self.services.lock().await;
        for handle in services.drain(..) {
            handle.stop().await;
        }
        self.storage.close();
        tracing::info!("shutdown complete");
    }
}
