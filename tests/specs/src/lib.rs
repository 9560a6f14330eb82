// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end honeypot scenarios.
//!
//! Spawns emulators (and optionally the dashboard) in-process on ephemeral
//! ports with an in-memory database, then drives them over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mantis::config::MantisConfig;
use mantis::models::ServiceKind;
use mantis::orchestrator::Orchestrator;
use mantis::storage::EventQuery;

/// Config suitable for tests: every service disabled on port 0 (ephemeral
/// bind), no dashboard, and a geo endpoint that fails instantly so no
/// lookup ever leaves the machine.
pub fn test_config() -> MantisConfig {
    let mut config = MantisConfig::default();
    for kind in ServiceKind::ALL {
        let svc = config.service_mut(kind);
        svc.enabled = false;
        svc.port = 0;
        svc.extra.clear();
    }
    config.dashboard.enabled = false;
    config.dashboard.port = 0;
    config.geo_api_url = "http://127.0.0.1:1".to_owned();
    config
}

/// Start an in-memory honeypot with the given services enabled.
pub async fn spawn_honeypot(services: &[ServiceKind]) -> anyhow::Result<Arc<Orchestrator>> {
    let mut config = test_config();
    for kind in services {
        config.service_mut(*kind).enabled = true;
    }
    let orchestrator = Orchestrator::new_in_memory(config)?;
    let report = orchestrator.start_services().await;
    if !report.failed.is_empty() {
        anyhow::bail!("services failed to start: {:?}", report.failed);
    }
    Ok(orchestrator)
}

/// The ephemeral address a service actually bound.
pub async fn service_addr(
    orchestrator: &Arc<Orchestrator>,
    kind: ServiceKind,
) -> anyhow::Result<SocketAddr> {
    orchestrator
        .service_addr(kind)
        .await
        .ok_or_else(|| anyhow::anyhow!("{kind} is not running"))
}

/// Poll until at least `min` events match the query, or time out.
pub async fn wait_for_events(
    orchestrator: &Arc<Orchestrator>,
    query: &EventQuery,
    min: usize,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let events = orchestrator.storage.get_events(query)?;
        if events.len() >= min {
            return Ok(events);
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("expected {min} events, saw {} for {query:?}", events.len());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll until at least `min` alerts for `rule_name` exist, or time out.
pub async fn wait_for_alerts(
    orchestrator: &Arc<Orchestrator>,
    rule_name: &str,
    min: usize,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let alerts: Vec<serde_json::Value> = orchestrator
            .storage
            .get_alerts(1000, false)?
            .into_iter()
            .filter(|a| a["rule_name"] == rule_name)
            .collect();
        if alerts.len() >= min {
            return Ok(alerts);
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("expected {min} {rule_name} alerts, saw {}", alerts.len());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Count alerts for one rule right now, without waiting.
pub fn count_alerts(orchestrator: &Arc<Orchestrator>, rule_name: &str) -> anyhow::Result<usize> {
    Ok(orchestrator
        .storage
        .get_alerts(1000, false)?
        .into_iter()
        .filter(|a| a["rule_name"] == rule_name)
        .count())
}
