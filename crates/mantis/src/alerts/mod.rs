// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection engine: stateless pattern rules and stateful sliding-window
//! rules run against every captured event, plus asynchronous webhook
//! dispatch for every alert produced.

pub mod ioc;
pub mod patterns;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::AlertConfig;
use crate::models::{now_iso, Alert, Event, EventKind, ServiceKind, Severity};
use crate::storage::Storage;

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// -- Stateless rules ----------------------------------------------------------

fn check_ssh_shell_access(event: &Event) -> Option<Alert> {
    if event.service != ServiceKind::Ssh || event.event_type != EventKind::Command {
        return None;
    }
    let command = event.data.get("command").and_then(|c| c.as_str()).unwrap_or("?");
    Some(Alert::new(
        "ssh_shell_access",
        Severity::Critical,
        &event.src_ip,
        event.service.as_str(),
        format!("SSH shell command from {}: {}", event.src_ip, truncate_chars(command, 100)),
        event.id.into_iter().collect(),
    ))
}

fn check_payload_captured(event: &Event) -> Option<Alert> {
    if event.event_type != EventKind::FileTransfer {
        return None;
    }
    let direction = event.data.get("direction").and_then(|d| d.as_str()).unwrap_or("unknown");
    let filename = event.data.get("filename").and_then(|f| f.as_str()).unwrap_or("unknown");
    Some(Alert::new(
        "payload_captured",
        Severity::Critical,
        &event.src_ip,
        event.service.as_str(),
        format!("File {direction} attempt from {}: {filename}", event.src_ip),
        event.id.into_iter().collect(),
    ))
}

fn check_ntlm_hash_captured(event: &Event) -> Option<Alert> {
    if event.service != ServiceKind::Smb || event.event_type != EventKind::NtlmAuth {
        return None;
    }
    let user = event.data.get("username").and_then(|u| u.as_str()).unwrap_or("unknown");
    let domain = event.data.get("domain").and_then(|d| d.as_str()).unwrap_or("");
    Some(Alert::new(
        "ntlm_hash_captured",
        Severity::High,
        &event.src_ip,
        event.service.as_str(),
        format!("NTLM auth captured from {}: {domain}\\{user}", event.src_ip),
        event.id.into_iter().collect(),
    ))
}

fn check_mysql_query(event: &Event) -> Option<Alert> {
    if event.service != ServiceKind::Mysql || event.event_type != EventKind::Query {
        return None;
    }
    let query = event.data.get("query").and_then(|q| q.as_str()).unwrap_or("?");
    Some(Alert::new(
        "mysql_query",
        Severity::High,
        &event.src_ip,
        event.service.as_str(),
        format!("MySQL query from {}: {}", event.src_ip, truncate_chars(query, 200)),
        event.id.into_iter().collect(),
    ))
}

/// Corpus scanned by the HTTP threat rule: path + body + UA + query + header
/// values.
pub fn http_corpus(data: &serde_json::Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in ["path", "body", "user_agent"] {
        if let Some(value) = data.get(field).and_then(|v| v.as_str()) {
            parts.push(value.to_owned());
        }
    }
    if let Some(query) = data.get("query") {
        if !query.is_null() {
            parts.push(query.to_string());
        }
    }
    if let Some(headers) = data.get("headers").and_then(|h| h.as_object()) {
        for value in headers.values() {
            if let Some(text) = value.as_str() {
                parts.push(text.to_owned());
            }
        }
    }
    parts.join(" ")
}

fn check_http_threat(event: &Event) -> Option<Alert> {
    if event.service != ServiceKind::Http || event.event_type != EventKind::Request {
        return None;
    }
    let corpus = http_corpus(&event.data);
    let matches = patterns::scan(&patterns::HTTP_THREAT_PATTERNS, &corpus);
    let severity = patterns::worst_severity(&matches)?;
    let names: Vec<&str> = matches.iter().map(|m| m.name).collect();
    let path = event.data.get("path").and_then(|p| p.as_str()).unwrap_or("?");
    Some(
        Alert::new(
            "http_threat",
            severity,
            &event.src_ip,
            event.service.as_str(),
            format!("HTTP threat from {}: {} on {path}", event.src_ip, names.join(", ")),
            event.id.into_iter().collect(),
        )
        .with_data(serde_json::json!({
            "patterns": patterns::matches_to_json(&matches),
        })),
    )
}

/// Text-bearing payload fields scanned by the payload/IOC rule.
pub fn payload_corpus(data: &serde_json::Value) -> String {
    const TEXT_FIELDS: &[&str] = &[
        "command",
        "raw",
        "query",
        "body",
        "body_preview",
        "path",
        "destination",
        "filename",
        "script",
        "text",
        "value",
    ];
    let mut parts: Vec<String> = Vec::new();
    for field in TEXT_FIELDS {
        if let Some(value) = data.get(*field).and_then(|v| v.as_str()) {
            parts.push(value.to_owned());
        }
    }
    if let Some(args) = data.get("args").and_then(|a| a.as_array()) {
        for arg in args {
            if let Some(text) = arg.as_str() {
                parts.push(text.to_owned());
            }
        }
    }
    parts.join(" ")
}

fn check_payload_ioc(event: &Event) -> Option<Alert> {
    if !matches!(
        event.event_type,
        EventKind::Command | EventKind::Request | EventKind::Query | EventKind::FileTransfer
    ) {
        return None;
    }
    let corpus = payload_corpus(&event.data);
    if corpus.is_empty() {
        return None;
    }
    let matches = patterns::scan(&patterns::PAYLOAD_PATTERNS, &corpus);
    let iocs = ioc::extract(&corpus);
    if matches.is_empty() && !iocs.has_significant() {
        return None;
    }
    let severity = patterns::worst_severity(&matches).unwrap_or(Severity::Medium);
    let summary = if matches.is_empty() {
        "indicators of compromise".to_owned()
    } else {
        matches.iter().map(|m| m.name).collect::<Vec<_>>().join(", ")
    };
    Some(
        Alert::new(
            "payload_ioc",
            severity,
            &event.src_ip,
            event.service.as_str(),
            format!("Payload detected from {}: {summary}", event.src_ip),
            event.id.into_iter().collect(),
        )
        .with_data(serde_json::json!({
            "patterns": patterns::matches_to_json(&matches),
            "iocs": iocs.to_json(),
        })),
    )
}

/// All stateless rules, in evaluation order.
fn stateless_alerts(event: &Event) -> Vec<Alert> {
    [
        check_ssh_shell_access(event),
        check_payload_captured(event),
        check_ntlm_hash_captured(event),
        check_mysql_query(event),
        check_http_threat(event),
        check_payload_ioc(event),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// -- Stateful rules -----------------------------------------------------------

/// Sliding-window counter over auth attempts per source IP. Alerts once per
/// IP per process lifetime (sticky), clearing only on reset.
pub struct BruteForceRule {
    threshold: usize,
    window: Duration,
    counters: HashMap<String, Vec<Instant>>,
    alerted: HashSet<String>,
}

impl BruteForceRule {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window, counters: HashMap::new(), alerted: HashSet::new() }
    }

    pub fn observe(&mut self, event: &Event, now: Instant) -> Option<Alert> {
        if event.event_type != EventKind::AuthAttempt {
            return None;
        }
        let timestamps = self.counters.entry(event.src_ip.clone()).or_default();
        timestamps.push(now);
        timestamps.retain(|t| now.duration_since(*t) <= self.window);

        let count = timestamps.len();
        if count >= self.threshold && !self.alerted.contains(&event.src_ip) {
            self.alerted.insert(event.src_ip.clone());
            return Some(Alert::new(
                "brute_force",
                Severity::High,
                &event.src_ip,
                event.service.as_str(),
                format!(
                    "Brute force detected: {count} auth attempts from {} in {}s",
                    event.src_ip,
                    self.window.as_secs()
                ),
                event.id.into_iter().collect(),
            ));
        }
        None
    }
}

/// Sliding window of distinct services probed per source IP. Sticky like the
/// brute-force rule.
pub struct ReconnaissanceRule {
    threshold: usize,
    window: Duration,
    tracking: HashMap<String, BTreeMap<String, Instant>>,
    alerted: HashSet<String>,
}

impl ReconnaissanceRule {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window, tracking: HashMap::new(), alerted: HashSet::new() }
    }

    pub fn observe(&mut self, event: &Event, now: Instant) -> Option<Alert> {
        if event.event_type != EventKind::Connection {
            return None;
        }
        let services = self.tracking.entry(event.src_ip.clone()).or_default();
        services.retain(|_, first_seen| now.duration_since(*first_seen) <= self.window);
        services.insert(event.service.as_str().to_owned(), now);

        let count = services.len();
        if count >= self.threshold && !self.alerted.contains(&event.src_ip) {
            self.alerted.insert(event.src_ip.clone());
            let names: Vec<String> = services.keys().cloned().collect();
            return Some(Alert::new(
                "reconnaissance",
                Severity::Medium,
                &event.src_ip,
                names.join(","),
                format!(
                    "Reconnaissance: {} probed {count} services: {}",
                    event.src_ip,
                    names.join(", ")
                ),
                event.id.into_iter().collect(),
            ));
        }
        None
    }
}

struct StatefulRules {
    brute_force: BruteForceRule,
    reconnaissance: ReconnaissanceRule,
}

impl StatefulRules {
    fn new() -> Self {
        Self {
            brute_force: BruteForceRule::new(20, Duration::from_secs(300)),
            reconnaissance: ReconnaissanceRule::new(3, Duration::from_secs(600)),
        }
    }
}

// -- Engine -------------------------------------------------------------------

/// Runs every event through all rules and persists + dispatches the alerts.
pub struct AlertEngine {
    storage: Arc<Storage>,
    webhook_url: Option<String>,
    webhook_headers: BTreeMap<String, String>,
    client: reqwest::Client,
    state: Mutex<StatefulRules>,
}

impl AlertEngine {
    pub fn new(storage: Arc<Storage>, config: &AlertConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let webhook_url = if config.enabled { config.webhook_url.clone() } else { None };
        Self {
            storage,
            webhook_url,
            webhook_headers: config.webhook_headers.clone(),
            client,
            state: Mutex::new(StatefulRules::new()),
        }
    }

    /// Check one event against all rules. Produced alerts are saved (which
    /// pushes them to alert subscribers) and dispatched to the webhook.
    pub fn process_event(&self, event: &Event) -> Vec<Alert> {
        let mut produced = stateless_alerts(event);

        {
            let now = Instant::now();
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(alert) = state.brute_force.observe(event, now) {
                produced.push(alert);
            }
            if let Some(alert) = state.reconnaissance.observe(event, now) {
                produced.push(alert);
            }
        }

        let mut saved = Vec::with_capacity(produced.len());
        for alert in produced {
            match self.storage.save_alert(alert) {
                Ok(alert) => {
                    self.dispatch_webhook(&alert);
                    saved.push(alert);
                }
                Err(e) => tracing::error!(err = %e, "failed to save alert"),
            }
        }
        saved
    }

    /// Fire-and-forget webhook POST. Failures are logged and never block the
    /// event pipeline; there is no retry.
    fn dispatch_webhook(&self, alert: &Alert) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let headers = self.webhook_headers.clone();
        let rule = alert.rule_name.clone();
        let payload = serde_json::json!({
            "alert": alert,
            "source": "honeypot",
            "timestamp": now_iso(),
        });
        tokio::spawn(async move {
            let mut request = client.post(&url).json(&payload);
            for (name, value) in &headers {
                request = request.header(name, value);
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(rule, "webhook dispatched");
                }
                Ok(resp) => {
                    tracing::warn!(rule, status = %resp.status(), "webhook returned an error");
                }
                Err(e) => tracing::warn!(rule, err = %e, "webhook dispatch failed"),
            }
        });
    }

    /// Discard all sliding-window state and sticky alerted sets. Invoked
    /// jointly with the storage reset.
    pub fn reset_stateful_rules(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = StatefulRules::new();
        tracing::info!("stateful alert rules reset");
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
