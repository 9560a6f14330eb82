// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core value types shared across the capture pipeline.
//!
//! All four entities serialize to the canonical JSON form the dashboard and
//! export endpoints speak; field names are part of the wire contract.

use serde::{Deserialize, Serialize};

/// Kinds of observable attacker actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connection,
    AuthAttempt,
    Command,
    Request,
    Query,
    FileTransfer,
    NtlmAuth,
    Disconnect,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::AuthAttempt => "auth_attempt",
            Self::Command => "command",
            Self::Request => "request",
            Self::Query => "query",
            Self::FileTransfer => "file_transfer",
            Self::NtlmAuth => "ntlm_auth",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The emulated services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Ssh,
    Http,
    Ftp,
    Smb,
    Mysql,
    Telnet,
    Smtp,
    Mongodb,
    Vnc,
    Redis,
    Adb,
}

impl ServiceKind {
    /// All services in bring-up order.
    pub const ALL: [ServiceKind; 11] = [
        Self::Ssh,
        Self::Http,
        Self::Ftp,
        Self::Smb,
        Self::Mysql,
        Self::Telnet,
        Self::Smtp,
        Self::Mongodb,
        Self::Vnc,
        Self::Redis,
        Self::Adb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Ftp => "ftp",
            Self::Smb => "smb",
            Self::Mysql => "mysql",
            Self::Telnet => "telnet",
            Self::Smtp => "smtp",
            Self::Mongodb => "mongodb",
            Self::Vnc => "vnc",
            Self::Redis => "redis",
            Self::Adb => "adb",
        }
    }

    pub fn from_name(name: &str) -> Option<ServiceKind> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from worst to least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// Rank for worst-of selection; lower is worse.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Info => 4,
        }
    }

    /// The worse of two severities.
    pub fn worst(self, other: Severity) -> Severity {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time in the canonical ISO-8601 UTC form used across the store.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// An attacker's end-to-end interaction with one service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub service: ServiceKind,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub started_at: String,
    pub ended_at: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn new(
        service: ServiceKind,
        src_ip: impl Into<String>,
        src_port: u16,
        dst_port: u16,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service,
            src_ip: src_ip.into(),
            src_port,
            dst_port,
            started_at: now_iso(),
            ended_at: None,
            metadata,
        }
    }
}

/// One observable action inside a session. Appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub session_id: String,
    pub event_type: EventKind,
    pub service: ServiceKind,
    pub src_ip: String,
    pub timestamp: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(session: &Session, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            id: None,
            session_id: session.id.clone(),
            event_type: kind,
            service: session.service,
            src_ip: session.src_ip.clone(),
            timestamp: now_iso(),
            data,
        }
    }
}

/// A detection rule firing. Only the `acknowledged` flag ever mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    pub rule_name: String,
    pub severity: Severity,
    pub src_ip: String,
    /// Service tag; the reconnaissance rule stores a comma-joined list here.
    pub service: String,
    pub message: String,
    #[serde(default)]
    pub event_ids: Vec<i64>,
    pub timestamp: String,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Alert {
    pub fn new(
        rule_name: &str,
        severity: Severity,
        src_ip: impl Into<String>,
        service: impl Into<String>,
        message: impl Into<String>,
        event_ids: Vec<i64>,
    ) -> Self {
        Self {
            id: None,
            rule_name: rule_name.to_owned(),
            severity,
            src_ip: src_ip.into(),
            service: service.into(),
            message: message.into(),
            event_ids,
            timestamp: now_iso(),
            acknowledged: false,
            data: serde_json::json!({}),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Cached IP geolocation, keyed by IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoInfo {
    pub ip: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub as_number: String,
    #[serde(default)]
    pub cached_at: String,
}

impl GeoInfo {
    /// Record for an IP that could not be resolved. Never cached, so later
    /// lookups may retry.
    pub fn blank(ip: &str) -> Self {
        Self {
            ip: ip.to_owned(),
            country: "Unknown".to_owned(),
            ..Default::default()
        }
    }

    /// Synthetic record for RFC1918/loopback/link-local sources.
    pub fn private(ip: &str) -> Self {
        Self {
            ip: ip.to_owned(),
            country: "Private".to_owned(),
            city: "Local Network".to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
