// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration: per-service knobs plus global dashboard, alerting,
//! and storage settings. Loaded from an optional YAML file merged over the
//! built-in defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::ServiceKind;

/// Knobs for one emulated service. Unknown YAML keys land in `extra`
/// (e.g. telnet's `additional_ports`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub port: u16,
    pub banner: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { enabled: true, port: 0, banner: String::new(), extra: BTreeMap::new() }
    }
}

impl ServiceConfig {
    fn with_port(port: u16) -> Self {
        Self { port, ..Default::default() }
    }

    fn with_banner(port: u16, banner: &str) -> Self {
        Self { port, banner: banner.to_owned(), ..Default::default() }
    }

    /// Extra ports this service should also listen on (`additional_ports`).
    pub fn additional_ports(&self) -> Vec<u16> {
        self.extra
            .get("additional_ports")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|p| p.as_u64().map(|p| p as u16)).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, host: "0.0.0.0".to_owned(), port: 8843, auth_token: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub webhook_headers: BTreeMap<String, String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { enabled: true, webhook_url: None, webhook_headers: BTreeMap::new() }
    }
}

/// Full honeypot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MantisConfig {
    pub ssh: ServiceConfig,
    pub http: ServiceConfig,
    pub ftp: ServiceConfig,
    pub smb: ServiceConfig,
    pub mysql: ServiceConfig,
    pub telnet: ServiceConfig,
    pub smtp: ServiceConfig,
    pub mongodb: ServiceConfig,
    pub vnc: ServiceConfig,
    pub redis: ServiceConfig,
    pub adb: ServiceConfig,
    pub dashboard: DashboardConfig,
    pub alerts: AlertConfig,
    pub database_path: String,
    pub log_level: String,
    pub log_format: String,
    /// Base URL of the external geolocation JSON endpoint.
    pub geo_api_url: String,
}

impl Default for MantisConfig {
    fn default() -> Self {
        let mut telnet = ServiceConfig::with_banner(2323, "gateway-01 login: ");
        telnet.extra.insert("additional_ports".to_owned(), serde_json::json!([23]));
        Self {
            ssh: ServiceConfig::with_banner(2222, "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6"),
            http: ServiceConfig::with_port(8080),
            ftp: ServiceConfig::with_banner(21, "220 FTP Server ready."),
            smb: ServiceConfig::with_port(4450),
            mysql: ServiceConfig::with_banner(3306, "5.7.42-0ubuntu0.18.04.1"),
            telnet,
            smtp: ServiceConfig::with_banner(25, "220 mail.example.com ESMTP Postfix (Ubuntu)"),
            mongodb: ServiceConfig::with_banner(27017, "6.0.12"),
            vnc: ServiceConfig::with_banner(5900, "prod-workstation:0"),
            redis: ServiceConfig::with_port(6379),
            adb: ServiceConfig::with_banner(5555, "device::Pixel 7"),
            dashboard: DashboardConfig::default(),
            alerts: AlertConfig::default(),
            database_path: "mantis.db".to_owned(),
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
            geo_api_url: "http://ip-api.com/json".to_owned(),
        }
    }
}

impl MantisConfig {
    /// Load from a YAML file, merging over the built-in defaults. A service
    /// section that omits `port` keeps its default port.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: MantisConfig = serde_yaml::from_str(&contents)?;
        config.restore_default_ports();
        config.validate()?;
        Ok(config)
    }

    /// Serde fills omitted per-service ports with 0; put the defaults back.
    fn restore_default_ports(&mut self) {
        let defaults = MantisConfig::default();
        for svc in ServiceKind::ALL {
            let default_port = defaults.service(svc).port;
            let cfg = self.service_mut(svc);
            if cfg.port == 0 {
                cfg.port = default_port;
            }
        }
        if self.dashboard.port == 0 {
            self.dashboard.port = defaults.dashboard.port;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for svc in ServiceKind::ALL {
            let cfg = self.service(svc);
            if cfg.enabled && cfg.port == 0 {
                anyhow::bail!("service {svc} is enabled but has no port");
            }
        }
        if self.dashboard.enabled && self.dashboard.port == 0 {
            anyhow::bail!("dashboard is enabled but has no port");
        }
        if self.database_path.is_empty() {
            anyhow::bail!("database_path must not be empty");
        }
        Ok(())
    }

    pub fn service(&self, kind: ServiceKind) -> &ServiceConfig {
        match kind {
            ServiceKind::Ssh => &self.ssh,
            ServiceKind::Http => &self.http,
            ServiceKind::Ftp => &self.ftp,
            ServiceKind::Smb => &self.smb,
            ServiceKind::Mysql => &self.mysql,
            ServiceKind::Telnet => &self.telnet,
            ServiceKind::Smtp => &self.smtp,
            ServiceKind::Mongodb => &self.mongodb,
            ServiceKind::Vnc => &self.vnc,
            ServiceKind::Redis => &self.redis,
            ServiceKind::Adb => &self.adb,
        }
    }

    pub fn service_mut(&mut self, kind: ServiceKind) -> &mut ServiceConfig {
        match kind {
            ServiceKind::Ssh => &mut self.ssh,
            ServiceKind::Http => &mut self.http,
            ServiceKind::Ftp => &mut self.ftp,
            ServiceKind::Smb => &mut self.smb,
            ServiceKind::Mysql => &mut self.mysql,
            ServiceKind::Telnet => &mut self.telnet,
            ServiceKind::Smtp => &mut self.smtp,
            ServiceKind::Mongodb => &mut self.mongodb,
            ServiceKind::Vnc => &mut self.vnc,
            ServiceKind::Redis => &mut self.redis,
            ServiceKind::Adb => &mut self.adb,
        }
    }

    pub fn enabled_services(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL.iter().copied().filter(|s| self.service(*s).enabled).collect()
    }

    /// The dict exposed at `GET /api/config`. The dashboard auth token and
    /// webhook headers are deliberately omitted.
    pub fn to_dict(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for svc in ServiceKind::ALL {
            let cfg = self.service(svc);
            root.insert(
                svc.as_str().to_owned(),
                serde_json::json!({
                    "enabled": cfg.enabled,
                    "port": cfg.port,
                    "banner": cfg.banner,
                }),
            );
        }
        root.insert(
            "dashboard".to_owned(),
            serde_json::json!({
                "enabled": self.dashboard.enabled,
                "host": self.dashboard.host,
                "port": self.dashboard.port,
            }),
        );
        root.insert(
            "alerts".to_owned(),
            serde_json::json!({
                "enabled": self.alerts.enabled,
                "webhook_url": self.alerts.webhook_url,
            }),
        );
        root.insert("database_path".to_owned(), serde_json::json!(self.database_path));
        root.insert("log_level".to_owned(), serde_json::json!(self.log_level));
        serde_json::Value::Object(root)
    }

    /// Apply a config patch to one service. Recognized keys: `enabled`,
    /// `port`, `banner`; everything else is stored in `extra`.
    pub fn apply_service_patch(
        &mut self,
        kind: ServiceKind,
        patch: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let obj = patch
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("service config patch must be an object"))?;
        let cfg = self.service_mut(kind);
        for (key, value) in obj {
            match key.as_str() {
                "enabled" => {
                    cfg.enabled = value
                        .as_bool()
                        .ok_or_else(|| anyhow::anyhow!("enabled must be a boolean"))?;
                }
                "port" => {
                    let port = value
                        .as_u64()
                        .filter(|p| (1..=65535).contains(p))
                        .ok_or_else(|| anyhow::anyhow!("port must be in 1..=65535"))?;
                    cfg.port = port as u16;
                }
                "banner" => {
                    cfg.banner = value
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("banner must be a string"))?
                        .to_owned();
                }
                other => {
                    cfg.extra.insert(other.to_owned(), value.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
