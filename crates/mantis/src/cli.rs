// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface: config loading with flag/env overrides, the startup
//! checklist, and the `stats` subcommand.

use std::path::PathBuf;

use clap::Parser;

use crate::config::MantisConfig;

/// Multi-service network honeypot.
#[derive(Debug, Parser)]
#[command(name = "mantis", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "MANTIS_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file).
    #[arg(long, env = "MANTIS_DB")]
    pub database: Option<String>,

    /// Dashboard auth token (overrides the config file).
    #[arg(long, env = "MANTIS_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MANTIS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "MANTIS_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Print capture statistics from the database and exit.
    Stats,
}

impl Cli {
    /// Resolve the effective configuration: file, then flag/env overrides.
    pub fn resolve_config(&self) -> anyhow::Result<MantisConfig> {
        let mut config = match self.config {
            Some(ref path) => MantisConfig::load(path)?,
            None => MantisConfig::default(),
        };
        if let Some(ref database) = self.database {
            config.database_path = database.clone();
        }
        if let Some(ref token) = self.auth_token {
            config.dashboard.auth_token = Some(token.clone());
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.log_format = format.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Initialize tracing from the resolved config, honoring `RUST_LOG`.
pub fn init_tracing(config: &MantisConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// One checklist line for the startup report.
pub fn checklist_line(ok: bool, text: &str) -> String {
    if ok {
        format!("  \u{2714} {text}")
    } else {
        format!("  \u{2718} {text}")
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
