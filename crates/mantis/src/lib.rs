// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MANTIS: a multi-service network honeypot.
//!
//! Low-interaction protocol emulators (SSH, HTTP, FTP, SMB, MySQL, Telnet,
//! SMTP, MongoDB, VNC, Redis, ADB) capture attacker sessions into SQLite,
//! run every event through a detection engine, and stream the results to an
//! operator dashboard over HTTP + WebSocket.

pub mod alerts;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod geo;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;
