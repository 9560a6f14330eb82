// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite persistence with real-time subscriber fan-out.
//!
//! All reads and writes go through a single `Mutex<Connection>`, which is the
//! serialized writer context: event ids are assigned in lock order, so id
//! order always matches persistence order. New events and alerts are pushed
//! into bounded broadcast channels; a receiver that falls more than the
//! channel capacity behind loses the oldest items first, so a slow dashboard
//! client can never stall the capture pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Alert, Event, GeoInfo, Session};

/// Capacity of the event and alert subscriber channels.
pub const SUBSCRIBER_CAPACITY: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    service TEXT NOT NULL,
    src_ip TEXT NOT NULL,
    src_port INTEGER NOT NULL,
    dst_port INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    metadata TEXT DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    service TEXT NOT NULL,
    src_ip TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    data TEXT DEFAULT '{}',
    FOREIGN KEY (session_id) REFERENCES sessions(id)
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_name TEXT NOT NULL,
    severity TEXT NOT NULL,
    src_ip TEXT NOT NULL,
    service TEXT NOT NULL,
    message TEXT NOT NULL,
    event_ids TEXT DEFAULT '[]',
    timestamp TEXT NOT NULL,
    acknowledged INTEGER DEFAULT 0,
    data TEXT DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS geo_cache (
    ip TEXT PRIMARY KEY,
    country TEXT,
    country_code TEXT,
    region TEXT,
    city TEXT,
    lat REAL,
    lon REAL,
    isp TEXT,
    org TEXT,
    as_number TEXT,
    cached_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_src_ip ON events(src_ip);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_service ON events(service);
CREATE INDEX IF NOT EXISTS idx_sessions_src_ip ON sessions(src_ip);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_name ON alerts(rule_name);
";

/// Filters for `get_events`. `Default` gives the first page with no filters.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub limit: i64,
    pub offset: i64,
    pub service: Option<String>,
    pub services: Option<Vec<String>>,
    pub event_type: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub src_ip: Option<String>,
    /// Substring match against the JSON-encoded payload.
    pub search: Option<String>,
    pub time_from: Option<String>,
    pub time_to: Option<String>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            service: None,
            services: None,
            event_type: None,
            event_types: None,
            src_ip: None,
            search: None,
            time_from: None,
            time_to: None,
        }
    }
}

/// Filters for `get_sessions`.
#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub limit: i64,
    pub offset: i64,
    pub src_ip: Option<String>,
    pub service: Option<String>,
    pub services: Option<Vec<String>>,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self { limit: 100, offset: 0, src_ip: None, service: None, services: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_events: i64,
    pub total_sessions: i64,
    pub total_alerts: i64,
    pub unacknowledged_alerts: i64,
    pub unique_ips: i64,
    pub events_by_service: BTreeMap<String, i64>,
    pub events_by_type: BTreeMap<String, i64>,
    pub top_ips: Vec<IpCount>,
}

/// One row of the attack map: geo cache joined against event aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct MapPoint {
    pub ip: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub city: String,
    pub isp: String,
    pub session_count: i64,
    pub event_count: i64,
    pub services: String,
}

/// Per-IP attacker aggregation with geo enrichment.
#[derive(Debug, Clone, Serialize)]
pub struct Attacker {
    pub ip: String,
    pub event_count: i64,
    pub session_count: i64,
    pub service_count: i64,
    pub services: Vec<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub auth_attempts: i64,
    pub commands: i64,
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub isp: String,
    pub org: String,
    pub as_number: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttackerPage {
    pub attackers: Vec<Attacker>,
    pub total: i64,
}

/// Durable store for sessions, events, alerts, and the geo cache.
pub struct Storage {
    conn: Mutex<Connection>,
    event_tx: broadcast::Sender<Event>,
    alert_tx: broadcast::Sender<Alert>,
    closed: AtomicBool,
}

impl Storage {
    /// Open (or create) the database, ensure the schema, and run the
    /// idempotent `alerts.data` column migration.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Read-only open for the `stats` subcommand: no schema changes, no
    /// writes, safe to run next to a live honeypot.
    pub fn open_read_only(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let (event_tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let (alert_tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Ok(Self { conn: Mutex::new(conn), event_tx, alert_tx, closed: AtomicBool::new(false) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        // Additive migration for databases created before alerts carried a
        // data payload. Fails with "duplicate column" on current schemas.
        let _ = conn.execute_batch("ALTER TABLE alerts ADD COLUMN data TEXT DEFAULT '{}';");

        let (event_tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let (alert_tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Ok(Self { conn: Mutex::new(conn), event_tx, alert_tx, closed: AtomicBool::new(false) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-write; the
        // connection itself is still usable.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mark the store closed. Subsequent writes become silent no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // -- Subscriptions --------------------------------------------------------

    /// Subscribe to newly saved events. Dropping the receiver unsubscribes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Subscribe to newly saved alerts. Dropping the receiver unsubscribes.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    // -- Writes ---------------------------------------------------------------

    /// Upsert a session row.
    pub fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO sessions \
             (id, service, src_ip, src_port, dst_port, started_at, ended_at, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                session.id,
                session.service.as_str(),
                session.src_ip,
                session.src_port,
                session.dst_port,
                session.started_at,
                session.ended_at,
                session.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Append an event, assign its id, and push it to every live subscriber.
    /// After `close()` the input is returned unchanged.
    pub fn save_event(&self, mut event: Event) -> anyhow::Result<Event> {
        if self.is_closed() {
            return Ok(event);
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO events (session_id, event_type, service, src_ip, timestamp, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.session_id,
                event.event_type.as_str(),
                event.service.as_str(),
                event.src_ip,
                event.timestamp,
                event.data.to_string(),
            ],
        )?;
        event.id = Some(conn.last_insert_rowid());
        // Send before releasing the writer lock so subscriber order always
        // matches id order.
        let _ = self.event_tx.send(event.clone());
        Ok(event)
    }

    /// Insert an alert, assign its id, and push it to alert subscribers.
    pub fn save_alert(&self, mut alert: Alert) -> anyhow::Result<Alert> {
        if self.is_closed() {
            return Ok(alert);
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alerts \
             (rule_name, severity, src_ip, service, message, event_ids, timestamp, acknowledged, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            rusqlite::params![
                alert.rule_name,
                alert.severity.as_str(),
                alert.src_ip,
                alert.service,
                alert.message,
                serde_json::to_string(&alert.event_ids)?,
                alert.timestamp,
                alert.data.to_string(),
            ],
        )?;
        alert.id = Some(conn.last_insert_rowid());
        let _ = self.alert_tx.send(alert.clone());
        Ok(alert)
    }

    /// Upsert a geo cache entry.
    pub fn save_geo(&self, geo: &GeoInfo) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO geo_cache \
             (ip, country, country_code, region, city, lat, lon, isp, org, as_number, cached_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                geo.ip,
                geo.country,
                geo.country_code,
                geo.region,
                geo.city,
                geo.lat,
                geo.lon,
                geo.isp,
                geo.org,
                geo.as_number,
                geo.cached_at,
            ],
        )?;
        Ok(())
    }

    /// Set an alert's acknowledged flag. Idempotent.
    pub fn acknowledge_alert(&self, alert_id: i64) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", [alert_id])?;
        Ok(())
    }

    /// Truncate all four tables and reclaim space. The caller is responsible
    /// for resetting the detection engine's stateful counters in concert.
    pub fn reset_database(&self) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "DELETE FROM events; DELETE FROM sessions; DELETE FROM alerts; DELETE FROM geo_cache;",
        )?;
        conn.execute_batch("VACUUM;")?;
        tracing::info!("database reset, all captured data cleared");
        Ok(())
    }

    // -- Reads ----------------------------------------------------------------

    pub fn get_geo(&self, ip: &str) -> anyhow::Result<Option<GeoInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT ip, country, country_code, region, city, lat, lon, isp, org, as_number, cached_at \
             FROM geo_cache WHERE ip = ?1",
        )?;
        let mut rows = stmt.query([ip])?;
        match rows.next()? {
            Some(row) => Ok(Some(GeoInfo {
                ip: row.get(0)?,
                country: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                country_code: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                region: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                city: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                lat: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
                lon: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
                isp: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                org: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                as_number: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                cached_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            })),
            None => Ok(None),
        }
    }

    /// Filtered event page, newest first.
    pub fn get_events(&self, query: &EventQuery) -> anyhow::Result<Vec<serde_json::Value>> {
        let (where_clause, params) = Self::event_filter_sql(query);
        let sql = format!(
            "SELECT id, session_id, event_type, service, src_ip, timestamp, data \
             FROM events WHERE 1=1{where_clause} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            params.len() + 1,
            params.len() + 2,
        );
        let mut params = params;
        params.push(SqlValue::Integer(query.limit));
        params.push(SqlValue::Integer(query.offset));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(event_row_to_json(row)?);
        }
        Ok(out)
    }

    /// Like `get_events`, but also returns the unpaged total count.
    pub fn get_events_paginated(
        &self,
        query: &EventQuery,
    ) -> anyhow::Result<(Vec<serde_json::Value>, i64)> {
        let list = self.get_events(query)?;
        let (where_clause, params) = Self::event_filter_sql(query);
        let sql = format!("SELECT COUNT(*) FROM events WHERE 1=1{where_clause}");
        let conn = self.lock();
        let total =
            conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |r| r.get(0))?;
        Ok((list, total))
    }

    fn event_filter_sql(query: &EventQuery) -> (String, Vec<SqlValue>) {
        let mut clause = String::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(ref service) = query.service {
            params.push(SqlValue::Text(service.clone()));
            clause.push_str(&format!(" AND service = ?{}", params.len()));
        }
        if let Some(ref services) = query.services {
            if !services.is_empty() {
                let mut placeholders = Vec::new();
                for svc in services {
                    params.push(SqlValue::Text(svc.clone()));
                    placeholders.push(format!("?{}", params.len()));
                }
                clause.push_str(&format!(" AND service IN ({})", placeholders.join(",")));
            }
        }
        if let Some(ref event_type) = query.event_type {
            params.push(SqlValue::Text(event_type.clone()));
            clause.push_str(&format!(" AND event_type = ?{}", params.len()));
        }
        if let Some(ref event_types) = query.event_types {
            if !event_types.is_empty() {
                let mut placeholders = Vec::new();
                for kind in event_types {
                    params.push(SqlValue::Text(kind.clone()));
                    placeholders.push(format!("?{}", params.len()));
                }
                clause.push_str(&format!(" AND event_type IN ({})", placeholders.join(",")));
            }
        }
        if let Some(ref src_ip) = query.src_ip {
            params.push(SqlValue::Text(src_ip.clone()));
            clause.push_str(&format!(" AND src_ip = ?{}", params.len()));
        }
        if let Some(ref search) = query.search {
            params.push(SqlValue::Text(format!("%{search}%")));
            clause.push_str(&format!(" AND data LIKE ?{}", params.len()));
        }
        if let Some(ref from) = query.time_from {
            params.push(SqlValue::Text(from.clone()));
            clause.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(ref to) = query.time_to {
            params.push(SqlValue::Text(to.clone()));
            clause.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }
        (clause, params)
    }

    /// Filtered session page, newest first.
    pub fn get_sessions(&self, query: &SessionQuery) -> anyhow::Result<Vec<serde_json::Value>> {
        let mut clause = String::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(ref src_ip) = query.src_ip {
            params.push(SqlValue::Text(src_ip.clone()));
            clause.push_str(&format!(" AND src_ip = ?{}", params.len()));
        }
        if let Some(ref service) = query.service {
            params.push(SqlValue::Text(service.clone()));
            clause.push_str(&format!(" AND service = ?{}", params.len()));
        }
        if let Some(ref services) = query.services {
            if !services.is_empty() {
                let mut placeholders = Vec::new();
                for svc in services {
                    params.push(SqlValue::Text(svc.clone()));
                    placeholders.push(format!("?{}", params.len()));
                }
                clause.push_str(&format!(" AND service IN ({})", placeholders.join(",")));
            }
        }
        let sql = format!(
            "SELECT id, service, src_ip, src_port, dst_port, started_at, ended_at, metadata \
             FROM sessions WHERE 1=1{clause} ORDER BY started_at DESC LIMIT ?{} OFFSET ?{}",
            params.len() + 1,
            params.len() + 2,
        );
        params.push(SqlValue::Integer(query.limit));
        params.push(SqlValue::Integer(query.offset));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(session_row_to_json(row)?);
        }
        Ok(out)
    }

    /// Alerts, newest first.
    pub fn get_alerts(
        &self,
        limit: i64,
        unacknowledged_only: bool,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        let sql = if unacknowledged_only {
            "SELECT id, rule_name, severity, src_ip, service, message, event_ids, timestamp, acknowledged, data \
             FROM alerts WHERE acknowledged = 0 ORDER BY id DESC LIMIT ?1"
        } else {
            "SELECT id, rule_name, severity, src_ip, service, message, event_ids, timestamp, acknowledged, data \
             FROM alerts ORDER BY id DESC LIMIT ?1"
        };
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(alert_row_to_json(row)?);
        }
        Ok(out)
    }

    /// Full event timeline for one session, oldest first.
    pub fn get_events_for_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, event_type, service, src_ip, timestamp, data \
             FROM events WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([session_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(event_row_to_json(row)?);
        }
        Ok(out)
    }

    /// Distinct source IPs observed in events, sorted.
    pub fn get_unique_ips(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT src_ip FROM events ORDER BY src_ip")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_stats(&self) -> anyhow::Result<Stats> {
        let conn = self.lock();
        let count = |sql: &str| -> anyhow::Result<i64> {
            Ok(conn.query_row(sql, [], |r| r.get(0))?)
        };
        let total_events = count("SELECT COUNT(*) FROM events")?;
        let total_sessions = count("SELECT COUNT(*) FROM sessions")?;
        let total_alerts = count("SELECT COUNT(*) FROM alerts")?;
        let unacknowledged_alerts = count("SELECT COUNT(*) FROM alerts WHERE acknowledged = 0")?;
        let unique_ips = count("SELECT COUNT(DISTINCT src_ip) FROM events")?;

        let mut events_by_service = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT service, COUNT(*) FROM events GROUP BY service")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (service, count) = row?;
            events_by_service.insert(service, count);
        }

        let mut events_by_type = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT event_type, COUNT(*) FROM events GROUP BY event_type")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (kind, count) = row?;
            events_by_type.insert(kind, count);
        }

        let mut top_ips = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT src_ip, COUNT(*) AS cnt FROM events GROUP BY src_ip ORDER BY cnt DESC LIMIT 10",
        )?;
        let rows = stmt.query_map([], |r| Ok(IpCount { ip: r.get(0)?, count: r.get(1)? }))?;
        for row in rows {
            top_ips.push(row?);
        }

        Ok(Stats {
            total_events,
            total_sessions,
            total_alerts,
            unacknowledged_alerts,
            unique_ips,
            events_by_service,
            events_by_type,
            top_ips,
        })
    }

    /// Geo cache joined against per-IP event aggregates. Rows with an
    /// unresolved (0, 0) location are excluded.
    pub fn get_map_data(&self) -> anyhow::Result<Vec<MapPoint>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT g.ip, g.lat, g.lon, g.country, g.city, g.isp, \
                    COUNT(DISTINCT e.session_id) AS session_count, \
                    COUNT(e.id) AS event_count, \
                    GROUP_CONCAT(DISTINCT e.service) AS services \
             FROM geo_cache g \
             JOIN events e ON e.src_ip = g.ip \
             WHERE g.lat != 0 OR g.lon != 0 \
             GROUP BY g.ip",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(MapPoint {
                ip: r.get(0)?,
                lat: r.get::<_, Option<f64>>(1)?.unwrap_or_default(),
                lon: r.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                country: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                city: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                isp: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                session_count: r.get(6)?,
                event_count: r.get(7)?,
                services: r.get::<_, Option<String>>(8)?.unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Per-IP attacker profiles ordered by event volume.
    pub fn get_attackers(&self, limit: i64, offset: i64) -> anyhow::Result<AttackerPage> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT e.src_ip, \
                    COUNT(e.id) AS event_count, \
                    COUNT(DISTINCT e.session_id) AS session_count, \
                    COUNT(DISTINCT e.service) AS service_count, \
                    GROUP_CONCAT(DISTINCT e.service) AS services, \
                    MIN(e.timestamp) AS first_seen, \
                    MAX(e.timestamp) AS last_seen, \
                    SUM(CASE WHEN e.event_type = 'auth_attempt' THEN 1 ELSE 0 END) AS auth_attempts, \
                    SUM(CASE WHEN e.event_type = 'command' THEN 1 ELSE 0 END) AS commands, \
                    g.country, g.country_code, g.city, g.isp, g.org, g.as_number, g.lat, g.lon \
             FROM events e \
             LEFT JOIN geo_cache g ON e.src_ip = g.ip \
             GROUP BY e.src_ip \
             ORDER BY event_count DESC \
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map([limit, offset], |r| {
            let services: Option<String> = r.get(4)?;
            Ok(Attacker {
                ip: r.get(0)?,
                event_count: r.get(1)?,
                session_count: r.get(2)?,
                service_count: r.get(3)?,
                services: services
                    .map(|s| s.split(',').map(str::to_owned).collect())
                    .unwrap_or_default(),
                first_seen: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                last_seen: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
                auth_attempts: r.get::<_, Option<i64>>(7)?.unwrap_or_default(),
                commands: r.get::<_, Option<i64>>(8)?.unwrap_or_default(),
                country: r.get::<_, Option<String>>(9)?.unwrap_or_else(|| "Unknown".to_owned()),
                country_code: r.get::<_, Option<String>>(10)?.unwrap_or_default(),
                city: r.get::<_, Option<String>>(11)?.unwrap_or_default(),
                isp: r.get::<_, Option<String>>(12)?.unwrap_or_default(),
                org: r.get::<_, Option<String>>(13)?.unwrap_or_default(),
                as_number: r.get::<_, Option<String>>(14)?.unwrap_or_default(),
                lat: r.get::<_, Option<f64>>(15)?.unwrap_or_default(),
                lon: r.get::<_, Option<f64>>(16)?.unwrap_or_default(),
            })
        })?;
        let mut attackers = Vec::new();
        for row in rows {
            attackers.push(row?);
        }
        let total = conn.query_row("SELECT COUNT(DISTINCT src_ip) FROM events", [], |r| r.get(0))?;
        Ok(AttackerPage { attackers, total })
    }

    /// Aggregate `payload_ioc` alert statistics for the payload-intel view.
    pub fn get_payload_stats(&self) -> anyhow::Result<serde_json::Value> {
        use serde_json::json;

        let conn = self.lock();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE rule_name = 'payload_ioc'",
            [],
            |r| r.get(0),
        )?;
        let mut by_severity = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM alerts WHERE rule_name = 'payload_ioc' GROUP BY severity",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (sev, count) = row?;
            by_severity.insert(sev, count);
        }
        let unique_ips: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT src_ip) FROM alerts WHERE rule_name = 'payload_ioc'",
            [],
            |r| r.get(0),
        )?;
        let mut top_ips = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT src_ip, COUNT(*) AS cnt FROM alerts WHERE rule_name = 'payload_ioc' \
             GROUP BY src_ip ORDER BY cnt DESC LIMIT 10",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(json!({"ip": r.get::<_, String>(0)?, "count": r.get::<_, i64>(1)?}))
        })?;
        for row in rows {
            top_ips.push(row?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, severity, src_ip, service, message, timestamp, acknowledged, data \
             FROM alerts WHERE rule_name = 'payload_ioc' ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, i64>(6)? != 0,
                r.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut pattern_freq: BTreeMap<String, (i64, String, String)> = BTreeMap::new();
        let mut ioc_values: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
        let mut recent_iocs = Vec::new();
        let mut seen_iocs = std::collections::BTreeSet::new();
        let mut timeline_buckets: BTreeMap<String, i64> = BTreeMap::new();
        let mut recent_alerts = Vec::new();

        let severity_rank = |s: &str| match s {
            "critical" => 0,
            "high" => 1,
            "medium" => 2,
            "low" => 3,
            _ => 4,
        };

        for row in rows {
            let (id, severity, src_ip, service, message, timestamp, acknowledged, raw) = row?;
            let data = decode_payload(raw);

            if let Some(patterns) = data.get("patterns").and_then(|p| p.as_array()) {
                for p in patterns {
                    let name = p.get("name").and_then(|n| n.as_str()).unwrap_or("unknown");
                    let sev = p.get("severity").and_then(|s| s.as_str()).unwrap_or("medium");
                    let desc = p.get("description").and_then(|d| d.as_str()).unwrap_or("");
                    let entry = pattern_freq
                        .entry(name.to_owned())
                        .or_insert((0, sev.to_owned(), desc.to_owned()));
                    entry.0 += 1;
                    if severity_rank(sev) < severity_rank(&entry.1) {
                        entry.1 = sev.to_owned();
                    }
                }
            }
            if let Some(iocs) = data.get("iocs").and_then(|i| i.as_object()) {
                for (ioc_type, values) in iocs {
                    let bucket = ioc_values.entry(ioc_type.clone()).or_default();
                    for v in values.as_array().into_iter().flatten() {
                        let Some(value) = v.as_str() else { continue };
                        bucket.insert(value.to_owned());
                        let key = format!("{ioc_type}:{value}");
                        if recent_iocs.len() < 50 && seen_iocs.insert(key) {
                            recent_iocs.push(json!({
                                "type": ioc_type,
                                "value": value,
                                "timestamp": timestamp,
                            }));
                        }
                    }
                }
            }
            // Hour bucket: "YYYY-MM-DDTHH".
            if timestamp.len() >= 13 {
                *timeline_buckets.entry(timestamp[..13].to_owned()).or_default() += 1;
            }
            if recent_alerts.len() < 50 {
                recent_alerts.push(json!({
                    "id": id,
                    "severity": severity,
                    "src_ip": src_ip,
                    "service": service,
                    "message": message,
                    "timestamp": timestamp,
                    "acknowledged": acknowledged,
                    "data": data,
                }));
            }
        }

        let mut patterns: Vec<serde_json::Value> = pattern_freq
            .into_iter()
            .map(|(name, (count, severity, description))| {
                json!({"name": name, "count": count, "severity": severity, "description": description})
            })
            .collect();
        patterns.sort_by_key(|p| -p["count"].as_i64().unwrap_or(0));

        let ioc_types: BTreeMap<String, usize> =
            ioc_values.into_iter().map(|(k, v)| (k, v.len())).collect();

        let timeline: Vec<serde_json::Value> = timeline_buckets
            .iter()
            .rev()
            .take(48)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|(hour, count)| json!({"hour": hour, "count": count}))
            .collect();

        Ok(json!({
            "total": total,
            "by_severity": by_severity,
            "unique_ips": unique_ips,
            "top_ips": top_ips,
            "patterns": patterns,
            "ioc_types": ioc_types,
            "recent_iocs": recent_iocs,
            "timeline": timeline,
            "recent_alerts": recent_alerts,
        }))
    }

    /// Full table dump for the export endpoint.
    pub fn export_all(&self, table: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        match table {
            "events" => self.get_events(&EventQuery { limit: i64::MAX, ..Default::default() }),
            "sessions" => {
                self.get_sessions(&SessionQuery { limit: i64::MAX, ..Default::default() })
            }
            "alerts" => self.get_alerts(i64::MAX, false),
            "attackers" => {
                let page = self.get_attackers(i64::MAX, 0)?;
                Ok(page
                    .attackers
                    .into_iter()
                    .filter_map(|a| serde_json::to_value(a).ok())
                    .collect())
            }
            other => anyhow::bail!("unknown export table: {other}"),
        }
    }
}

/// Decode a stored JSON payload; undecodable text degrades to `{"_raw": …}`.
fn decode_payload(raw: Option<String>) -> serde_json::Value {
    match raw {
        None => serde_json::json!({}),
        Some(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => serde_json::json!({ "_raw": text }),
        },
    }
}

fn event_row_to_json(row: &rusqlite::Row<'_>) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, i64>(0)?,
        "session_id": row.get::<_, String>(1)?,
        "event_type": row.get::<_, String>(2)?,
        "service": row.get::<_, String>(3)?,
        "src_ip": row.get::<_, String>(4)?,
        "timestamp": row.get::<_, String>(5)?,
        "data": decode_payload(row.get::<_, Option<String>>(6)?),
    }))
}

fn session_row_to_json(row: &rusqlite::Row<'_>) -> anyhow::Result<serde_json::Value> {
    let metadata = match decode_payload(row.get::<_, Option<String>>(7)?) {
        serde_json::Value::Object(map) => serde_json::Value::Object(map),
        _ => serde_json::json!({}),
    };
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "service": row.get::<_, String>(1)?,
        "src_ip": row.get::<_, String>(2)?,
        "src_port": row.get::<_, i64>(3)?,
        "dst_port": row.get::<_, i64>(4)?,
        "started_at": row.get::<_, String>(5)?,
        "ended_at": row.get::<_, Option<String>>(6)?,
        "metadata": metadata,
    }))
}

fn alert_row_to_json(row: &rusqlite::Row<'_>) -> anyhow::Result<serde_json::Value> {
    let event_ids = match decode_payload(row.get::<_, Option<String>>(6)?) {
        serde_json::Value::Array(ids) => serde_json::Value::Array(ids),
        _ => serde_json::json!([]),
    };
    Ok(serde_json::json!({
        "id": row.get::<_, i64>(0)?,
        "rule_name": row.get::<_, String>(1)?,
        "severity": row.get::<_, String>(2)?,
        "src_ip": row.get::<_, String>(3)?,
        "service": row.get::<_, String>(4)?,
        "message": row.get::<_, String>(5)?,
        "event_ids": event_ids,
        "timestamp": row.get::<_, String>(7)?,
        "acknowledged": row.get::<_, i64>(8)? != 0,
        "data": decode_payload(row.get::<_, Option<String>>(9)?),
    }))
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
