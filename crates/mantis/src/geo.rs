// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IP geolocation with storage-backed caching, a strict outbound rate cap,
//! and in-flight request deduplication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::models::{now_iso, GeoInfo};
use crate::storage::Storage;

/// Prefixes of private/reserved ranges that never resolve to a location.
const PRIVATE_PREFIXES: &[&str] = &[
    "127.", "10.", "192.168.", "172.16.", "172.17.", "172.18.", "172.19.", "172.20.", "172.21.",
    "172.22.", "172.23.", "172.24.", "172.25.", "172.26.", "172.27.", "172.28.", "172.29.",
    "172.30.", "172.31.", "0.", "169.254.", "::1", "fc", "fd", "fe80",
];

/// Whether an IP falls in a private/loopback/link-local range.
pub fn is_private_ip(ip: &str) -> bool {
    PRIVATE_PREFIXES.iter().any(|p| ip.starts_with(p))
}

/// Fields requested from the geolocation endpoint.
const API_FIELDS: &str = "status,country,countryCode,regionName,city,lat,lon,isp,org,as";

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default, rename = "regionName")]
    region: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
    #[serde(default, rename = "as")]
    as_number: String,
}

struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_minute: u32) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec: f64::from(refill_per_minute) / 60.0,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Cached + rate-limited IP→location lookup.
pub struct GeoLocator {
    storage: Arc<Storage>,
    client: reqwest::Client,
    api_base: String,
    bucket: Mutex<TokenBucket>,
    pending: Mutex<HashMap<String, broadcast::Sender<GeoInfo>>>,
}

impl GeoLocator {
    /// Production limits: 45 requests per minute.
    pub fn new(storage: Arc<Storage>, api_base: impl Into<String>) -> Self {
        Self::with_rate(storage, api_base, 45, 45)
    }

    /// Constructor with explicit bucket parameters, for tests.
    pub fn with_rate(
        storage: Arc<Storage>,
        api_base: impl Into<String>,
        capacity: u32,
        refill_per_minute: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            storage,
            client,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            bucket: Mutex::new(TokenBucket::new(capacity, refill_per_minute)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an IP. Private ranges short-circuit to a synthetic record;
    /// cache hits skip the network; concurrent lookups of the same IP share
    /// one outbound request; failures return a blank, uncached record.
    pub async fn lookup(&self, ip: &str) -> GeoInfo {
        if is_private_ip(ip) {
            return GeoInfo::private(ip);
        }

        match self.storage.get_geo(ip) {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => tracing::warn!(ip, err = %e, "geo cache read failed"),
        }

        // Dedup: either join an in-flight lookup or become the fetcher.
        let waiter = {
            let mut pending = self.pending.lock().await;
            match pending.get(ip) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    pending.insert(ip.to_owned(), tx);
                    None
                }
            }
        };
        if let Some(mut rx) = waiter {
            return rx.recv().await.unwrap_or_else(|_| GeoInfo::blank(ip));
        }

        let geo = match self.fetch(ip).await {
            Ok(geo) => geo,
            Err(e) => {
                tracing::warn!(ip, err = %e, "geo lookup failed");
                GeoInfo::blank(ip)
            }
        };

        if let Some(tx) = self.pending.lock().await.remove(ip) {
            let _ = tx.send(geo.clone());
        }
        geo
    }

    /// Block until a rate-limit token is available, then take one. Waiters
    /// queue on the bucket lock, so the cap holds across concurrent callers.
    async fn acquire_token(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill();
        if bucket.tokens < 1.0 {
            let wait = (1.0 - bucket.tokens) / bucket.refill_per_sec;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            bucket.tokens = 1.0;
            bucket.last_refill = Instant::now();
        }
        bucket.tokens -= 1.0;
    }

    async fn fetch(&self, ip: &str) -> anyhow::Result<GeoInfo> {
        self.acquire_token().await;

        let url = format!("{}/{}", self.api_base, ip);
        let reply: ApiReply =
            self.client.get(&url).query(&[("fields", API_FIELDS)]).send().await?.json().await?;

        if reply.status != "success" {
            return Ok(GeoInfo::blank(ip));
        }

        let geo = GeoInfo {
            ip: ip.to_owned(),
            country: if reply.country.is_empty() { "Unknown".to_owned() } else { reply.country },
            country_code: reply.country_code,
            region: reply.region,
            city: reply.city,
            lat: reply.lat,
            lon: reply.lon,
            isp: reply.isp,
            org: reply.org,
            as_number: reply.as_number,
            cached_at: now_iso(),
        };
        if let Err(e) = self.storage.save_geo(&geo) {
            tracing::warn!(ip, err = %e, "geo cache write failed");
        }
        Ok(geo)
    }
}

#[cfg(test)]
#[path = "geo_tests.rs"]
mod tests;
