// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Indicator-of-compromise extraction from captured payload text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::geo::is_private_ip;

/// Cap per IOC list; attackers love padding.
const MAX_PER_KIND: usize = 20;

/// TLDs accepted by the bare-domain extractor.
const KNOWN_TLDS: &str =
    "com|net|org|io|ru|cn|tk|top|xyz|cc|onion|info|biz|pw|su|to|sh|me";

#[allow(clippy::expect_used)]
fn re(expr: &str) -> Regex {
    Regex::new(expr).expect("hard-coded pattern must compile")
}

static URL_RE: Lazy<Regex> = Lazy::new(|| re(r#"https?://[^\s'"<>]+"#));
static IP_RE: Lazy<Regex> = Lazy::new(|| re(r"\b(?:\d{1,3}\.){3}\d{1,3}\b"));
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b[a-z0-9][a-z0-9-]*(?:\.[a-z0-9][a-z0-9-]*)*\.(?:{KNOWN_TLDS})\b"
    ))
});
static MD5_RE: Lazy<Regex> = Lazy::new(|| re(r"\b[a-f0-9]{32}\b"));
static SHA1_RE: Lazy<Regex> = Lazy::new(|| re(r"\b[a-f0-9]{40}\b"));
static SHA256_RE: Lazy<Regex> = Lazy::new(|| re(r"\b[a-f0-9]{64}\b"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| re(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"));

/// Extracted indicators, deduplicated and capped per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IocSet {
    pub urls: Vec<String>,
    pub ips: Vec<String>,
    pub domains: Vec<String>,
    pub md5: Vec<String>,
    pub sha1: Vec<String>,
    pub sha256: Vec<String>,
    pub emails: Vec<String>,
}

impl IocSet {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.ips.is_empty()
            && self.domains.is_empty()
            && self.md5.is_empty()
            && self.sha1.is_empty()
            && self.sha256.is_empty()
            && self.emails.is_empty()
    }

    /// Whether the set carries an indicator strong enough to alert on by
    /// itself: a URL, hash, domain, or email. Bare IPs are too noisy.
    pub fn has_significant(&self) -> bool {
        !self.urls.is_empty()
            || !self.domains.is_empty()
            || !self.md5.is_empty()
            || !self.sha1.is_empty()
            || !self.sha256.is_empty()
            || !self.emails.is_empty()
    }

    /// JSON map of non-empty lists, keyed by IOC kind.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        let mut insert = |key: &str, values: &[String]| {
            if !values.is_empty() {
                map.insert(key.to_owned(), serde_json::json!(values));
            }
        };
        insert("urls", &self.urls);
        insert("ips", &self.ips);
        insert("domains", &self.domains);
        insert("md5", &self.md5);
        insert("sha1", &self.sha1);
        insert("sha256", &self.sha256);
        insert("emails", &self.emails);
        serde_json::Value::Object(map)
    }
}

fn collect(regex: &Regex, corpus: &str, filter: impl Fn(&str) -> bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in regex.find_iter(corpus) {
        let value = m.as_str().trim_end_matches(['.', ',', ';', ')']).to_owned();
        if !filter(&value) {
            continue;
        }
        if !out.contains(&value) {
            out.push(value);
            if out.len() >= MAX_PER_KIND {
                break;
            }
        }
    }
    out
}

fn valid_public_ip(ip: &str) -> bool {
    let octets_ok = ip.split('.').all(|o| o.parse::<u16>().map(|n| n <= 255).unwrap_or(false));
    octets_ok && !is_private_ip(ip)
}

/// Extract all IOC kinds from a payload corpus.
pub fn extract(corpus: &str) -> IocSet {
    // Hashes are matched case-insensitively but normalized to lowercase so
    // dedup works across casings.
    let lowered = corpus.to_lowercase();
    IocSet {
        urls: collect(&URL_RE, corpus, |_| true),
        ips: collect(&IP_RE, corpus, valid_public_ip),
        domains: collect(&DOMAIN_RE, &lowered, |_| true),
        md5: collect(&MD5_RE, &lowered, |_| true),
        sha1: collect(&SHA1_RE, &lowered, |_| true),
        sha256: collect(&SHA256_RE, &lowered, |_| true),
        emails: collect(&EMAIL_RE, corpus, |_| true),
    }
}

#[cfg(test)]
#[path = "ioc_tests.rs"]
mod tests;
