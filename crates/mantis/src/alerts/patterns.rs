// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Literal threat-pattern libraries.
//!
//! Two tables: HTTP attack signatures scanned against request corpora, and
//! cross-service payload signatures scanned against any text-bearing payload
//! (shell commands, SQL, HTTP bodies, file names). Patterns are compiled
//! once on first use.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Severity;

pub struct ThreatPattern {
    pub name: &'static str,
    pub severity: Severity,
    pub regex: Regex,
    pub description: &'static str,
}

#[allow(clippy::expect_used)]
fn pattern(
    name: &'static str,
    severity: Severity,
    expr: &str,
    description: &'static str,
) -> ThreatPattern {
    ThreatPattern {
        name,
        severity,
        regex: Regex::new(expr).expect("hard-coded pattern must compile"),
        description,
    }
}

/// HTTP attack signatures, scanned against path + body + UA + query +
/// header values.
pub static HTTP_THREAT_PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        pattern(
            "log4shell",
            Severity::Critical,
            r"(?i)\$\{jndi:",
            "Log4Shell JNDI injection attempt (CVE-2021-44228)",
        ),
        pattern(
            "spring4shell",
            Severity::Critical,
            r"(?i)class\.module\.classLoader|ClassLoader.*getURLs",
            "Spring4Shell RCE attempt (CVE-2022-22965)",
        ),
        pattern(
            "shellshock",
            Severity::Critical,
            r"\(\)\s*\{.*;\s*\}",
            "Shellshock bash injection (CVE-2014-6271)",
        ),
        pattern(
            "php_rce",
            Severity::High,
            r"(?i)(?:eval|assert|system|exec|passthru|shell_exec|popen|proc_open)\s*\(",
            "PHP remote code execution attempt",
        ),
        pattern(
            "command_injection",
            Severity::High,
            r"(?:;|\||&&|\$\(|`)\s*(?:cat|ls|id|whoami|uname|wget|curl|nc|bash|sh|python|perl|ruby)\b",
            "OS command injection attempt",
        ),
        pattern(
            "sql_injection",
            Severity::High,
            r"(?i)(?:'\s*(?:OR|AND|UNION)\s+|--\s*$|;\s*(?:DROP|DELETE|INSERT|UPDATE|SELECT)\s)",
            "SQL injection attempt",
        ),
        pattern(
            "path_traversal",
            Severity::High,
            r"(?:\.\./|\.\.\\){2,}|/etc/(?:passwd|shadow|hosts)",
            "Path traversal / local file inclusion",
        ),
        pattern(
            "xss",
            Severity::Medium,
            r"(?i)<script[^>]*>|javascript:|on(?:error|load|mouseover)\s*=",
            "Cross-site scripting (XSS) attempt",
        ),
        pattern(
            "cve_path_probe",
            Severity::Medium,
            r"(?i)(?:/\.env|/wp-admin|/wp-login|/actuator|/\.git/|/phpmyadmin|/phpinfo|/server-status|/admin/config|/solr/|/struts|/cgi-bin/)",
            "Known vulnerable path probe",
        ),
        pattern(
            "webshell_probe",
            Severity::High,
            r"(?i)(?:c99|r57|wso|b374k|alfa|webshell|cmd\.php|shell\.php)",
            "Web shell access attempt",
        ),
    ]
});

/// Cross-service payload signatures: downloaders, reverse shells,
/// persistence, miners, privilege escalation, encoded blobs, tmp execution.
pub static PAYLOAD_PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        // Downloaders
        pattern(
            "wget_download",
            Severity::High,
            r"(?i)wget\s+(?:-\S+\s+)*['\x22]?https?://",
            "wget fetching a remote payload",
        ),
        pattern(
            "curl_download",
            Severity::High,
            r"(?i)curl\s+(?:-\S+\s+)*['\x22]?https?://",
            "curl fetching a remote payload",
        ),
        pattern(
            "curl_pipe_sh",
            Severity::Critical,
            r"(?i)curl[^|\n]*\|\s*(?:ba)?sh",
            "curl output piped straight into a shell",
        ),
        pattern(
            "wget_pipe_sh",
            Severity::Critical,
            r"(?i)wget[^|\n]*\|\s*(?:ba)?sh",
            "wget output piped straight into a shell",
        ),
        pattern("tftp_get", Severity::High, r"(?i)tftp\s+.*\bget\b", "TFTP payload retrieval"),
        // Reverse shells
        pattern(
            "bash_reverse_shell",
            Severity::Critical,
            r"(?i)bash\s+-i\s+>&\s*/dev/tcp/",
            "bash interactive reverse shell",
        ),
        pattern(
            "nc_reverse_shell",
            Severity::Critical,
            r"(?i)\bnc\b[^|\n]*-[a-z]*[elp][a-z]*\b[^|\n]*/bin/(?:ba)?sh",
            "netcat reverse/bind shell",
        ),
        pattern(
            "python_reverse_shell",
            Severity::Critical,
            r"(?i)python[23]?\s+-c\s+.*socket.*connect",
            "python socket reverse shell",
        ),
        pattern(
            "perl_reverse_shell",
            Severity::Critical,
            r"(?i)perl\s+-e\s+.*socket.*INET",
            "perl socket reverse shell",
        ),
        pattern(
            "ruby_reverse_shell",
            Severity::Critical,
            r"(?i)ruby\s+-[re]\S*\s+.*TCPSocket",
            "ruby TCPSocket reverse shell",
        ),
        pattern(
            "php_reverse_shell",
            Severity::Critical,
            r"(?i)php\s+-r\s+.*fsockopen",
            "php fsockopen reverse shell",
        ),
        pattern(
            "mkfifo_shell",
            Severity::Critical,
            r"(?i)mkfifo\s+\S+.*\bnc\b",
            "mkfifo + netcat shell pipeline",
        ),
        pattern(
            "socat_shell",
            Severity::Critical,
            r"(?i)socat\s+.*exec.*(?:sh|bash)",
            "socat exec shell",
        ),
        pattern(
            "dev_tcp",
            Severity::Critical,
            r"/dev/tcp/\d{1,3}(?:\.\d{1,3}){3}/\d+",
            "raw /dev/tcp connection",
        ),
        // Persistence
        pattern("crontab_persistence", Severity::High, r"(?i)\bcrontab\b", "cron persistence"),
        pattern("rc_local_persistence", Severity::High, r"/etc/rc\.local", "rc.local persistence"),
        pattern(
            "systemd_persistence",
            Severity::High,
            r"/etc/systemd/",
            "systemd unit persistence",
        ),
        pattern(
            "authorized_keys",
            Severity::High,
            r"(?i)authorized_keys",
            "SSH authorized_keys tampering",
        ),
        // Miners
        pattern("xmrig_miner", Severity::High, r"(?i)\bxmrig\b", "XMRig miner deployment"),
        pattern(
            "stratum_pool",
            Severity::High,
            r"(?i)stratum\+tcp://",
            "mining pool stratum endpoint",
        ),
        pattern(
            "monero_wallet",
            Severity::High,
            r"\b4[0-9AB][1-9A-HJ-NP-Za-km-z]{93}\b",
            "Monero wallet address",
        ),
        // Privilege escalation
        pattern(
            "chmod_suid",
            Severity::High,
            r"(?i)chmod\s+(?:u\+s|\+s|[0-7]?4[0-7]{3})",
            "setuid bit manipulation",
        ),
        pattern("iptables_flush", Severity::High, r"(?i)iptables\s+-F", "firewall flush"),
        pattern(
            "passwd_shadow_access",
            Severity::High,
            r"/etc/(?:passwd|shadow)",
            "credential file access",
        ),
        // Encoded payloads
        pattern(
            "hex_escape_blob",
            Severity::Medium,
            r"(?:\\x[0-9a-fA-F]{2}){8,}",
            "long hex-escape encoded blob",
        ),
        pattern(
            "long_hex_blob",
            Severity::Medium,
            r"\b[0-9a-fA-F]{64,}\b",
            "long raw hex blob",
        ),
        pattern(
            "base64_pipe_sh",
            Severity::Critical,
            r"(?i)base64\s+(?:-d|--decode)[^|\n]*\|\s*(?:ba)?sh",
            "base64 decode piped into a shell",
        ),
        pattern(
            "echo_base64_decode",
            Severity::Medium,
            r"(?i)echo\s+[A-Za-z0-9+/=]{16,}\s*\|\s*base64\s+(?:-d|--decode)",
            "inline base64 payload decode",
        ),
        // Tmp execution
        pattern(
            "tmp_execution",
            Severity::Medium,
            r"(?:/tmp|/dev/shm|/var/tmp)/\S+",
            "payload staged in a scratch directory",
        ),
    ]
});

/// Patterns from `patterns` matching anywhere in `corpus`.
pub fn scan<'a>(patterns: &'a [ThreatPattern], corpus: &str) -> Vec<&'a ThreatPattern> {
    patterns.iter().filter(|p| p.regex.is_match(corpus)).collect()
}

/// The worst severity among matches, if any.
pub fn worst_severity(matches: &[&ThreatPattern]) -> Option<Severity> {
    matches.iter().map(|m| m.severity).reduce(Severity::worst)
}

/// JSON form embedded into event payloads and alert data.
pub fn matches_to_json(matches: &[&ThreatPattern]) -> Vec<serde_json::Value> {
    matches
        .iter()
        .map(|m| {
            serde_json::json!({
                "name": m.name,
                "severity": m.severity.as_str(),
                "description": m.description,
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "patterns_tests.rs"]
mod tests;
