// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use mantis::cli::{checklist_line, init_tracing, Cli, Command};
use mantis::storage::Storage;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    if let Some(Command::Stats) = cli.command {
        std::process::exit(print_stats(&config.database_path));
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn print_stats(database_path: &str) -> i32 {
    let storage = match Storage::open_read_only(database_path) {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("error: cannot open {database_path}: {e}");
            return 1;
        }
    };
    match storage.get_stats() {
        Ok(stats) => {
            match serde_json::to_string_pretty(&stats) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    return 1;
                }
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

async fn run(config: mantis::config::MantisConfig) -> anyhow::Result<()> {
    let orchestrator = mantis::orchestrator::Orchestrator::new(config.clone())?;
    println!("{}", checklist_line(true, "Database initialized"));

    let report = orchestrator.start_services().await;
    for (service, addr) in &report.started {
        println!(
            "{}",
            checklist_line(
                true,
                &format!("{:8} listening on port {}", service.as_str().to_uppercase(), addr.port()),
            )
        );
    }
    for (service, err) in &report.failed {
        println!(
            "{}",
            checklist_line(false, &format!("{:8} {err}", service.as_str().to_uppercase()))
        );
    }

    let mut dashboard = None;
    if config.dashboard.enabled {
        match mantis::dashboard::start(
            std::sync::Arc::clone(&orchestrator),
            &config.dashboard,
            orchestrator.shutdown_token(),
        )
        .await
        {
            Ok(handle) => {
                println!(
                    "{}",
                    checklist_line(true, &format!("Dashboard  http://{}", handle.addr))
                );
                dashboard = Some(handle);
            }
            Err(e) => println!("{}", checklist_line(false, &format!("Dashboard {e}"))),
        }
    }

    if let Some(ref token) = config.dashboard.auth_token {
        println!("\n  Auth Token {token}");
    }
    println!(
        "\n  {} services active, press Ctrl+C to stop\n",
        report.started.len()
    );

    wait_for_shutdown().await;
    tracing::info!("shutdown signal received");

    // Stop the dashboard first, then the services and storage.
    if let Some(handle) = dashboard {
        handle.stop().await;
    }
    orchestrator.stop().await;
    println!("\n  Clean shutdown complete.\n");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(err = %e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
