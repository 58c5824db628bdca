//! agentbridge CLI and hub server entry point.
//!
//! Binary name: `agentbridge`
//!
//! Loads configuration, initializes tracing, then either runs the hub
//! (`serve`) or dispatches an inspection command against a running hub.

mod cli;
mod http;
mod state;

use std::path::PathBuf;

use clap::Parser;
use clap_complete::generate;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use agentbridge_core::{EventBus, Hub};
use agentbridge_infra::config::load_resolved;
use agentbridge_infra::memory::process_sampler;
use agentbridge_observe::tracing_setup::{init_tracing, shutdown_tracing};
use agentbridge_types::config::{BridgeConfig, LogFormat};
use agentbridge_types::event::HubEvent;

use cli::remote::{HistoryArgs, HubClient};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "agentbridge", &mut std::io::stdout());
        return Ok(());
    }

    // Load config under a bootstrap subscriber so loader warnings are not lost
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .with_target(false)
        .finish();
    let (mut config, source) = load_resolved(cli.config.as_deref())
        .with_subscriber(bootstrap)
        .await;
    let notes = config.validate();

    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    match &cli.command {
        Commands::Serve { .. } => {
            init_tracing(config.logging.format, config.logging.otel, level)
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        }
        // Inspection commands only log problems
        _ => {
            let level = if cli.verbose > 0 { level } else { "warn" };
            init_tracing(LogFormat::Pretty, false, level)
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        }
    }

    match cli.command {
        Commands::Serve { port, host } => {
            for note in &notes {
                tracing::warn!("config adjusted: {note}");
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            let result = serve(config, source, cli.quiet).await;
            shutdown_tracing();
            result?;
        }

        Commands::Config => {
            cli::config::show_config(&config, source.as_deref(), &notes, cli.json)?;
        }

        Commands::Status { remote } => {
            cli::remote::status(&HubClient::new(&remote.url), cli.json).await?;
        }

        Commands::Clients { remote } => {
            cli::remote::clients(&HubClient::new(&remote.url), cli.json).await?;
        }

        Commands::History {
            remote,
            limit,
            agent_id,
            task_id,
            intent,
        } => {
            let args = HistoryArgs {
                limit,
                agent_id,
                task_id,
                intent,
            };
            cli::remote::history(&HubClient::new(&remote.url), &args, cli.json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Run the hub until Ctrl+C / SIGTERM.
///
/// Shutdown order: stop accepting HTTP, close WebSockets, stop the hub loop,
/// drain the offload pool.
async fn serve(config: BridgeConfig, source: Option<PathBuf>, quiet: bool) -> anyhow::Result<()> {
    let events = EventBus::default();
    tokio::spawn(log_events(events.subscribe()));

    let (hub, hub_task) = Hub::spawn(&config, process_sampler(), events, CancellationToken::new());

    let shutdown = CancellationToken::new();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        %addr,
        config = ?source,
        min_workers = config.workers.min_workers,
        max_workers = config.workers.max_workers,
        "agentbridge listening"
    );
    if !quiet {
        println!(
            "  {} agentbridge listening on {}",
            console::style("⚡").bold(),
            console::style(format!("ws://{addr}/ws")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(AppState::new(hub.clone(), config, shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    hub.shutdown();
    if let Err(err) = hub_task.await {
        tracing::error!("hub loop ended abnormally: {err}");
    }

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Log hub events. Observers only: nothing downstream depends on this task.
async fn log_events(mut events: broadcast::Receiver<HubEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(?event, "hub event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
