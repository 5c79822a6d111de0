//! keel - reconciliation controller process
//!
//! Wires the in-memory lease store and change source to the controller,
//! serves the health probes, and drains on Ctrl-C / SIGTERM.

mod args;
mod demo;
mod health;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use keel_core::ControllerBuilder;
use keel_core::domain::ResourceKey;
use keel_core::impls::{InMemoryChangeSource, InMemoryLeaseStore};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::Args;
use crate::demo::LoggingReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Err(e) = run(args).await {
        error!(error = %format!("{e:#}"), "controller failed");
        return Err(e);
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.controller_config();
    info!(
        identity = %config.leader_election.identity,
        workers = config.worker_count,
        leader_elect = config.leader_election.enabled,
        "configuration loaded"
    );

    if config.leader_election.enabled {
        warn!(
            lease = %config.leader_election.lease_name,
            "leader election uses an in-process lease store; other replicas cannot see it"
        );
    }

    let keys = args
        .keys
        .iter()
        .map(|raw| raw.parse::<ResourceKey>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --key")?;
    let source = Arc::new(InMemoryChangeSource::with_keys(keys));

    let supervisor = ControllerBuilder::new(config)
        .reconciler(LoggingReconciler::default())
        .change_source(source)
        .lease_store(Arc::new(InMemoryLeaseStore::new()))
        .build()
        .context("invalid controller configuration")?;

    let listener = tokio::net::TcpListener::bind(args.health_probe_bind_address)
        .await
        .with_context(|| format!("cannot bind health probes on {}", args.health_probe_bind_address))?;
    info!(addr = %args.health_probe_bind_address, "serving health probes");

    let (server_stop, mut server_rx) = watch::channel(false);
    let app = health::routes(supervisor.health());
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    supervisor.run(shutdown_signal()).await?;

    let _ = server_stop.send(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health server error"),
        Err(e) => warn!(error = %e, "health server task panicked"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
