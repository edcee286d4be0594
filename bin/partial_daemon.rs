//! `partial-daemon` runs inside every component container. It owns exactly
//! one worker (a pea, pod, deployment, or flow) and exposes the per-kind
//! REST contract the outer daemon drives.
//!
//! ## Usage
//!
//! ```bash
//! partial-daemon --port-expose 49200 --mode pod
//! ```
//!
//! A successful `DELETE /<kind>` closes the worker and then signals the
//! process itself to exit; the container stops with it.

use std::sync::Arc;

use clap::Parser;
use jinad::{
    cli::PartialDaemonArgs,
    partial::{partial_app, PartialState, PartialStore, ProcessWorkerFactory},
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = PartialDaemonArgs::parse();

    let state = Arc::new(PartialState {
        store: PartialStore::new(args.mode),
        factory: Box::new(ProcessWorkerFactory),
    });

    let addr = format!("0.0.0.0:{}", args.port_expose);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "partial daemon for {} listening on {} (workspace {:?})",
        args.mode,
        addr,
        args.workspace_id
    );

    axum::serve(listener, partial_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives, including the self-signal sent
/// after a successful worker delete.
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("signal handler installation cannot fail");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT signal");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM signal");
        }
    }
}
